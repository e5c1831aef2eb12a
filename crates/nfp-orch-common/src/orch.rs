//! Base Orch trait.

use async_trait::async_trait;

/// Base trait for orchestration modules.
///
/// Each module implements this trait to participate in the daemon's event
/// loop. The daemon calls `on_timer()` once per heartbeat and `do_task()`
/// whenever the module reports pending work.
///
/// # Lifecycle
///
/// 1. Construction: the module is created with its backend collaborators
/// 2. Registration: the module is handed to the daemon
/// 3. Event Loop: `on_timer()` and `do_task()` are called every heartbeat
/// 4. Shutdown: the module is dropped
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so the daemon can run on a
/// multi-threaded runtime.
#[async_trait]
pub trait Orch: Send + Sync {
    /// Returns the name of this Orch (for logging and debugging).
    fn name(&self) -> &str;

    /// Processes pending work.
    ///
    /// Implementations should:
    /// 1. Drain their inbox
    /// 2. Admit sequenced events and run the resulting backend work
    /// 3. Apply outcomes and release the sequenced keys
    async fn do_task(&mut self);

    /// Returns the priority of this Orch (lower = higher priority).
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if this Orch has pending work.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Dumps pending tasks for debugging.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }

    /// Called periodically by the daemon's timer.
    fn on_timer(&mut self) {
        // Default: no-op
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestOrch {
        name: String,
        task_count: usize,
        ticks: usize,
    }

    #[async_trait]
    impl Orch for TestOrch {
        fn name(&self) -> &str {
            &self.name
        }

        async fn do_task(&mut self) {
            self.task_count += 1;
        }

        fn has_pending_tasks(&self) -> bool {
            self.task_count < 10
        }

        fn on_timer(&mut self) {
            self.ticks += 1;
        }
    }

    #[tokio::test]
    async fn test_orch_trait() {
        let mut orch = TestOrch {
            name: "test".to_string(),
            task_count: 0,
            ticks: 0,
        };

        assert_eq!(orch.name(), "test");
        assert_eq!(orch.priority(), 0);
        assert!(orch.has_pending_tasks());
        assert!(orch.dump_pending_tasks().is_empty());

        orch.on_timer();
        orch.do_task().await;
        assert_eq!(orch.task_count, 1);
        assert_eq!(orch.ticks, 1);
    }
}
