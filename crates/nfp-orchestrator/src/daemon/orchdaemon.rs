//! OrchDaemon implementation.
//!
//! The OrchDaemon is the central coordinator for all Orch modules.
//! It manages:
//! - Orch registration and priority ordering
//! - The heartbeat loop (timers first, then pending work)
//! - Shutdown through a cancellation token

use std::collections::BTreeMap;
use std::time::Duration;

use nfp_orch_common::Orch;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

/// Configuration for the OrchDaemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchDaemonConfig {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,
}

impl Default for OrchDaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
        }
    }
}

/// The main orchestration daemon.
///
/// OrchDaemon owns every registered Orch and drives them from a single
/// task, so Orchs never need to lock their own state.
pub struct OrchDaemon {
    config: OrchDaemonConfig,
    /// Registered Orchs sorted by priority
    orchs: BTreeMap<i32, Vec<Box<dyn Orch>>>,
    running: bool,
    heartbeats: u64,
}

impl OrchDaemon {
    /// Creates a new OrchDaemon with the given configuration.
    pub fn new(config: OrchDaemonConfig) -> Self {
        Self {
            config,
            orchs: BTreeMap::new(),
            running: false,
            heartbeats: 0,
        }
    }

    /// Registers an Orch with the daemon.
    ///
    /// Orchs are ordered by priority (lower = higher priority). Orchs with
    /// equal priority keep their registration order.
    pub fn register_orch(&mut self, orch: Box<dyn Orch>) {
        let priority = orch.priority();
        let orch_name = orch.name().to_string();
        info!(orch = %orch_name, priority, "Registering orch");

        audit_log!(AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "OrchDaemon",
            format!("register_orch: {}", orch_name),
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(&orch_name)
        .with_object_type("orch_module")
        .with_details(serde_json::json!({
            "priority": priority,
        })));

        self.orchs.entry(priority).or_default().push(orch);
    }

    pub fn config(&self) -> &OrchDaemonConfig {
        &self.config
    }

    /// Number of registered Orchs.
    pub fn orch_count(&self) -> usize {
        self.orchs.values().map(Vec::len).sum()
    }

    /// Heartbeats completed so far.
    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Runs a single heartbeat.
    ///
    /// Every Orch gets `on_timer()` first, in priority order. Then each Orch
    /// reporting pending work gets one `do_task()`.
    pub async fn run_once(&mut self) {
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                orch.on_timer();
            }
        }

        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if orch.has_pending_tasks() {
                    debug!(orch = %orch.name(), "Processing tasks");
                    orch.do_task().await;
                }
            }
        }

        self.heartbeats += 1;
    }

    /// Runs the heartbeat loop until `shutdown` is cancelled.
    ///
    /// A heartbeat that has started always completes before the loop exits.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            heartbeat_interval_ms = self.config.heartbeat_interval_ms,
            orch_count = self.orch_count(),
            "Starting OrchDaemon event loop"
        );
        self.running = true;

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "OrchDaemon", "event_loop_started")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "heartbeat_interval_ms": self.config.heartbeat_interval_ms,
                "orch_count": self.orch_count(),
            })));

        let interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        loop {
            self.run_once().await;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.running = false;
        info!(heartbeats = self.heartbeats, "OrchDaemon event loop stopped");

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "OrchDaemon", "event_loop_stopped")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "heartbeats": self.heartbeats,
            })));
    }

    /// Dumps state for debugging.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!("OrchDaemon running: {}", self.running));

        for (priority, orchs) in &self.orchs {
            for orch in orchs {
                lines.push(format!(
                    "  [{:3}] {} - {} pending",
                    priority,
                    orch.name(),
                    orch.dump_pending_tasks().len()
                ));
            }
        }

        lines
    }
}
