//! Common orchestration primitives for network function devices.
//!
//! This crate provides the concurrency building blocks used by the device
//! orchestrator:
//!
//! - [`Orch`]: Base trait for orchestration modules driven by the daemon
//! - [`EventSequencer`]: Per-key FIFO admission control (at most one
//!   in-flight event per key)
//! - [`TaskExecutor`]: Scatter/gather execution of blocking jobs on a
//!   bounded worker pool
//! - [`NotificationQueue`]: Bounded inbox owned by an orchestration loop
//! - [`TaskError`]: Error type for job failures
//!
//! # Architecture
//!
//! The orchestration model is single-threaded and cooperative:
//!
//! 1. Requests arrive on a [`NotificationQueue`] and are drained once per tick
//! 2. Each request becomes one or more [`Event`]s sequenced by resource key
//! 3. [`EventSequencer::run`] hands back at most one event per key
//! 4. Events that need backend work become jobs in a single [`TaskExecutor`]
//!    batch; the loop waits for the whole batch
//! 5. Outcomes are applied on the loop and the keys are released
//!
//! # Example
//!
//! ```ignore
//! use nfp_orch_common::{Event, EventId, EventSequencer};
//!
//! let mut sequencer = EventSequencer::new();
//! sequencer.sequence("device-1", Event::new(EventId(1), "device-1", "create"));
//! sequencer.sequence("device-1", Event::new(EventId(2), "device-1", "delete"));
//!
//! // Only "create" is scheduled; "delete" waits for the release.
//! let scheduled = sequencer.run();
//! assert_eq!(scheduled.len(), 1);
//! sequencer.release("device-1", &scheduled[0]);
//! ```

mod executor;
mod notification;
mod orch;
mod sequencer;
mod task;

pub use executor::{CompletedJob, ExecutorError, ResultStore, TaskExecutor};
pub use notification::{NotificationQueue, NotificationSender, NotifyError};
pub use orch::Orch;
pub use sequencer::{Admission, Event, EventId, EventSequencer};
pub use task::{TaskError, TaskResult};
