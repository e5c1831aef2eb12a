//! Orchestration daemon: owns the registered Orchs and drives the heartbeat.

mod orchdaemon;

pub use orchdaemon::{OrchDaemon, OrchDaemonConfig};
