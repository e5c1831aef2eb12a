//! Network function device orchestrator.
//!
//! Places network functions (firewall, load balancer and VPN service
//! chains) onto appliance instances, sharing appliances between network
//! functions of the same tenant and vendor, and hot-plugging data
//! interfaces into running appliances.
//!
//! # Architecture
//!
//! ```text
//! requests ──> [DeviceOrch] ──> [DeviceLifecycleManager] ──> identity / compute / network
//!                  │   ▲
//!                  ▼   │ outcomes
//!            [TaskExecutor]        [ServiceConfigurator] ──> vendor drivers
//!                  ▲
//!            [OrchDaemon] heartbeat
//! ```
//!
//! # Key Components
//!
//! - [`daemon::OrchDaemon`]: heartbeat loop and Orch coordination
//! - [`device::DeviceOrch`]: network function placement and device lifecycle
//! - [`device::DeviceLifecycleManager`]: backend operations for one appliance
//! - [`service::ServiceConfigurator`]: vendor service configuration dispatch
//! - [`backend`]: backend traits and the in-memory simulated cloud

pub mod audit;
pub mod backend;
pub mod config;
pub mod daemon;
pub mod device;
pub mod service;
