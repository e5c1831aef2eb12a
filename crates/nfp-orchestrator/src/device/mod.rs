//! DeviceOrch - network function appliance orchestration.
//!
//! Network functions (firewall, load balancer, VPN service chains) are
//! placed on appliance instances. An appliance is shared between network
//! functions of the same tenant and vendor while it has free interface
//! slots; otherwise a new one is launched.
//!
//! # Architecture
//!
//! ```text
//! OrchRequest ──> NotificationQueue
//!                        │ (drained once per tick)
//!                        ▼
//!                   DeviceOrch ──> EventSequencer (one in-flight op per key)
//!                        │
//!                        ▼
//!                  TaskExecutor ──> DeviceLifecycleManager ──> compute/network/identity
//!                        │                                 └─> ServiceConfigurator
//!                        ▼
//!               outcomes applied on the loop
//! ```
//!
//! # Device Lifecycle
//!
//! ```text
//! create_device ─> PENDING_CREATE ─(is_device_up)─> ACTIVE ─> PENDING_DELETE ─> DELETED
//!                        │                             │
//!                        └──(max health checks)─> ERROR┘
//! ```

mod driver;
mod orch;
mod types;

pub use driver::{
    Cleanup, DeletionReport, DeviceDriverError, DeviceLifecycleManager, DriverCapabilities, DriverResult,
};
pub use orch::{
    DeviceOrch, DeviceOrchConfig, DeviceOrchStats, NetworkFunction, NetworkFunctionStatus, OrchRequest,
};
pub use types::{
    CreatedDevice, DeviceData, DeviceFilters, DeviceStateError, DeviceStatus, ManagementNetworkInfo,
    NetworkFunctionDevice, NetworkPolicy, Port, PortClassification, DEFAULT_COMPUTE_POLICY,
};
