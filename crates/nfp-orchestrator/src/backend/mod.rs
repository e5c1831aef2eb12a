//! Backend collaborators consumed by the device lifecycle manager.
//!
//! The orchestrator never talks to a cloud directly; it goes through three
//! narrow, blocking interfaces:
//!
//! ```text
//!   DeviceLifecycleManager ──> IdentityApi  (admin token)
//!                          ├─> ComputeApi   (images, instances, interfaces)
//!                          └─> NetworkApi   (ports / policy targets)
//! ```
//!
//! Calls are blocking; the orchestration loop runs them on the task
//! executor's worker pool.

pub mod sim;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sim::{LoggingServiceDriver, SimOperation, SimulatedCloud};

/// Error returned by a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The referenced resource does not exist
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// The backend could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed the request
    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },
}

impl BackendError {
    /// Creates a not-found error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Creates a failed-operation error.
    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if the resource is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// One fixed IP of a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
}

/// Port as reported by the network backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub id: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

impl PortInfo {
    /// Returns the first fixed IP address, if any.
    pub fn primary_ip(&self) -> Option<&str> {
        self.fixed_ips.first().map(|ip| ip.ip_address.as_str())
    }
}

/// Policy target as reported by the network backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTargetInfo {
    pub id: String,
    /// Underlying port backing this policy target
    pub port_id: String,
}

/// Instance as reported by the compute backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    /// Backend status string ("BUILD", "ACTIVE", "ERROR", ...)
    pub status: String,
}

/// Status string reported by the compute backend for a running instance.
pub const INSTANCE_STATUS_ACTIVE: &str = "ACTIVE";

/// One interface handed to `create_instance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInterface {
    pub port_id: String,
    pub position: u32,
}

/// Identity collaborator.
pub trait IdentityApi: Send + Sync {
    /// Returns a token with admin rights.
    fn get_admin_token(&self) -> BackendResult<String>;
}

/// Compute collaborator.
pub trait ComputeApi: Send + Sync {
    /// Resolves the image for an appliance vendor.
    fn get_image_id(&self, token: &str, tenant_id: &str, vendor_name: &str) -> BackendResult<String>;

    /// Launches an instance with the given interfaces, in order.
    fn create_instance(
        &self,
        token: &str,
        tenant_id: &str,
        image_id: &str,
        flavor: &str,
        interfaces: &[InstanceInterface],
        name: &str,
    ) -> BackendResult<String>;

    /// Deletes an instance.
    fn delete_instance(&self, token: &str, tenant_id: &str, instance_id: &str) -> BackendResult<()>;

    /// Hot-plugs a port into a running instance.
    fn attach_interface(
        &self,
        token: &str,
        tenant_id: &str,
        instance_id: &str,
        port_id: &str,
    ) -> BackendResult<()>;

    /// Hot-unplugs a port from a running instance.
    fn detach_interface(
        &self,
        token: &str,
        tenant_id: &str,
        instance_id: &str,
        port_id: &str,
    ) -> BackendResult<()>;

    /// Returns the instance status.
    fn get_instance(&self, token: &str, tenant_id: &str, instance_id: &str) -> BackendResult<InstanceInfo>;
}

/// Network collaborator, covering both addressing policies.
pub trait NetworkApi: Send + Sync {
    /// Creates a port on a network.
    fn create_port(&self, token: &str, tenant_id: &str, network_id: &str, name: &str) -> BackendResult<PortInfo>;

    /// Deletes a port.
    fn delete_port(&self, token: &str, tenant_id: &str, port_id: &str) -> BackendResult<()>;

    /// Returns a port with its fixed IPs.
    fn get_port(&self, token: &str, tenant_id: &str, port_id: &str) -> BackendResult<PortInfo>;

    /// Creates a policy target in a policy target group.
    fn create_policy_target(
        &self,
        token: &str,
        tenant_id: &str,
        group_id: &str,
        name: &str,
    ) -> BackendResult<PolicyTargetInfo>;

    /// Deletes a policy target (and its port).
    fn delete_policy_target(&self, token: &str, tenant_id: &str, policy_target_id: &str) -> BackendResult<()>;

    /// Returns a policy target with its underlying port id.
    fn get_policy_target(
        &self,
        token: &str,
        tenant_id: &str,
        policy_target_id: &str,
    ) -> BackendResult<PolicyTargetInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        assert_eq!(
            BackendError::not_found("instance", "vm-1").to_string(),
            "instance not found: vm-1"
        );
        assert_eq!(
            BackendError::failed("create_instance", "quota exceeded").to_string(),
            "create_instance failed: quota exceeded"
        );
        assert!(BackendError::not_found("port", "p").is_not_found());
        assert!(!BackendError::Unavailable("down".into()).is_not_found());
    }

    #[test]
    fn test_primary_ip() {
        let port = PortInfo {
            id: "p1".into(),
            fixed_ips: vec![FixedIp {
                ip_address: "11.0.0.5".into(),
                subnet_id: None,
            }],
            mac_address: None,
        };
        assert_eq!(port.primary_ip(), Some("11.0.0.5"));

        let bare = PortInfo {
            id: "p2".into(),
            fixed_ips: vec![],
            mac_address: None,
        };
        assert_eq!(bare.primary_ip(), None);
    }
}
