//! Device data model.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compute policy supported by the lifecycle manager out of the box.
pub const DEFAULT_COMPUTE_POLICY: &str = "nova";

/// Lifecycle status of a network function device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    PendingCreate,
    Active,
    Error,
    PendingDelete,
    Deleted,
}

impl DeviceStatus {
    /// Returns the status name as stored by the control plane.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::PendingCreate => "PENDING_CREATE",
            DeviceStatus::Active => "ACTIVE",
            DeviceStatus::Error => "ERROR",
            DeviceStatus::PendingDelete => "PENDING_DELETE",
            DeviceStatus::Deleted => "DELETED",
        }
    }

    /// Returns true if `next` is a legal successor of this status.
    ///
    /// ```text
    /// PENDING_CREATE ─> ACTIVE ─> PENDING_DELETE ─> DELETED
    ///        │            │             │
    ///        └────────────┴─> ERROR <───┘
    /// ```
    pub fn can_transition_to(&self, next: DeviceStatus) -> bool {
        use DeviceStatus::*;
        matches!(
            (self, next),
            (PendingCreate, Active)
                | (PendingCreate, Error)
                | (PendingCreate, PendingDelete)
                | (Active, PendingDelete)
                | (Active, Error)
                | (Error, PendingDelete)
                | (PendingDelete, Deleted)
                | (PendingDelete, Error)
        )
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a port on an appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortClassification {
    Provider,
    Consumer,
    Mgmt,
    Monitor,
    Failover,
}

/// Addressing scheme a port or network belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    /// Plain ports
    #[default]
    Neutron,
    /// Group-based policy targets, each backed by a port
    Gbp,
}

/// A port handed to or owned by an appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(rename = "port_classification")]
    pub classification: PortClassification,
    #[serde(rename = "port_policy", default)]
    pub policy: NetworkPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl Port {
    pub fn new(id: impl Into<String>, classification: PortClassification, policy: NetworkPolicy) -> Self {
        Self {
            id: id.into(),
            classification,
            policy,
            position: None,
        }
    }

    /// Creates a provider-side port with the default policy.
    pub fn provider(id: impl Into<String>) -> Self {
        Self::new(id, PortClassification::Provider, NetworkPolicy::Neutron)
    }

    /// Creates a consumer-side port with the default policy.
    pub fn consumer(id: impl Into<String>) -> Self {
        Self::new(id, PortClassification::Consumer, NetworkPolicy::Neutron)
    }

    pub fn with_policy(mut self, policy: NetworkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    /// Returns true for ports carrying service traffic.
    pub fn is_data_port(&self) -> bool {
        matches!(
            self.classification,
            PortClassification::Provider | PortClassification::Consumer
        )
    }
}

/// Management network the appliance's mgmt interface is created on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementNetworkInfo {
    pub id: String,
}

/// Input to every lifecycle operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    /// Instance id, for operations on an existing device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tenant_id: String,
    #[serde(default = "default_compute_policy")]
    pub compute_policy: String,
    #[serde(default)]
    pub network_policy: NetworkPolicy,
    pub service_vendor: String,
    /// Caller-supplied token; the admin token is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub ports: Vec<Port>,
    /// Interfaces owned by the device (set on existing devices)
    #[serde(default)]
    pub mgmt_data_ports: Vec<Port>,
    pub management_network_info: ManagementNetworkInfo,
}

fn default_compute_policy() -> String {
    DEFAULT_COMPUTE_POLICY.to_string()
}

impl DeviceData {
    pub fn new(
        tenant_id: impl Into<String>,
        service_vendor: impl Into<String>,
        management_network_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            tenant_id: tenant_id.into(),
            compute_policy: default_compute_policy(),
            network_policy: NetworkPolicy::default(),
            service_vendor: service_vendor.into(),
            token: None,
            ports: Vec::new(),
            mgmt_data_ports: Vec::new(),
            management_network_info: ManagementNetworkInfo {
                id: management_network_id.into(),
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_ports(mut self, ports: Vec<Port>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_mgmt_data_ports(mut self, ports: Vec<Port>) -> Self {
        self.mgmt_data_ports = ports;
        self
    }

    pub fn with_network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.network_policy = policy;
        self
    }

    pub fn with_compute_policy(mut self, policy: impl Into<String>) -> Self {
        self.compute_policy = policy.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the requested ports of one classification, in listed order.
    pub fn ports_of(&self, classification: PortClassification) -> impl Iterator<Item = &Port> {
        self.ports
            .iter()
            .filter(move |p| p.classification == classification)
    }

    /// Returns true if any requested port has the classification.
    pub fn has_classification(&self, classification: PortClassification) -> bool {
        self.ports_of(classification).next().is_some()
    }

    /// Key serializing placement decisions for one tenant and vendor.
    pub fn placement_key(&self) -> String {
        format!("{}:{}", self.tenant_id, self.service_vendor)
    }
}

/// Selection predicate for devices eligible for sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilters {
    pub tenant_id: String,
    pub service_vendor: String,
    pub status: DeviceStatus,
}

impl DeviceFilters {
    /// Returns true if the device satisfies every filter.
    pub fn matches(&self, device: &NetworkFunctionDevice) -> bool {
        device.tenant_id == self.tenant_id
            && device.service_vendor == self.service_vendor
            && device.status() == self.status
    }
}

/// Result of a successful `create_device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDevice {
    pub id: String,
    pub name: String,
    pub mgmt_ip_address: String,
    pub mgmt_data_ports: Vec<Port>,
    pub max_interfaces: u32,
    pub interfaces_in_use: u32,
}

/// Rejected device record mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceStateError {
    #[error("Device {device}: invalid transition {from} -> {to}")]
    InvalidTransition {
        device: String,
        from: DeviceStatus,
        to: DeviceStatus,
    },

    #[error("Device {device}: {requested} interfaces requested, {in_use}/{max} in use")]
    CapacityExceeded {
        device: String,
        requested: u32,
        in_use: u32,
        max: u32,
    },

    #[error("Device {device}: releasing {requested} interfaces, only {in_use} in use")]
    InterfaceUnderflow {
        device: String,
        requested: u32,
        in_use: u32,
    },
}

/// An appliance instance tracked by the orchestrator.
///
/// Status and interface accounting are only changed through methods, so
/// `interfaces_in_use <= max_interfaces` and the status state machine hold
/// for every observable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkFunctionDevice {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub service_vendor: String,
    pub compute_policy: String,
    pub network_policy: NetworkPolicy,
    pub management_network_id: String,
    pub mgmt_ip_address: Option<String>,
    /// Interfaces the device owns (deleted with it)
    pub mgmt_ports: Vec<Port>,
    /// Borrowed data ports currently attached
    pub ports: Vec<Port>,
    status: DeviceStatus,
    max_interfaces: u32,
    interfaces_in_use: u32,
}

impl NetworkFunctionDevice {
    /// Creates an empty PENDING_CREATE record.
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        service_vendor: impl Into<String>,
        max_interfaces: u32,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tenant_id: tenant_id.into(),
            service_vendor: service_vendor.into(),
            compute_policy: default_compute_policy(),
            network_policy: NetworkPolicy::default(),
            management_network_id: String::new(),
            mgmt_ip_address: None,
            mgmt_ports: Vec::new(),
            ports: Vec::new(),
            status: DeviceStatus::PendingCreate,
            max_interfaces,
            interfaces_in_use: 0,
        }
    }

    /// Builds the record for a freshly launched device.
    pub fn from_created(created: CreatedDevice, request: &DeviceData) -> Self {
        // Launch attaches mgmt first, then providers, then consumers
        let attached: Vec<Port> = if created.interfaces_in_use > created.mgmt_data_ports.len() as u32 {
            request
                .ports_of(PortClassification::Provider)
                .chain(request.ports_of(PortClassification::Consumer))
                .zip(created.mgmt_data_ports.len() as u32..)
                .map(|(port, position)| port.clone().with_position(position))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            id: created.id,
            name: created.name,
            tenant_id: request.tenant_id.clone(),
            service_vendor: request.service_vendor.clone(),
            compute_policy: request.compute_policy.clone(),
            network_policy: request.network_policy,
            management_network_id: request.management_network_info.id.clone(),
            mgmt_ip_address: Some(created.mgmt_ip_address),
            mgmt_ports: created.mgmt_data_ports,
            ports: attached,
            status: DeviceStatus::PendingCreate,
            interfaces_in_use: created.interfaces_in_use.min(created.max_interfaces),
            max_interfaces: created.max_interfaces,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }

    pub fn max_interfaces(&self) -> u32 {
        self.max_interfaces
    }

    pub fn interfaces_in_use(&self) -> u32 {
        self.interfaces_in_use
    }

    pub fn free_interfaces(&self) -> u32 {
        self.max_interfaces - self.interfaces_in_use
    }

    /// Moves the device to `next`. Re-entering the current status is a no-op.
    pub fn transition_to(&mut self, next: DeviceStatus) -> Result<(), DeviceStateError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(DeviceStateError::InvalidTransition {
                device: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Reserves `count` interface slots. Returns the new usage.
    pub fn reserve_interfaces(&mut self, count: u32) -> Result<u32, DeviceStateError> {
        if self.interfaces_in_use + count > self.max_interfaces {
            return Err(DeviceStateError::CapacityExceeded {
                device: self.id.clone(),
                requested: count,
                in_use: self.interfaces_in_use,
                max: self.max_interfaces,
            });
        }
        self.interfaces_in_use += count;
        Ok(self.interfaces_in_use)
    }

    /// Releases `count` interface slots. Returns the new usage.
    pub fn release_interfaces(&mut self, count: u32) -> Result<u32, DeviceStateError> {
        if count > self.interfaces_in_use {
            return Err(DeviceStateError::InterfaceUnderflow {
                device: self.id.clone(),
                requested: count,
                in_use: self.interfaces_in_use,
            });
        }
        self.interfaces_in_use -= count;
        Ok(self.interfaces_in_use)
    }

    /// Records data ports as attached, numbering them after the last
    /// known interface.
    pub fn add_ports(&mut self, ports: &[Port]) {
        for port in ports {
            if self.ports.iter().any(|p| p.id == port.id) {
                continue;
            }
            let position = self
                .mgmt_ports
                .iter()
                .chain(self.ports.iter())
                .filter_map(|p| p.position)
                .max()
                .map_or(0, |last| last + 1);
            self.ports.push(port.clone().with_position(position));
        }
    }

    /// Forgets attached data ports.
    pub fn remove_ports(&mut self, ports: &[Port]) {
        self.ports.retain(|p| !ports.iter().any(|r| r.id == p.id));
    }

    /// Builds the lifecycle input for an operation on this device.
    pub fn to_device_data(&self, ports: Vec<Port>) -> DeviceData {
        DeviceData {
            id: Some(self.id.clone()),
            tenant_id: self.tenant_id.clone(),
            compute_policy: self.compute_policy.clone(),
            network_policy: self.network_policy,
            service_vendor: self.service_vendor.clone(),
            token: None,
            ports,
            mgmt_data_ports: self.mgmt_ports.clone(),
            management_network_info: ManagementNetworkInfo {
                id: self.management_network_id.clone(),
            },
        }
    }
}
