//! Device lifecycle manager.
//!
//! Decides reuse versus creation and drives create/delete/plug/unplug of
//! appliance instances through the compute, network and identity backends.
//! All calls block; the orchestration loop runs them on its task executor.

use std::sync::Arc;

use nfp_orch_common::TaskError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::types::{
    CreatedDevice, DeviceData, DeviceFilters, DeviceStatus, NetworkFunctionDevice, NetworkPolicy, Port,
    PortClassification, DEFAULT_COMPUTE_POLICY,
};
use crate::backend::{
    BackendError, BackendResult, ComputeApi, IdentityApi, InstanceInterface, NetworkApi, INSTANCE_STATUS_ACTIVE,
};

/// What the driver and its backend support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverCapabilities {
    /// One appliance may serve several network functions
    pub supports_device_sharing: bool,
    /// Interfaces can be attached to a running appliance
    pub supports_hotplug: bool,
    /// Interface slots per appliance, management interface included
    pub max_interfaces: u32,
    /// Compute flavor used at launch
    pub flavor: String,
    /// The only compute policy the backend handles
    pub compute_policy: String,
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            supports_device_sharing: true,
            supports_hotplug: true,
            max_interfaces: 10,
            flavor: "m1.medium".to_string(),
            compute_policy: DEFAULT_COMPUTE_POLICY.to_string(),
        }
    }
}

/// Error type for lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceDriverError {
    /// The operation is not supported by this driver or backend
    #[error("{operation} not supported: {reason}")]
    Capability { operation: String, reason: String },

    /// A backend call failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The request is missing required data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DeviceDriverError {
    /// Creates a capability error.
    pub fn capability(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Capability {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for capability errors, which are never retried.
    pub fn is_capability(&self) -> bool {
        matches!(self, DeviceDriverError::Capability { .. })
    }
}

impl From<DeviceDriverError> for TaskError {
    fn from(err: DeviceDriverError) -> Self {
        match err {
            DeviceDriverError::Backend(e) => TaskError::backend(e.to_string()),
            other => TaskError::invalid_entry(other.to_string()),
        }
    }
}

pub type DriverResult<T> = Result<T, DeviceDriverError>;

/// Outcome of one cleanup step of `delete_device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "error")]
pub enum Cleanup {
    Removed,
    /// The backend reported the resource as not found
    AlreadyGone,
    /// Still present or unknown; the error was swallowed
    Failed(String),
}

impl Cleanup {
    fn from_result(result: BackendResult<()>) -> Self {
        match result {
            Ok(()) => Cleanup::Removed,
            Err(e) if e.is_not_found() => Cleanup::AlreadyGone,
            Err(e) => Cleanup::Failed(e.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Cleanup::Failed(_))
    }
}

/// What `delete_device` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub instance: Cleanup,
    /// One entry per owned interface, by port/policy target id
    pub interfaces: Vec<(String, Cleanup)>,
}

impl DeletionReport {
    /// Returns true if nothing is known to be left behind.
    pub fn is_clean(&self) -> bool {
        !self.instance.is_failed() && self.interfaces.iter().all(|(_, c)| !c.is_failed())
    }
}

/// Management interface allocated for a new device.
struct MgmtInterface {
    port: Port,
    /// Underlying port id handed to the compute backend
    port_id: String,
    ip_address: String,
}

/// Drives appliance instances through their lifecycle.
pub struct DeviceLifecycleManager {
    capabilities: DriverCapabilities,
    identity: Arc<dyn IdentityApi>,
    compute: Arc<dyn ComputeApi>,
    network: Arc<dyn NetworkApi>,
}

impl DeviceLifecycleManager {
    pub fn new(
        capabilities: DriverCapabilities,
        identity: Arc<dyn IdentityApi>,
        compute: Arc<dyn ComputeApi>,
        network: Arc<dyn NetworkApi>,
    ) -> Self {
        Self {
            capabilities,
            identity,
            compute,
            network,
        }
    }

    /// Creates a manager using one backend for all three collaborators.
    pub fn with_backend<B>(capabilities: DriverCapabilities, backend: Arc<B>) -> Self
    where
        B: IdentityApi + ComputeApi + NetworkApi + 'static,
    {
        Self::new(capabilities, backend.clone(), backend.clone(), backend)
    }

    pub fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    /// Returns the filters selecting devices a request may share.
    pub fn get_device_filters_for_sharing(&self, device_data: &DeviceData) -> DriverResult<DeviceFilters> {
        self.check_sharing("get_device_filters_for_sharing")?;
        Ok(DeviceFilters {
            tenant_id: device_data.tenant_id.clone(),
            service_vendor: device_data.service_vendor.clone(),
            status: DeviceStatus::Active,
        })
    }

    /// Interface slots a request needs on a shared device.
    pub fn required_interfaces(&self, device_data: &DeviceData) -> u32 {
        if device_data.has_classification(PortClassification::Consumer) {
            2
        } else {
            1
        }
    }

    /// Picks the first device, in input order, with room for the request.
    pub fn get_device_to_reuse<'a, I>(&self, devices: I, device_data: &DeviceData) -> DriverResult<Option<String>>
    where
        I: IntoIterator<Item = &'a NetworkFunctionDevice>,
    {
        self.check_sharing("get_device_to_reuse")?;
        let required = self.required_interfaces(device_data);
        let chosen = devices
            .into_iter()
            .find(|d| required <= d.free_interfaces())
            .map(|d| d.id.clone());

        match &chosen {
            Some(id) => debug!(device = %id, required, "Found device to reuse"),
            None => debug!(required, "No device with free interfaces"),
        }
        Ok(chosen)
    }

    /// Launches a new appliance.
    ///
    /// Returns `None` on any failure. Resources allocated before the failing
    /// step are released again.
    #[instrument(skip(self, device_data), fields(tenant = %device_data.tenant_id, vendor = %device_data.service_vendor))]
    pub fn create_device(&self, device_data: &DeviceData) -> Option<CreatedDevice> {
        if let Err(err) = self.check_compute_policy("create_device", device_data) {
            warn!(error = %err, "Refusing to create device");
            return None;
        }
        let token = match self.token(device_data) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Failed to get token");
                return None;
            }
        };

        let name = format!("{}-{}", device_data.service_vendor, Uuid::new_v4());
        let mgmt = match self.create_mgmt_interface(&token, device_data, &name) {
            Ok(mgmt) => mgmt,
            Err(err) => {
                warn!(error = %err, "Failed to create management interface");
                return None;
            }
        };

        match self.launch(&token, device_data, &name, &mgmt) {
            Ok((instance_id, attached)) => {
                info!(device = %instance_id, mgmt_ip = %mgmt.ip_address, interfaces = attached, "Device launched");
                Some(CreatedDevice {
                    id: instance_id,
                    name,
                    mgmt_ip_address: mgmt.ip_address,
                    mgmt_data_ports: vec![mgmt.port],
                    max_interfaces: self.capabilities.max_interfaces,
                    interfaces_in_use: attached,
                })
            }
            Err(err) => {
                warn!(error = %err, "Failed to launch device, rolling back management interface");
                if let Err(e) = self.delete_interface(&token, &device_data.tenant_id, &mgmt.port) {
                    warn!(port = %mgmt.port.id, error = %e, "Rollback of management interface failed");
                }
                None
            }
        }
    }

    /// Deletes the instance and every interface it owns.
    ///
    /// Never fails: each step swallows its own error and the outcome is
    /// recorded in the report.
    #[instrument(skip(self, device_data), fields(device = ?device_data.id))]
    pub fn delete_device(&self, device_data: &DeviceData) -> DeletionReport {
        let token = match self.token(device_data) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Failed to get token, nothing deleted");
                let failed = Cleanup::Failed(err.to_string());
                return DeletionReport {
                    instance: failed.clone(),
                    interfaces: device_data
                        .mgmt_data_ports
                        .iter()
                        .map(|p| (p.id.clone(), failed.clone()))
                        .collect(),
                };
            }
        };
        let tenant = device_data.tenant_id.as_str();

        let instance = match device_data.id.as_deref() {
            Some(id) => Cleanup::from_result(self.compute.delete_instance(&token, tenant, id)),
            None => Cleanup::AlreadyGone,
        };
        if let Cleanup::Failed(e) = &instance {
            warn!(error = %e, "Failed to delete instance");
        }

        let interfaces = device_data
            .mgmt_data_ports
            .iter()
            .map(|port| {
                let cleanup = Cleanup::from_result(self.delete_interface(&token, tenant, port));
                if let Cleanup::Failed(e) = &cleanup {
                    warn!(port = %port.id, error = %e, "Failed to delete interface");
                }
                (port.id.clone(), cleanup)
            })
            .collect();

        DeletionReport { instance, interfaces }
    }

    /// Attaches `device_data.ports` to the running device, in order.
    ///
    /// Returns false on the first failed attach; ports attached before it
    /// stay attached.
    #[instrument(skip(self, device_data), fields(device = ?device_data.id))]
    pub fn plug_interfaces(&self, device_data: &DeviceData) -> DriverResult<bool> {
        self.check_hotplug("plug_interfaces", device_data)?;
        let instance_id = Self::instance_id(device_data)?;
        let token = match self.token(device_data) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Failed to get token");
                return Ok(false);
            }
        };
        let tenant = device_data.tenant_id.as_str();

        for port in &device_data.ports {
            let result = self
                .resolve_port_id(&token, tenant, port)
                .and_then(|port_id| self.compute.attach_interface(&token, tenant, instance_id, &port_id));
            if let Err(err) = result {
                warn!(port = %port.id, error = %err, "Failed to attach interface");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Detaches `device_data.ports` from the running device, in order.
    #[instrument(skip(self, device_data), fields(device = ?device_data.id))]
    pub fn unplug_interfaces(&self, device_data: &DeviceData) -> DriverResult<bool> {
        self.check_hotplug("unplug_interfaces", device_data)?;
        let instance_id = Self::instance_id(device_data)?;
        let token = match self.token(device_data) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Failed to get token");
                return Ok(false);
            }
        };
        let tenant = device_data.tenant_id.as_str();

        for port in &device_data.ports {
            let result = self
                .resolve_port_id(&token, tenant, port)
                .and_then(|port_id| self.compute.detach_interface(&token, tenant, instance_id, &port_id));
            if let Err(err) = result {
                warn!(port = %port.id, error = %err, "Failed to detach interface");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns true only if the backend reports the instance ACTIVE.
    pub fn is_device_up(&self, device_data: &DeviceData) -> DriverResult<bool> {
        self.check_compute_policy("is_device_up", device_data)?;
        let instance_id = Self::instance_id(device_data)?;

        let status = self
            .token(device_data)
            .and_then(|token| self.compute.get_instance(&token, &device_data.tenant_id, instance_id));
        match status {
            Ok(instance) => {
                debug!(device = %instance_id, status = %instance.status, "Device status");
                Ok(instance.status == INSTANCE_STATUS_ACTIVE)
            }
            Err(err) => {
                debug!(device = %instance_id, error = %err, "Device status query failed");
                Ok(false)
            }
        }
    }

    fn check_sharing(&self, operation: &str) -> DriverResult<()> {
        if self.capabilities.supports_device_sharing {
            Ok(())
        } else {
            Err(DeviceDriverError::capability(operation, "device sharing is not supported"))
        }
    }

    fn check_compute_policy(&self, operation: &str, device_data: &DeviceData) -> DriverResult<()> {
        if device_data.compute_policy == self.capabilities.compute_policy {
            Ok(())
        } else {
            Err(DeviceDriverError::capability(
                operation,
                format!("compute policy {} is not supported", device_data.compute_policy),
            ))
        }
    }

    fn check_hotplug(&self, operation: &str, device_data: &DeviceData) -> DriverResult<()> {
        if !self.capabilities.supports_hotplug {
            return Err(DeviceDriverError::capability(operation, "interface hot-plug is not supported"));
        }
        self.check_compute_policy(operation, device_data)
    }

    fn instance_id(device_data: &DeviceData) -> DriverResult<&str> {
        device_data
            .id
            .as_deref()
            .ok_or_else(|| DeviceDriverError::InvalidRequest("device id missing".to_string()))
    }

    fn token(&self, device_data: &DeviceData) -> BackendResult<String> {
        match &device_data.token {
            Some(token) => Ok(token.clone()),
            None => self.identity.get_admin_token(),
        }
    }

    /// Returns the port id the compute backend knows `port` by.
    fn resolve_port_id(&self, token: &str, tenant_id: &str, port: &Port) -> BackendResult<String> {
        match port.policy {
            NetworkPolicy::Neutron => Ok(port.id.clone()),
            NetworkPolicy::Gbp => self
                .network
                .get_policy_target(token, tenant_id, &port.id)
                .map(|pt| pt.port_id),
        }
    }

    fn delete_interface(&self, token: &str, tenant_id: &str, port: &Port) -> BackendResult<()> {
        match port.policy {
            NetworkPolicy::Neutron => self.network.delete_port(token, tenant_id, &port.id),
            NetworkPolicy::Gbp => self.network.delete_policy_target(token, tenant_id, &port.id),
        }
    }

    fn create_mgmt_interface(&self, token: &str, device_data: &DeviceData, name: &str) -> BackendResult<MgmtInterface> {
        let tenant = device_data.tenant_id.as_str();
        let network_id = device_data.management_network_info.id.as_str();
        let mgmt_name = format!("mgmt-{}", name);

        let (port, port_id) = match device_data.network_policy {
            NetworkPolicy::Neutron => {
                let created = self.network.create_port(token, tenant, network_id, &mgmt_name)?;
                let port =
                    Port::new(created.id.clone(), PortClassification::Mgmt, NetworkPolicy::Neutron).with_position(0);
                (port, created.id)
            }
            NetworkPolicy::Gbp => {
                let target = self.network.create_policy_target(token, tenant, network_id, &mgmt_name)?;
                let port = Port::new(target.id, PortClassification::Mgmt, NetworkPolicy::Gbp).with_position(0);
                (port, target.port_id)
            }
        };

        let ip_address = self.network.get_port(token, tenant, &port_id).and_then(|info| {
            info.primary_ip()
                .map(str::to_string)
                .ok_or_else(|| BackendError::failed("get_port", format!("port {} has no fixed IP", port_id)))
        });
        match ip_address {
            Ok(ip_address) => Ok(MgmtInterface {
                port,
                port_id,
                ip_address,
            }),
            Err(err) => {
                if let Err(e) = self.delete_interface(token, tenant, &port) {
                    warn!(port = %port.id, error = %e, "Failed to clean up management interface");
                }
                Err(err)
            }
        }
    }

    /// Launches the instance. Returns its id and the number of attached
    /// interfaces.
    fn launch(
        &self,
        token: &str,
        device_data: &DeviceData,
        name: &str,
        mgmt: &MgmtInterface,
    ) -> BackendResult<(String, u32)> {
        let tenant = device_data.tenant_id.as_str();
        let mut port_ids = vec![mgmt.port_id.clone()];

        if !self.capabilities.supports_hotplug {
            let data_ports = device_data
                .ports_of(PortClassification::Provider)
                .chain(device_data.ports_of(PortClassification::Consumer));
            for port in data_ports {
                port_ids.push(self.resolve_port_id(token, tenant, port)?);
            }
        }

        if port_ids.len() > self.capabilities.max_interfaces as usize {
            return Err(BackendError::failed(
                "create_instance",
                format!(
                    "{} interfaces exceed the limit of {}",
                    port_ids.len(),
                    self.capabilities.max_interfaces
                ),
            ));
        }

        let interfaces: Vec<InstanceInterface> = port_ids
            .into_iter()
            .zip(0u32..)
            .map(|(port_id, position)| InstanceInterface { port_id, position })
            .collect();

        let image_id = self
            .compute
            .get_image_id(token, tenant, &device_data.service_vendor)?;
        let instance_id = self.compute.create_instance(
            token,
            tenant,
            &image_id,
            &self.capabilities.flavor,
            &interfaces,
            name,
        )?;
        Ok((instance_id, interfaces.len() as u32))
    }
}

impl std::fmt::Debug for DeviceLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLifecycleManager")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimOperation, SimulatedCloud};
    use pretty_assertions::assert_eq;

    fn caps(sharing: bool, hotplug: bool) -> DriverCapabilities {
        DriverCapabilities {
            supports_device_sharing: sharing,
            supports_hotplug: hotplug,
            ..Default::default()
        }
    }

    fn manager(caps: DriverCapabilities) -> (Arc<SimulatedCloud>, DeviceLifecycleManager) {
        let cloud = Arc::new(SimulatedCloud::new());
        let manager = DeviceLifecycleManager::with_backend(caps, cloud.clone());
        (cloud, manager)
    }

    fn active_device(id: &str, in_use: u32) -> NetworkFunctionDevice {
        let mut device = NetworkFunctionDevice::new(id, "tenant", "haproxy", 10);
        device.reserve_interfaces(in_use).unwrap();
        device.transition_to(DeviceStatus::Active).unwrap();
        device
    }

    #[test]
    fn test_sharing_unsupported_is_capability_error() {
        let (_, manager) = manager(caps(false, true));
        let data = DeviceData::new("tenant", "haproxy", "mgmt");

        let err = manager.get_device_filters_for_sharing(&data).unwrap_err();
        assert!(err.is_capability());
        let err = manager.get_device_to_reuse(std::iter::empty::<&NetworkFunctionDevice>(), &data).unwrap_err();
        assert!(err.is_capability());
    }

    #[test]
    fn test_sharing_filters() {
        let (_, manager) = manager(caps(true, true));
        let data = DeviceData::new("tenant", "haproxy", "mgmt");
        let filters = manager.get_device_filters_for_sharing(&data).unwrap();
        assert_eq!(
            filters,
            DeviceFilters {
                tenant_id: "tenant".into(),
                service_vendor: "haproxy".into(),
                status: DeviceStatus::Active
            }
        );
    }

    #[test]
    fn test_reuse_respects_required_interfaces() {
        let (_, manager) = manager(caps(true, true));
        let devices = vec![active_device("vm-a", 9)];

        let provider_only = DeviceData::new("tenant", "haproxy", "mgmt").with_ports(vec![Port::provider("p1")]);
        assert_eq!(
            manager.get_device_to_reuse(&devices, &provider_only).unwrap(),
            Some("vm-a".to_string())
        );

        let both = DeviceData::new("tenant", "haproxy", "mgmt")
            .with_ports(vec![Port::provider("p1"), Port::consumer("p2")]);
        assert_eq!(manager.get_device_to_reuse(&devices, &both).unwrap(), None);
    }

    #[test]
    fn test_reuse_first_match_wins() {
        let (_, manager) = manager(caps(true, true));
        let devices = vec![active_device("vm-full", 10), active_device("vm-b", 2), active_device("vm-c", 0)];
        let data = DeviceData::new("tenant", "haproxy", "mgmt").with_ports(vec![Port::provider("p1")]);
        assert_eq!(
            manager.get_device_to_reuse(&devices, &data).unwrap(),
            Some("vm-b".to_string())
        );
    }

    #[test]
    fn test_create_device_with_hotplug_only_attaches_mgmt() {
        let (cloud, manager) = manager(caps(true, true));
        let provider = cloud.add_port("provider-net");
        let data = DeviceData::new("tenant", "haproxy", "mgmt").with_ports(vec![Port::provider(provider)]);

        let created = manager.create_device(&data).unwrap();
        assert_eq!(created.interfaces_in_use, 1);
        assert_eq!(created.max_interfaces, 10);
        assert_eq!(created.mgmt_data_ports.len(), 1);
        assert_eq!(created.mgmt_data_ports[0].classification, PortClassification::Mgmt);
        assert!(created.name.starts_with("haproxy-"));
        assert_eq!(created.mgmt_data_ports[0].position, Some(0));
        assert_eq!(cloud.instance_interfaces(&created.id), vec![created.mgmt_data_ports[0].id.clone()]);
        // The provider port was created first
        assert_eq!(created.mgmt_ip_address, "11.0.0.3");
    }

    #[test]
    fn test_create_device_without_hotplug_attaches_data_ports_in_order() {
        let (cloud, manager) = manager(caps(true, false));
        let consumer = cloud.add_port("consumer-net");
        let provider_a = cloud.add_port("provider-net");
        let provider_b = cloud.add_port("provider-net");
        let data = DeviceData::new("tenant", "vyos", "mgmt").with_ports(vec![
            Port::consumer(consumer.clone()),
            Port::provider(provider_a.clone()),
            Port::new("mon", PortClassification::Monitor, NetworkPolicy::Neutron),
            Port::provider(provider_b.clone()),
        ]);

        let created = manager.create_device(&data).unwrap();
        let mgmt = created.mgmt_data_ports[0].id.clone();
        assert_eq!(created.interfaces_in_use, 4);
        assert_eq!(
            cloud.instance_interfaces(&created.id),
            vec![mgmt, provider_a, provider_b, consumer]
        );
    }

    #[test]
    fn test_create_device_rolls_back_mgmt_exactly_once() {
        let (cloud, manager) = manager(caps(true, true));
        cloud.fail(SimOperation::CreateInstance);
        let data = DeviceData::new("tenant", "haproxy", "mgmt");

        assert_eq!(manager.create_device(&data), None);
        assert_eq!(cloud.call_count(SimOperation::CreatePort), 1);
        assert_eq!(cloud.call_count(SimOperation::DeletePort), 1);
        assert_eq!(cloud.deleted_ports(), cloud.created_ports());
        assert_eq!(cloud.port_count(), 0);
        assert_eq!(cloud.instance_count(), 0);
    }

    #[test]
    fn test_create_device_mgmt_failure_has_nothing_to_roll_back() {
        let (cloud, manager) = manager(caps(true, true));
        cloud.fail(SimOperation::CreatePort);
        let data = DeviceData::new("tenant", "haproxy", "mgmt");

        assert_eq!(manager.create_device(&data), None);
        assert_eq!(cloud.call_count(SimOperation::DeletePort), 0);
        assert_eq!(cloud.call_count(SimOperation::CreateInstance), 0);
    }

    #[test]
    fn test_create_device_gbp_rolls_back_policy_target() {
        let (cloud, manager) = manager(caps(true, true));
        cloud.fail(SimOperation::GetImageId);
        let data = DeviceData::new("tenant", "vyos", "ptg-mgmt").with_network_policy(NetworkPolicy::Gbp);

        assert_eq!(manager.create_device(&data), None);
        assert_eq!(cloud.call_count(SimOperation::CreatePolicyTarget), 1);
        assert_eq!(cloud.call_count(SimOperation::DeletePolicyTarget), 1);
        assert_eq!(cloud.port_count(), 0);
    }

    #[test]
    fn test_create_device_uses_caller_token() {
        let (cloud, manager) = manager(caps(true, true));
        let data = DeviceData::new("tenant", "haproxy", "mgmt").with_token("user-token");

        assert!(manager.create_device(&data).is_some());
        assert_eq!(cloud.call_count(SimOperation::GetAdminToken), 0);
    }

    #[test]
    fn test_create_device_unsupported_compute_policy() {
        let (cloud, manager) = manager(caps(true, true));
        let data = DeviceData::new("tenant", "haproxy", "mgmt").with_compute_policy("vmware");

        assert_eq!(manager.create_device(&data), None);
        assert_eq!(cloud.call_count(SimOperation::CreatePort), 0);
    }

    #[test]
    fn test_delete_device_never_fails() {
        let (cloud, manager) = manager(caps(true, true));
        let created = manager
            .create_device(&DeviceData::new("tenant", "haproxy", "mgmt"))
            .unwrap();
        cloud.fail(SimOperation::DeleteInstance);
        cloud.fail(SimOperation::DeletePort);

        let data = DeviceData::new("tenant", "haproxy", "mgmt")
            .with_id(created.id.clone())
            .with_mgmt_data_ports(created.mgmt_data_ports.clone());
        let report = manager.delete_device(&data);
        assert!(!report.is_clean());
        assert!(report.instance.is_failed());
        assert!(report.interfaces[0].1.is_failed());
        assert!(cloud.has_instance(&created.id));
    }

    #[test]
    fn test_delete_device_distinguishes_already_gone() {
        let (cloud, manager) = manager(caps(true, true));
        let created = manager
            .create_device(&DeviceData::new("tenant", "haproxy", "mgmt"))
            .unwrap();
        let data = DeviceData::new("tenant", "haproxy", "mgmt")
            .with_id(created.id.clone())
            .with_mgmt_data_ports(created.mgmt_data_ports.clone());

        let first = manager.delete_device(&data);
        assert_eq!(first.instance, Cleanup::Removed);
        assert!(first.is_clean());
        assert!(!cloud.has_instance(&created.id));

        let second = manager.delete_device(&data);
        assert_eq!(second.instance, Cleanup::AlreadyGone);
        assert_eq!(
            second.interfaces,
            vec![(created.mgmt_data_ports[0].id.clone(), Cleanup::AlreadyGone)]
        );
        assert!(second.is_clean());
    }

    #[test]
    fn test_delete_device_token_failure() {
        let (cloud, manager) = manager(caps(true, true));
        cloud.fail(SimOperation::GetAdminToken);
        let data = DeviceData::new("tenant", "haproxy", "mgmt").with_id("vm-1");

        let report = manager.delete_device(&data);
        assert!(report.instance.is_failed());
        assert_eq!(cloud.call_count(SimOperation::DeleteInstance), 0);
    }

    #[test]
    fn test_plug_requires_hotplug_and_policy() {
        let (_, manager) = manager(caps(true, false));
        let data = DeviceData::new("tenant", "haproxy", "mgmt").with_id("vm-1");
        assert!(manager.plug_interfaces(&data).unwrap_err().is_capability());
        assert!(manager.unplug_interfaces(&data).unwrap_err().is_capability());

        let (_, manager) = self::manager(caps(true, true));
        let data = data.with_compute_policy("vmware");
        assert!(manager.plug_interfaces(&data).unwrap_err().is_capability());
    }

    #[test]
    fn test_plug_and_unplug() {
        let (cloud, manager) = manager(caps(true, true));
        let created = manager
            .create_device(&DeviceData::new("tenant", "haproxy", "mgmt"))
            .unwrap();
        let provider = cloud.add_port("provider-net");
        let pt = cloud.add_policy_target("ptg-consumer");
        let data = DeviceData::new("tenant", "haproxy", "mgmt")
            .with_id(created.id.clone())
            .with_ports(vec![
                Port::provider(provider.clone()),
                Port::consumer(pt.id.clone()).with_policy(NetworkPolicy::Gbp),
            ]);

        assert_eq!(manager.plug_interfaces(&data), Ok(true));
        let interfaces = cloud.instance_interfaces(&created.id);
        assert_eq!(interfaces.len(), 3);
        assert_eq!(interfaces[1], provider);
        // Policy targets are attached by their underlying port
        assert_eq!(interfaces[2], pt.port_id);

        assert_eq!(manager.unplug_interfaces(&data), Ok(true));
        assert_eq!(cloud.instance_interfaces(&created.id).len(), 1);
    }

    #[test]
    fn test_plug_stops_at_first_failure() {
        let (cloud, manager) = manager(caps(true, true));
        let created = manager
            .create_device(&DeviceData::new("tenant", "haproxy", "mgmt"))
            .unwrap();
        let first = cloud.add_port("provider-net");
        let data = DeviceData::new("tenant", "haproxy", "mgmt")
            .with_id(created.id.clone())
            .with_ports(vec![
                Port::provider(first.clone()),
                Port::consumer("port-missing"),
                Port::provider(cloud.add_port("provider-net")),
            ]);

        assert_eq!(manager.plug_interfaces(&data), Ok(false));
        // No rollback of the first attach
        assert!(cloud.instance_interfaces(&created.id).contains(&first));
        assert_eq!(cloud.call_count(SimOperation::AttachInterface), 2);
    }

    #[test]
    fn test_is_device_up() {
        let cloud = Arc::new(SimulatedCloud::with_boot_polls(1));
        let manager = DeviceLifecycleManager::with_backend(caps(true, true), cloud.clone());
        let created = manager
            .create_device(&DeviceData::new("tenant", "haproxy", "mgmt"))
            .unwrap();
        let data = DeviceData::new("tenant", "haproxy", "mgmt").with_id(created.id.clone());

        assert_eq!(manager.is_device_up(&data), Ok(false));
        assert_eq!(manager.is_device_up(&data), Ok(true));

        cloud.fail(SimOperation::GetInstance);
        assert_eq!(manager.is_device_up(&data), Ok(false));

        let other_policy = data.with_compute_policy("vmware");
        assert!(manager.is_device_up(&other_policy).unwrap_err().is_capability());
    }

    #[test]
    fn test_driver_error_to_task_error() {
        let err: TaskError = DeviceDriverError::Backend(BackendError::Unavailable("down".into())).into();
        assert!(err.is_retryable());
        let err: TaskError = DeviceDriverError::capability("plug_interfaces", "no hotplug").into();
        assert!(!err.is_retryable());
    }
}
