//! In-memory cloud used by simulation mode and tests.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use super::{
    BackendError, BackendResult, ComputeApi, FixedIp, IdentityApi, InstanceInfo, InstanceInterface,
    NetworkApi, PolicyTargetInfo, PortInfo, INSTANCE_STATUS_ACTIVE,
};
use crate::service::{
    ConfigOperation, ConfigTarget, FirewallDriver, LoadBalancerDriver, ServiceConfigError, ServiceResult,
    ServiceType, VpnDriver,
};

/// Status reported while an instance boots.
pub const INSTANCE_STATUS_BUILD: &str = "BUILD";
/// Status reported for a crashed instance.
pub const INSTANCE_STATUS_ERROR: &str = "ERROR";

const SIM_ADMIN_TOKEN: &str = "sim-admin-token";

/// Backend call, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimOperation {
    GetAdminToken,
    GetImageId,
    CreateInstance,
    DeleteInstance,
    AttachInterface,
    DetachInterface,
    GetInstance,
    CreatePort,
    DeletePort,
    GetPort,
    CreatePolicyTarget,
    DeletePolicyTarget,
    GetPolicyTarget,
}

impl SimOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimOperation::GetAdminToken => "get_admin_token",
            SimOperation::GetImageId => "get_image_id",
            SimOperation::CreateInstance => "create_instance",
            SimOperation::DeleteInstance => "delete_instance",
            SimOperation::AttachInterface => "attach_interface",
            SimOperation::DetachInterface => "detach_interface",
            SimOperation::GetInstance => "get_instance",
            SimOperation::CreatePort => "create_port",
            SimOperation::DeletePort => "delete_port",
            SimOperation::GetPort => "get_port",
            SimOperation::CreatePolicyTarget => "create_policy_target",
            SimOperation::DeletePolicyTarget => "delete_policy_target",
            SimOperation::GetPolicyTarget => "get_policy_target",
        }
    }
}

impl fmt::Display for SimOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum FailureMode {
    Always,
    Times(u32),
}

#[derive(Debug)]
struct SimInstance {
    name: String,
    interfaces: Vec<String>,
    boot_polls_left: u32,
    crashed: bool,
}

#[derive(Debug)]
struct SimPort {
    network_id: String,
    ip_address: String,
}

#[derive(Debug, Default)]
struct SimState {
    instances: HashMap<String, SimInstance>,
    ports: HashMap<String, SimPort>,
    policy_targets: HashMap<String, PolicyTargetInfo>,
    failures: HashMap<SimOperation, FailureMode>,
    calls: HashMap<SimOperation, u32>,
    created_ports: Vec<String>,
    deleted_ports: Vec<String>,
    next_id: u64,
    next_host: u32,
}

impl SimState {
    /// Counts the call and applies any injected failure.
    fn enter(&mut self, op: SimOperation) -> BackendResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get(&op).copied() {
            None => Ok(()),
            Some(FailureMode::Always) => Err(BackendError::failed(op.as_str(), "injected failure")),
            Some(FailureMode::Times(n)) => {
                if n <= 1 {
                    self.failures.remove(&op);
                } else {
                    self.failures.insert(op, FailureMode::Times(n - 1));
                }
                Err(BackendError::failed(op.as_str(), "injected failure"))
            }
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Hands out the next host address on the 11.0.0.0/16 management range.
    fn allocate_ip(&mut self) -> String {
        // .0 and .1 are reserved on every /24
        let host = self.next_host;
        self.next_host += 1;
        format!("11.0.{}.{}", host / 254, host % 254 + 2)
    }

    fn add_port(&mut self, network_id: &str) -> String {
        let id = self.next_id("port");
        self.insert_port(&id, network_id);
        id
    }

    fn insert_port(&mut self, id: &str, network_id: &str) {
        let ip_address = self.allocate_ip();
        self.ports.insert(
            id.to_string(),
            SimPort {
                network_id: network_id.to_string(),
                ip_address,
            },
        );
        self.created_ports.push(id.to_string());
    }

    fn port_info(&self, id: &str) -> BackendResult<PortInfo> {
        let port = self
            .ports
            .get(id)
            .ok_or_else(|| BackendError::not_found("port", id))?;
        Ok(PortInfo {
            id: id.to_string(),
            fixed_ips: vec![FixedIp {
                ip_address: port.ip_address.clone(),
                subnet_id: Some(format!("{}-subnet", port.network_id)),
            }],
            mac_address: None,
        })
    }

    fn remove_port(&mut self, id: &str) -> BackendResult<()> {
        self.ports
            .remove(id)
            .ok_or_else(|| BackendError::not_found("port", id))?;
        for instance in self.instances.values_mut() {
            instance.interfaces.retain(|p| p != id);
        }
        self.deleted_ports.push(id.to_string());
        Ok(())
    }
}

/// In-memory implementation of the identity, compute and network backends.
///
/// Instances report `BUILD` for a configurable number of status polls before
/// turning `ACTIVE`. Any operation can be made to fail, once, a number of
/// times, or always.
pub struct SimulatedCloud {
    boot_polls: u32,
    state: Mutex<SimState>,
}

impl SimulatedCloud {
    /// Creates a cloud whose instances are ACTIVE on the first poll.
    pub fn new() -> Self {
        Self::with_boot_polls(0)
    }

    /// Creates a cloud whose instances report BUILD for `polls` polls.
    pub fn with_boot_polls(polls: u32) -> Self {
        Self {
            boot_polls: polls,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Makes every call to `op` fail until cleared.
    pub fn fail(&self, op: SimOperation) {
        self.state.lock().failures.insert(op, FailureMode::Always);
    }

    /// Makes the next `times` calls to `op` fail.
    pub fn fail_times(&self, op: SimOperation, times: u32) {
        if times > 0 {
            self.state.lock().failures.insert(op, FailureMode::Times(times));
        }
    }

    pub fn clear_failure(&self, op: SimOperation) {
        self.state.lock().failures.remove(&op);
    }

    /// Returns how many times `op` was called, failed calls included.
    pub fn call_count(&self, op: SimOperation) -> u32 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Creates a port outside of any device, as a tenant network would.
    pub fn add_port(&self, network_id: &str) -> String {
        self.state.lock().add_port(network_id)
    }

    /// Creates a policy target backed by a fresh port.
    pub fn add_policy_target(&self, group_id: &str) -> PolicyTargetInfo {
        let mut state = self.state.lock();
        let port_id = state.add_port(group_id);
        let id = state.next_id("pt");
        let target = PolicyTargetInfo { id: id.clone(), port_id };
        state.policy_targets.insert(id, target.clone());
        target
    }

    /// Creates a port with a caller-chosen id. Returns false if it exists.
    pub fn seed_port(&self, port_id: &str, network_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.ports.contains_key(port_id) {
            return false;
        }
        state.insert_port(port_id, network_id);
        true
    }

    /// Creates a policy target with a caller-chosen id, backed by a port
    /// named `{id}-port`. Returns false if it exists.
    pub fn seed_policy_target(&self, policy_target_id: &str, group_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.policy_targets.contains_key(policy_target_id) {
            return false;
        }
        let port_id = format!("{}-port", policy_target_id);
        state.insert_port(&port_id, group_id);
        state.policy_targets.insert(
            policy_target_id.to_string(),
            PolicyTargetInfo {
                id: policy_target_id.to_string(),
                port_id,
            },
        );
        true
    }

    /// Makes an instance report ERROR from now on.
    pub fn crash_instance(&self, instance_id: &str) -> bool {
        match self.state.lock().instances.get_mut(instance_id) {
            Some(instance) => {
                instance.crashed = true;
                true
            }
            None => false,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.state.lock().instances.len()
    }

    /// Ids of the live instances, sorted.
    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_instance(&self, instance_id: &str) -> bool {
        self.state.lock().instances.contains_key(instance_id)
    }

    /// Returns the port ids attached to an instance, in attach order.
    pub fn instance_interfaces(&self, instance_id: &str) -> Vec<String> {
        self.state
            .lock()
            .instances
            .get(instance_id)
            .map(|i| i.interfaces.clone())
            .unwrap_or_default()
    }

    pub fn port_count(&self) -> usize {
        self.state.lock().ports.len()
    }

    pub fn has_port(&self, port_id: &str) -> bool {
        self.state.lock().ports.contains_key(port_id)
    }

    pub fn has_policy_target(&self, policy_target_id: &str) -> bool {
        self.state.lock().policy_targets.contains_key(policy_target_id)
    }

    /// Ports created so far, in creation order.
    pub fn created_ports(&self) -> Vec<String> {
        self.state.lock().created_ports.clone()
    }

    /// Ports deleted so far, in deletion order.
    pub fn deleted_ports(&self) -> Vec<String> {
        self.state.lock().deleted_ports.clone()
    }
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimulatedCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedCloud")
            .field("boot_polls", &self.boot_polls)
            .field("instances", &state.instances.len())
            .field("ports", &state.ports.len())
            .field("policy_targets", &state.policy_targets.len())
            .finish()
    }
}

impl IdentityApi for SimulatedCloud {
    fn get_admin_token(&self) -> BackendResult<String> {
        self.state.lock().enter(SimOperation::GetAdminToken)?;
        Ok(SIM_ADMIN_TOKEN.to_string())
    }
}

impl ComputeApi for SimulatedCloud {
    fn get_image_id(&self, _token: &str, _tenant_id: &str, vendor_name: &str) -> BackendResult<String> {
        self.state.lock().enter(SimOperation::GetImageId)?;
        Ok(format!("img-{}", vendor_name))
    }

    fn create_instance(
        &self,
        _token: &str,
        tenant_id: &str,
        image_id: &str,
        flavor: &str,
        interfaces: &[InstanceInterface],
        name: &str,
    ) -> BackendResult<String> {
        let mut state = self.state.lock();
        state.enter(SimOperation::CreateInstance)?;

        let mut ordered: Vec<&InstanceInterface> = interfaces.iter().collect();
        ordered.sort_by_key(|i| i.position);
        let mut seen = HashSet::new();
        for iface in &ordered {
            if !state.ports.contains_key(&iface.port_id) {
                return Err(BackendError::not_found("port", &iface.port_id));
            }
            if !seen.insert(iface.port_id.as_str()) {
                return Err(BackendError::failed(
                    "create_instance",
                    format!("port {} listed twice", iface.port_id),
                ));
            }
        }

        let id = state.next_id("vm");
        info!(
            instance = %id,
            tenant = %tenant_id,
            image = %image_id,
            flavor = %flavor,
            interfaces = ordered.len(),
            "Simulated instance launched"
        );
        let interfaces = ordered.iter().map(|i| i.port_id.clone()).collect();
        state.instances.insert(
            id.clone(),
            SimInstance {
                name: name.to_string(),
                interfaces,
                boot_polls_left: self.boot_polls,
                crashed: false,
            },
        );
        Ok(id)
    }

    fn delete_instance(&self, _token: &str, _tenant_id: &str, instance_id: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(SimOperation::DeleteInstance)?;
        let instance = state
            .instances
            .remove(instance_id)
            .ok_or_else(|| BackendError::not_found("instance", instance_id))?;
        debug!(instance = %instance_id, name = %instance.name, "Simulated instance deleted");
        Ok(())
    }

    fn attach_interface(
        &self,
        _token: &str,
        _tenant_id: &str,
        instance_id: &str,
        port_id: &str,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(SimOperation::AttachInterface)?;
        if !state.ports.contains_key(port_id) {
            return Err(BackendError::not_found("port", port_id));
        }
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| BackendError::not_found("instance", instance_id))?;
        if instance.interfaces.iter().any(|p| p == port_id) {
            return Err(BackendError::failed(
                "attach_interface",
                format!("port {} already attached", port_id),
            ));
        }
        instance.interfaces.push(port_id.to_string());
        Ok(())
    }

    fn detach_interface(
        &self,
        _token: &str,
        _tenant_id: &str,
        instance_id: &str,
        port_id: &str,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(SimOperation::DetachInterface)?;
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| BackendError::not_found("instance", instance_id))?;
        let before = instance.interfaces.len();
        instance.interfaces.retain(|p| p != port_id);
        if instance.interfaces.len() == before {
            return Err(BackendError::not_found("interface", port_id));
        }
        Ok(())
    }

    fn get_instance(&self, _token: &str, _tenant_id: &str, instance_id: &str) -> BackendResult<InstanceInfo> {
        let mut state = self.state.lock();
        state.enter(SimOperation::GetInstance)?;
        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| BackendError::not_found("instance", instance_id))?;

        let status = if instance.crashed {
            INSTANCE_STATUS_ERROR
        } else if instance.boot_polls_left > 0 {
            instance.boot_polls_left -= 1;
            INSTANCE_STATUS_BUILD
        } else {
            INSTANCE_STATUS_ACTIVE
        };
        Ok(InstanceInfo {
            id: instance_id.to_string(),
            status: status.to_string(),
        })
    }
}

impl NetworkApi for SimulatedCloud {
    fn create_port(&self, _token: &str, _tenant_id: &str, network_id: &str, name: &str) -> BackendResult<PortInfo> {
        let mut state = self.state.lock();
        state.enter(SimOperation::CreatePort)?;
        let id = state.add_port(network_id);
        debug!(port = %id, network = %network_id, name = %name, "Simulated port created");
        // Fixed IPs are only reported by get_port
        Ok(PortInfo {
            id,
            fixed_ips: Vec::new(),
            mac_address: None,
        })
    }

    fn delete_port(&self, _token: &str, _tenant_id: &str, port_id: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(SimOperation::DeletePort)?;
        state.remove_port(port_id)
    }

    fn get_port(&self, _token: &str, _tenant_id: &str, port_id: &str) -> BackendResult<PortInfo> {
        let mut state = self.state.lock();
        state.enter(SimOperation::GetPort)?;
        state.port_info(port_id)
    }

    fn create_policy_target(
        &self,
        _token: &str,
        _tenant_id: &str,
        group_id: &str,
        name: &str,
    ) -> BackendResult<PolicyTargetInfo> {
        let mut state = self.state.lock();
        state.enter(SimOperation::CreatePolicyTarget)?;
        let port_id = state.add_port(group_id);
        let id = state.next_id("pt");
        let target = PolicyTargetInfo { id: id.clone(), port_id };
        state.policy_targets.insert(id.clone(), target.clone());
        debug!(policy_target = %id, group = %group_id, name = %name, "Simulated policy target created");
        Ok(target)
    }

    fn delete_policy_target(&self, _token: &str, _tenant_id: &str, policy_target_id: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.enter(SimOperation::DeletePolicyTarget)?;
        let target = state
            .policy_targets
            .remove(policy_target_id)
            .ok_or_else(|| BackendError::not_found("policy_target", policy_target_id))?;
        // The backing port goes with it
        let _ = state.remove_port(&target.port_id);
        Ok(())
    }

    fn get_policy_target(
        &self,
        _token: &str,
        _tenant_id: &str,
        policy_target_id: &str,
    ) -> BackendResult<PolicyTargetInfo> {
        let mut state = self.state.lock();
        state.enter(SimOperation::GetPolicyTarget)?;
        state
            .policy_targets
            .get(policy_target_id)
            .cloned()
            .ok_or_else(|| BackendError::not_found("policy_target", policy_target_id))
    }
}

/// Configuration recorded by [`LoggingServiceDriver`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedConfig {
    pub device_id: String,
    pub mgmt_ip_address: String,
    pub service_type: ServiceType,
    pub operation: ConfigOperation,
    pub resource_id: String,
}

/// Service driver that logs and records every request instead of talking
/// to an appliance.
#[derive(Debug, Default)]
pub struct LoggingServiceDriver {
    applied: Mutex<Vec<AppliedConfig>>,
    failing: Mutex<HashSet<String>>,
}

impl LoggingServiceDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every request for `resource_id` fail.
    pub fn fail_resource(&self, resource_id: impl Into<String>) {
        self.failing.lock().insert(resource_id.into());
    }

    /// Returns every successfully applied request, in order.
    pub fn applied(&self) -> Vec<AppliedConfig> {
        self.applied.lock().clone()
    }

    fn apply(
        &self,
        target: &ConfigTarget,
        service_type: ServiceType,
        operation: ConfigOperation,
        resource_id: &str,
        body: &serde_json::Value,
    ) -> ServiceResult<()> {
        if self.failing.lock().contains(resource_id) {
            return Err(ServiceConfigError::driver(
                service_type,
                operation,
                resource_id,
                "appliance rejected configuration",
            ));
        }
        info!(
            device = %target.device_id,
            mgmt_ip = %target.mgmt_ip_address,
            service = %service_type,
            operation = %operation,
            resource = %resource_id,
            body = %body,
            "Applied service configuration"
        );
        self.applied.lock().push(AppliedConfig {
            device_id: target.device_id.clone(),
            mgmt_ip_address: target.mgmt_ip_address.clone(),
            service_type,
            operation,
            resource_id: resource_id.to_string(),
        });
        Ok(())
    }
}

impl FirewallDriver for LoggingServiceDriver {
    fn create_firewall(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::Firewall, ConfigOperation::Create, id, body)
    }

    fn update_firewall(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::Firewall, ConfigOperation::Update, id, body)
    }

    fn delete_firewall(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::Firewall, ConfigOperation::Delete, id, body)
    }
}

impl LoadBalancerDriver for LoggingServiceDriver {
    fn create_load_balancer(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::LoadBalancer, ConfigOperation::Create, id, body)
    }

    fn update_load_balancer(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::LoadBalancer, ConfigOperation::Update, id, body)
    }

    fn delete_load_balancer(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::LoadBalancer, ConfigOperation::Delete, id, body)
    }
}

impl VpnDriver for LoggingServiceDriver {
    fn create_vpn_service(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::Vpn, ConfigOperation::Create, id, body)
    }

    fn update_vpn_service(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::Vpn, ConfigOperation::Update, id, body)
    }

    fn delete_vpn_service(&self, target: &ConfigTarget, id: &str, body: &serde_json::Value) -> ServiceResult<()> {
        self.apply(target, ServiceType::Vpn, ConfigOperation::Delete, id, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_instance_boots_after_polls() {
        let cloud = SimulatedCloud::with_boot_polls(2);
        let port = cloud.add_port("mgmt");
        let vm = cloud
            .create_instance(
                "t",
                "tenant",
                "img",
                "m1.small",
                &[InstanceInterface {
                    port_id: port.clone(),
                    position: 0,
                }],
                "vm",
            )
            .unwrap();

        let statuses: Vec<String> = (0..3)
            .map(|_| cloud.get_instance("t", "tenant", &vm).unwrap().status)
            .collect();
        assert_eq!(statuses, vec!["BUILD", "BUILD", "ACTIVE"]);
        assert_eq!(cloud.instance_interfaces(&vm), vec![port]);

        cloud.crash_instance(&vm);
        assert_eq!(cloud.get_instance("t", "tenant", &vm).unwrap().status, "ERROR");
    }

    #[test]
    fn test_failure_injection_and_counters() {
        let cloud = SimulatedCloud::new();
        cloud.fail_times(SimOperation::GetAdminToken, 2);

        assert!(cloud.get_admin_token().is_err());
        assert!(cloud.get_admin_token().is_err());
        assert_eq!(cloud.get_admin_token().unwrap(), SIM_ADMIN_TOKEN);
        assert_eq!(cloud.call_count(SimOperation::GetAdminToken), 3);

        cloud.fail(SimOperation::GetImageId);
        assert!(cloud.get_image_id("t", "tenant", "vyos").is_err());
        cloud.clear_failure(SimOperation::GetImageId);
        assert_eq!(cloud.get_image_id("t", "tenant", "vyos").unwrap(), "img-vyos");
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let cloud = SimulatedCloud::new();
        assert!(cloud.delete_instance("t", "tenant", "vm-404").unwrap_err().is_not_found());
        assert!(cloud.delete_port("t", "tenant", "port-404").unwrap_err().is_not_found());
        assert!(cloud
            .delete_policy_target("t", "tenant", "pt-404")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_port_ips_are_unique() {
        let cloud = SimulatedCloud::new();
        let a = cloud.create_port("t", "tenant", "mgmt", "a").unwrap();
        let b = cloud.create_port("t", "tenant", "mgmt", "b").unwrap();
        assert!(a.fixed_ips.is_empty());

        let ip_a = cloud.get_port("t", "tenant", &a.id).unwrap();
        let ip_b = cloud.get_port("t", "tenant", &b.id).unwrap();
        assert_ne!(ip_a.primary_ip(), ip_b.primary_ip());
        assert_eq!(ip_a.primary_ip(), Some("11.0.0.2"));
    }

    #[test]
    fn test_policy_target_owns_port() {
        let cloud = SimulatedCloud::new();
        let pt = cloud.create_policy_target("t", "tenant", "ptg-mgmt", "mgmt").unwrap();
        assert!(cloud.has_port(&pt.port_id));
        assert_eq!(cloud.get_policy_target("t", "tenant", &pt.id).unwrap(), pt);

        cloud.delete_policy_target("t", "tenant", &pt.id).unwrap();
        assert!(!cloud.has_port(&pt.port_id));
        assert!(!cloud.has_policy_target(&pt.id));
    }

    #[test]
    fn test_seeded_resources() {
        let cloud = SimulatedCloud::new();
        assert!(cloud.seed_port("tenant-port-1", "provider-net"));
        assert!(!cloud.seed_port("tenant-port-1", "provider-net"));
        assert_eq!(
            cloud.get_port("t", "tenant", "tenant-port-1").unwrap().primary_ip(),
            Some("11.0.0.2")
        );

        assert!(cloud.seed_policy_target("pt-consumer", "ptg-consumer"));
        assert!(!cloud.seed_policy_target("pt-consumer", "ptg-consumer"));
        let pt = cloud.get_policy_target("t", "tenant", "pt-consumer").unwrap();
        assert_eq!(pt.port_id, "pt-consumer-port");
        assert!(cloud.has_port("pt-consumer-port"));
    }

    #[test]
    fn test_attach_detach() {
        let cloud = SimulatedCloud::new();
        let mgmt = cloud.add_port("mgmt");
        let data = cloud.add_port("provider");
        let vm = cloud
            .create_instance(
                "t",
                "tenant",
                "img",
                "m1.small",
                &[InstanceInterface {
                    port_id: mgmt.clone(),
                    position: 0,
                }],
                "vm",
            )
            .unwrap();

        cloud.attach_interface("t", "tenant", &vm, &data).unwrap();
        assert!(cloud.attach_interface("t", "tenant", &vm, &data).is_err());
        assert_eq!(cloud.instance_interfaces(&vm), vec![mgmt.clone(), data.clone()]);

        cloud.detach_interface("t", "tenant", &vm, &data).unwrap();
        assert!(cloud
            .detach_interface("t", "tenant", &vm, &data)
            .unwrap_err()
            .is_not_found());
        assert_eq!(cloud.instance_interfaces(&vm), vec![mgmt]);
    }

    #[test]
    fn test_logging_driver_failure() {
        let driver = LoggingServiceDriver::new();
        driver.fail_resource("fw-bad");
        let target = ConfigTarget {
            device_id: "vm-1".into(),
            service_vendor: "vyos".into(),
            mgmt_ip_address: "11.0.0.2".into(),
        };

        assert!(driver
            .create_firewall(&target, "fw-bad", &serde_json::Value::Null)
            .is_err());
        driver
            .update_firewall(&target, "fw-ok", &serde_json::Value::Null)
            .unwrap();

        let applied = driver.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].resource_id, "fw-ok");
        assert_eq!(applied[0].operation, ConfigOperation::Update);
    }
}
