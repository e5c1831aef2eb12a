//! DeviceOrch implementation.
//!
//! Binds network functions to appliances: launches or reuses a device,
//! waits for it to boot, hot-plugs the data ports and tears everything down
//! again on delete.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use nfp_orch_common::{
    CompletedJob, Event, EventId, EventSequencer, NotificationQueue, NotificationSender, NotifyError, Orch,
    TaskError, TaskExecutor, TaskResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::driver::{DeletionReport, DeviceLifecycleManager, DriverResult};
use super::types::{CreatedDevice, DeviceData, DeviceStatus, NetworkFunctionDevice, Port};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::service::{ConfigTarget, ServiceConfigRequest, ServiceConfigurator};

const ORCH_NAME: &str = "DeviceOrch";

/// Request handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrchRequest {
    CreateNetworkFunction { request_id: String, device_data: DeviceData },
    DeleteNetworkFunction { request_id: String },
    ConfigureService { device_id: String, request: ServiceConfigRequest },
}

/// Lifecycle status of a network function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkFunctionStatus {
    /// Waiting for a placement decision
    Pending,
    /// Bound to a device that is still booting
    WaitingForDevice,
    Plugging,
    Active,
    Unplugging,
    Error,
    Deleted,
}

/// A network function and its binding to a device.
#[derive(Debug, Clone)]
pub struct NetworkFunction {
    pub id: String,
    pub status: NetworkFunctionStatus,
    pub device_id: Option<String>,
    pub request: DeviceData,
    reserved_interfaces: u32,
    /// Data ports hot-plugged onto the device
    attached: Vec<Port>,
}

impl NetworkFunction {
    fn new(id: String, request: DeviceData) -> Self {
        Self {
            id,
            status: NetworkFunctionStatus::Pending,
            device_id: None,
            request,
            reserved_interfaces: 0,
            attached: Vec::new(),
        }
    }

    /// Interface slots held on the bound device.
    pub fn reserved_interfaces(&self) -> u32 {
        self.reserved_interfaces
    }

    /// Returns true if any data port is hot-plugged.
    pub fn is_plugged(&self) -> bool {
        !self.attached.is_empty()
    }

    pub fn attached_ports(&self) -> &[Port] {
        &self.attached
    }

    fn data_ports(&self) -> Vec<Port> {
        self.request.ports.iter().filter(|p| p.is_data_port()).cloned().collect()
    }

    fn is_bound_to(&self, device_id: &str) -> bool {
        self.status != NetworkFunctionStatus::Deleted && self.device_id.as_deref() == Some(device_id)
    }
}

/// Configuration for DeviceOrch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOrchConfig {
    /// Blocking backend calls running at once
    pub executor_workers: usize,
    /// Requests buffered between ticks
    pub inbox_capacity: usize,
    /// Failed boot polls before a device is put in ERROR
    pub health_check_max_attempts: u32,
}

impl Default for DeviceOrchConfig {
    fn default() -> Self {
        Self {
            executor_workers: 16,
            inbox_capacity: 1024,
            health_check_max_attempts: 30,
        }
    }
}

/// Statistics for DeviceOrch operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceOrchStats {
    pub devices_created: u64,
    pub devices_reused: u64,
    pub devices_deleted: u64,
    pub devices_failed: u64,
    pub create_failures: u64,
    pub plug_failures: u64,
    pub unplug_failures: u64,
    pub health_checks: u64,
    pub services_configured: u64,
    pub service_failures: u64,
}

/// Work item posted to the sequencer.
#[derive(Debug, Clone)]
enum DeviceEvent {
    Create { request_id: String },
    HealthCheck { device_id: String },
    PlugInterfaces { request_id: String, device_id: String },
    UnplugInterfaces { request_id: String, device_id: String },
    DeleteDevice { device_id: String },
    ConfigureService { device_id: String, request: ServiceConfigRequest },
}

impl DeviceEvent {
    fn label(&self) -> &'static str {
        match self {
            DeviceEvent::Create { .. } => "create_device",
            DeviceEvent::HealthCheck { .. } => "is_device_up",
            DeviceEvent::PlugInterfaces { .. } => "plug_interfaces",
            DeviceEvent::UnplugInterfaces { .. } => "unplug_interfaces",
            DeviceEvent::DeleteDevice { .. } => "delete_device",
            DeviceEvent::ConfigureService { .. } => "configure_service",
        }
    }
}

/// What a backend job produced.
#[derive(Debug, Clone)]
enum EventOutcome {
    Created(Option<CreatedDevice>),
    Up(bool),
    Plugged(PlugReport),
    Unplugged(bool),
    Deleted(DeletionReport),
    Configured,
}

/// Ports left on the instance by a plug job.
#[derive(Debug, Clone)]
struct PlugReport {
    attached: Vec<Port>,
    error: Option<String>,
}

/// Plugs `data.ports` one at a time. On a failure the ports already
/// attached are detached again; any that cannot be are reported.
fn plug_ports(manager: &DeviceLifecycleManager, data: &DeviceData) -> PlugReport {
    let mut attached = Vec::new();
    for port in &data.ports {
        let single = data.clone().with_ports(vec![port.clone()]);
        let error = match manager.plug_interfaces(&single) {
            Ok(true) => {
                attached.push(port.clone());
                continue;
            }
            Ok(false) => format!("attach of port {} failed", port.id),
            Err(err) => err.to_string(),
        };

        if !attached.is_empty() {
            let rollback = data.clone().with_ports(attached.clone());
            match manager.unplug_interfaces(&rollback) {
                Ok(true) => attached.clear(),
                Ok(false) => warn!(ports = attached.len(), "Rollback of partial plug failed"),
                Err(err) => warn!(error = %err, "Rollback of partial plug failed"),
            }
        }
        return PlugReport {
            attached,
            error: Some(error),
        };
    }
    PlugReport { attached, error: None }
}

/// Registry entry for a device.
#[derive(Debug)]
struct DeviceEntry {
    device: NetworkFunctionDevice,
    /// Creation order, used when scanning for reuse
    seq: u64,
    health_attempts: u32,
    health_pending: bool,
}

/// Orchestrates network functions onto appliance devices.
///
/// Requests arrive through the inbox and are drained once per tick. Each
/// state transition is posted as an event on the sequencer, keyed by
/// placement (`tenant:vendor`) or by device id, so at most one operation
/// per device runs at a time. Events needing backend calls are gathered
/// into one executor batch per tick; records are only mutated on the loop.
pub struct DeviceOrch {
    config: DeviceOrchConfig,
    manager: Arc<DeviceLifecycleManager>,
    configurator: Arc<ServiceConfigurator>,
    sequencer: EventSequencer<DeviceEvent>,
    executor: TaskExecutor<EventOutcome>,
    inbox: NotificationQueue<OrchRequest>,
    sender: NotificationSender<OrchRequest>,
    devices: HashMap<String, DeviceEntry>,
    network_functions: HashMap<String, NetworkFunction>,
    /// Events whose job is in the current batch, by job id
    in_flight: HashMap<String, Event<DeviceEvent>>,
    next_event_id: u64,
    next_device_seq: u64,
    stats: DeviceOrchStats,
}

impl DeviceOrch {
    /// Creates a new DeviceOrch.
    pub fn new(
        config: DeviceOrchConfig,
        manager: Arc<DeviceLifecycleManager>,
        configurator: Arc<ServiceConfigurator>,
    ) -> Self {
        let (sender, inbox) = NotificationQueue::bounded(config.inbox_capacity);
        let executor = TaskExecutor::new(config.executor_workers);
        Self {
            config,
            manager,
            configurator,
            sequencer: EventSequencer::new(),
            executor,
            inbox,
            sender,
            devices: HashMap::new(),
            network_functions: HashMap::new(),
            in_flight: HashMap::new(),
            next_event_id: 0,
            next_device_seq: 0,
            stats: DeviceOrchStats::default(),
        }
    }

    /// Returns a handle for submitting requests.
    pub fn sender(&self) -> NotificationSender<OrchRequest> {
        self.sender.clone()
    }

    /// Queues a request for the next tick.
    pub fn submit(&self, request: OrchRequest) -> Result<(), NotifyError> {
        self.sender.notify(request)
    }

    pub fn config(&self) -> &DeviceOrchConfig {
        &self.config
    }

    pub fn stats(&self) -> &DeviceOrchStats {
        &self.stats
    }

    pub fn device(&self, device_id: &str) -> Option<&NetworkFunctionDevice> {
        self.devices.get(device_id).map(|e| &e.device)
    }

    /// Returns the registered devices in creation order.
    pub fn devices(&self) -> Vec<&NetworkFunctionDevice> {
        let mut entries: Vec<&DeviceEntry> = self.devices.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| &e.device).collect()
    }

    pub fn network_function(&self, request_id: &str) -> Option<&NetworkFunction> {
        self.network_functions.get(request_id)
    }

    fn audit(category: AuditCategory, action: &str) -> AuditRecord {
        AuditRecord::new(category, ORCH_NAME, action)
    }

    fn post(&mut self, key: &str, payload: DeviceEvent) {
        self.next_event_id += 1;
        let event = Event::new(EventId(self.next_event_id), key, payload);
        self.sequencer.sequence(key, event);
    }

    fn release(&mut self, event: &Event<DeviceEvent>) {
        self.sequencer.release(&event.key, event);
    }

    fn queue_job<F>(&mut self, event: Event<DeviceEvent>, func: F)
    where
        F: FnOnce() -> TaskResult<EventOutcome> + Send + 'static,
    {
        let job_id = event.id.to_string();
        match self
            .executor
            .add_job(job_id.clone(), event.payload.label(), func, None)
        {
            Ok(()) => {
                self.in_flight.insert(job_id, event);
            }
            Err(err) => {
                error!(event = %event.id, key = %event.key, error = %err, "Failed to queue job");
                self.release(&event);
            }
        }
    }

    // ---- requests ----

    fn handle_request(&mut self, request: OrchRequest) {
        match request {
            OrchRequest::CreateNetworkFunction {
                request_id,
                device_data,
            } => {
                if self.network_functions.contains_key(&request_id) {
                    warn!(request = %request_id, "Duplicate network function request ignored");
                    return;
                }
                let key = device_data.placement_key();
                info!(request = %request_id, key = %key, "Network function requested");
                self.network_functions
                    .insert(request_id.clone(), NetworkFunction::new(request_id.clone(), device_data));
                self.post(&key, DeviceEvent::Create { request_id });
            }
            OrchRequest::DeleteNetworkFunction { request_id } => {
                let Some(nf) = self.network_functions.get_mut(&request_id) else {
                    warn!(request = %request_id, "Delete of unknown network function ignored");
                    return;
                };
                match (nf.status, nf.device_id.clone()) {
                    (NetworkFunctionStatus::Deleted | NetworkFunctionStatus::Unplugging, _) => {
                        debug!(request = %request_id, "Network function already being deleted");
                    }
                    (_, Some(device_id)) => {
                        nf.status = NetworkFunctionStatus::Unplugging;
                        self.post(
                            &device_id.clone(),
                            DeviceEvent::UnplugInterfaces {
                                request_id,
                                device_id,
                            },
                        );
                    }
                    (_, None) => {
                        // Never placed; the pending create is skipped
                        nf.status = NetworkFunctionStatus::Deleted;
                        audit_log!(Self::audit(AuditCategory::ResourceDelete, "delete_network_function")
                            .with_outcome(AuditOutcome::Success)
                            .with_object_id(request_id)
                            .with_object_type("network_function"));
                    }
                }
            }
            OrchRequest::ConfigureService { device_id, request } => {
                if !self.devices.contains_key(&device_id) {
                    warn!(device = %device_id, "Service configuration for unknown device ignored");
                    self.stats.service_failures += 1;
                    return;
                }
                self.post(&device_id.clone(), DeviceEvent::ConfigureService { device_id, request });
            }
        }
    }

    // ---- scheduled events ----

    fn dispatch(&mut self, event: Event<DeviceEvent>) {
        debug!(event = %event.id, key = %event.key, kind = event.payload.label(), "Dispatching event");
        match event.payload.clone() {
            DeviceEvent::Create { request_id } => self.on_create(event, request_id),
            DeviceEvent::HealthCheck { device_id } => self.on_health_check(event, device_id),
            DeviceEvent::PlugInterfaces { request_id, device_id } => self.on_plug(event, request_id, device_id),
            DeviceEvent::UnplugInterfaces { request_id, device_id } => self.on_unplug(event, request_id, device_id),
            DeviceEvent::DeleteDevice { device_id } => self.on_delete_device(event, device_id),
            DeviceEvent::ConfigureService { device_id, request } => self.on_configure(event, device_id, request),
        }
    }

    fn on_create(&mut self, event: Event<DeviceEvent>, request_id: String) {
        let data = match self.network_functions.get(&request_id) {
            Some(nf) if nf.status == NetworkFunctionStatus::Pending => nf.request.clone(),
            _ => {
                debug!(request = %request_id, "Create skipped, network function no longer pending");
                self.release(&event);
                return;
            }
        };

        if self.manager.capabilities().supports_device_sharing {
            match self.find_device_to_reuse(&data) {
                Ok(Some(device_id)) => {
                    self.bind_to_shared_device(&request_id, &device_id, &data);
                    self.release(&event);
                    return;
                }
                Ok(None) => {}
                Err(err) => warn!(request = %request_id, error = %err, "Device reuse lookup failed"),
            }
        }

        let manager = Arc::clone(&self.manager);
        self.queue_job(event, move || Ok(EventOutcome::Created(manager.create_device(&data))));
    }

    fn find_device_to_reuse(&self, data: &DeviceData) -> DriverResult<Option<String>> {
        let filters = self.manager.get_device_filters_for_sharing(data)?;
        let candidates: Vec<&NetworkFunctionDevice> =
            self.devices().into_iter().filter(|d| filters.matches(d)).collect();
        self.manager.get_device_to_reuse(candidates, data)
    }

    fn bind_to_shared_device(&mut self, request_id: &str, device_id: &str, data: &DeviceData) {
        let required = self.manager.required_interfaces(data);
        let hotplug = self.manager.capabilities().supports_hotplug;

        let reserved = match self.devices.get_mut(device_id) {
            Some(entry) => entry.device.reserve_interfaces(required),
            None => return,
        };
        let Some(nf) = self.network_functions.get_mut(request_id) else {
            return;
        };
        let in_use = match reserved {
            Ok(in_use) => in_use,
            Err(err) => {
                warn!(request = %request_id, error = %err, "Failed to reserve interfaces");
                nf.status = NetworkFunctionStatus::Error;
                return;
            }
        };

        nf.device_id = Some(device_id.to_string());
        nf.reserved_interfaces = required;
        nf.status = if hotplug {
            NetworkFunctionStatus::Plugging
        } else {
            NetworkFunctionStatus::Active
        };
        self.stats.devices_reused += 1;

        info!(request = %request_id, device = %device_id, in_use, "Reusing device");
        audit_log!(Self::audit(AuditCategory::ResourceModify, "reuse_device")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(device_id)
            .with_object_type("device")
            .with_correlation_id(request_id)
            .with_details(serde_json::json!({
                "reserved_interfaces": required,
                "interfaces_in_use": in_use,
            })));

        if hotplug {
            self.post(
                device_id,
                DeviceEvent::PlugInterfaces {
                    request_id: request_id.to_string(),
                    device_id: device_id.to_string(),
                },
            );
        }
    }

    fn on_health_check(&mut self, event: Event<DeviceEvent>, device_id: String) {
        let data = match self.devices.get_mut(&device_id) {
            Some(entry) if entry.device.status() == DeviceStatus::PendingCreate => entry.device.to_device_data(vec![]),
            Some(entry) => {
                entry.health_pending = false;
                self.release(&event);
                return;
            }
            None => {
                self.release(&event);
                return;
            }
        };

        let manager = Arc::clone(&self.manager);
        self.queue_job(event, move || {
            manager
                .is_device_up(&data)
                .map(EventOutcome::Up)
                .map_err(TaskError::from)
        });
    }

    fn on_plug(&mut self, event: Event<DeviceEvent>, request_id: String, device_id: String) {
        let plug = match (self.network_functions.get(&request_id), self.devices.get(&device_id)) {
            (Some(nf), Some(entry)) if nf.status == NetworkFunctionStatus::Plugging => {
                let mut data = entry.device.to_device_data(nf.data_ports());
                data.token = nf.request.token.clone();
                Some(data)
            }
            _ => None,
        };
        let Some(data) = plug else {
            debug!(request = %request_id, device = %device_id, "Plug skipped");
            self.release(&event);
            return;
        };

        let manager = Arc::clone(&self.manager);
        self.queue_job(event, move || Ok(EventOutcome::Plugged(plug_ports(&manager, &data))));
    }

    fn on_unplug(&mut self, event: Event<DeviceEvent>, request_id: String, device_id: String) {
        let hotplug = self.manager.capabilities().supports_hotplug;
        let unplug = match (self.network_functions.get(&request_id), self.devices.get(&device_id)) {
            (Some(nf), _) if nf.status != NetworkFunctionStatus::Unplugging => {
                self.release(&event);
                return;
            }
            (Some(nf), Some(entry)) if nf.is_plugged() && hotplug => {
                let mut data = entry.device.to_device_data(nf.attached.clone());
                data.token = nf.request.token.clone();
                Some(data)
            }
            _ => None,
        };

        match unplug {
            Some(data) => {
                let manager = Arc::clone(&self.manager);
                self.queue_job(event, move || {
                    manager
                        .unplug_interfaces(&data)
                        .map(EventOutcome::Unplugged)
                        .map_err(TaskError::from)
                });
            }
            None => {
                // Nothing attached by us: only the slots go
                self.finish_unplug(&request_id, &device_id);
                self.release(&event);
            }
        }
    }

    fn on_delete_device(&mut self, event: Event<DeviceEvent>, device_id: String) {
        if self.network_functions.values().any(|nf| nf.is_bound_to(&device_id)) {
            debug!(device = %device_id, "Device delete skipped, still in use");
            self.release(&event);
            return;
        }
        let data = match self.devices.get_mut(&device_id) {
            Some(entry) => match entry.device.transition_to(DeviceStatus::PendingDelete) {
                Ok(()) => entry.device.to_device_data(vec![]),
                Err(err) => {
                    warn!(error = %err, "Device delete skipped");
                    self.release(&event);
                    return;
                }
            },
            None => {
                self.release(&event);
                return;
            }
        };

        let manager = Arc::clone(&self.manager);
        self.queue_job(event, move || Ok(EventOutcome::Deleted(manager.delete_device(&data))));
    }

    fn on_configure(&mut self, event: Event<DeviceEvent>, device_id: String, request: ServiceConfigRequest) {
        let target = self.devices.get(&device_id).and_then(|entry| {
            let device = &entry.device;
            match (&device.mgmt_ip_address, device.is_active()) {
                (Some(ip), true) => Some(ConfigTarget {
                    device_id: device.id.clone(),
                    service_vendor: device.service_vendor.clone(),
                    mgmt_ip_address: ip.clone(),
                }),
                _ => None,
            }
        });
        let Some(target) = target else {
            warn!(device = %device_id, resource = %request.resource_id, "Device not active, configuration dropped");
            self.stats.service_failures += 1;
            self.release(&event);
            return;
        };

        let configurator = Arc::clone(&self.configurator);
        self.queue_job(event, move || {
            configurator
                .configure(&target, &request)
                .map(|()| EventOutcome::Configured)
                .map_err(|e| TaskError::backend(e.to_string()))
        });
    }

    // ---- outcomes ----

    fn complete(&mut self, job: CompletedJob<EventOutcome>) {
        let Some(event) = self.in_flight.remove(&job.id) else {
            warn!(job = %job.id, "Completed job has no event");
            return;
        };
        match event.payload.clone() {
            DeviceEvent::Create { request_id } => self.apply_create(&request_id, job.result),
            DeviceEvent::HealthCheck { device_id } => self.apply_health(&device_id, job.result),
            DeviceEvent::PlugInterfaces { request_id, device_id } => {
                self.apply_plug(&request_id, &device_id, job.result)
            }
            DeviceEvent::UnplugInterfaces { request_id, device_id } => {
                self.apply_unplug(&request_id, &device_id, job.result)
            }
            DeviceEvent::DeleteDevice { device_id } => self.apply_delete(&device_id, job.result),
            DeviceEvent::ConfigureService { device_id, request } => {
                self.apply_configure(&device_id, &request, job.result)
            }
        }
        self.release(&event);
    }

    fn apply_create(&mut self, request_id: &str, result: TaskResult<EventOutcome>) {
        let Some(nf) = self.network_functions.get_mut(request_id) else {
            return;
        };
        let created = match result {
            Ok(EventOutcome::Created(Some(created))) => created,
            other => {
                let reason = match other {
                    Err(err) => err.to_string(),
                    _ => "device launch failed".to_string(),
                };
                nf.status = NetworkFunctionStatus::Error;
                self.stats.create_failures += 1;
                audit_log!(Self::audit(AuditCategory::ResourceCreate, "create_device")
                    .with_object_type("device")
                    .with_correlation_id(request_id)
                    .with_error(reason));
                return;
            }
        };

        let device = NetworkFunctionDevice::from_created(created, &nf.request);
        nf.device_id = Some(device.id.clone());
        nf.reserved_interfaces = device
            .interfaces_in_use()
            .saturating_sub(device.mgmt_ports.len() as u32);
        nf.status = NetworkFunctionStatus::WaitingForDevice;

        info!(request = %request_id, device = %device.id, mgmt_ip = ?device.mgmt_ip_address, "Device created");
        audit_log!(Self::audit(AuditCategory::ResourceCreate, "create_device")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(device.id.clone())
            .with_object_type("device")
            .with_correlation_id(request_id)
            .with_details(serde_json::json!({
                "name": device.name,
                "mgmt_ip_address": device.mgmt_ip_address,
                "interfaces_in_use": device.interfaces_in_use(),
                "max_interfaces": device.max_interfaces(),
            })));

        self.next_device_seq += 1;
        self.stats.devices_created += 1;
        self.devices.insert(
            device.id.clone(),
            DeviceEntry {
                device,
                seq: self.next_device_seq,
                health_attempts: 0,
                health_pending: false,
            },
        );
    }

    fn apply_health(&mut self, device_id: &str, result: TaskResult<EventOutcome>) {
        let max_attempts = self.config.health_check_max_attempts;
        let Some(entry) = self.devices.get_mut(device_id) else {
            return;
        };
        entry.health_pending = false;
        self.stats.health_checks += 1;
        if entry.device.status() != DeviceStatus::PendingCreate {
            return;
        }

        match result {
            Ok(EventOutcome::Up(true)) => self.device_up(device_id),
            Err(err) if !err.is_retryable() => self.device_failed(device_id, err.to_string()),
            _ => {
                entry.health_attempts += 1;
                let attempts = entry.health_attempts;
                debug!(device = %device_id, attempts, "Device not up yet");
                if attempts >= max_attempts {
                    self.device_failed(device_id, format!("not up after {} health checks", attempts));
                }
            }
        }
    }

    fn device_up(&mut self, device_id: &str) {
        let hotplug = self.manager.capabilities().supports_hotplug;
        let Some(entry) = self.devices.get_mut(device_id) else {
            return;
        };
        if let Err(err) = entry.device.transition_to(DeviceStatus::Active) {
            warn!(error = %err, "Cannot activate device");
            return;
        }
        info!(device = %device_id, "Device is up");
        audit_log!(Self::audit(AuditCategory::ResourceModify, "device_up")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(device_id)
            .with_object_type("device"));

        let mut waiting: Vec<String> = self
            .network_functions
            .values()
            .filter(|nf| nf.status == NetworkFunctionStatus::WaitingForDevice && nf.is_bound_to(device_id))
            .map(|nf| nf.id.clone())
            .collect();
        waiting.sort();

        for request_id in waiting {
            if !hotplug {
                if let Some(nf) = self.network_functions.get_mut(&request_id) {
                    nf.status = NetworkFunctionStatus::Active;
                }
                continue;
            }

            let Some(nf) = self.network_functions.get_mut(&request_id) else {
                continue;
            };
            let required = self.manager.required_interfaces(&nf.request);
            let reserved = match self.devices.get_mut(device_id) {
                Some(entry) => entry.device.reserve_interfaces(required),
                None => continue,
            };
            match reserved {
                Ok(_) => {
                    nf.reserved_interfaces += required;
                    nf.status = NetworkFunctionStatus::Plugging;
                    self.post(
                        device_id,
                        DeviceEvent::PlugInterfaces {
                            request_id,
                            device_id: device_id.to_string(),
                        },
                    );
                }
                Err(err) => {
                    warn!(request = %request_id, error = %err, "Failed to reserve interfaces");
                    nf.status = NetworkFunctionStatus::Error;
                    self.stats.plug_failures += 1;
                }
            }
        }
    }

    fn device_failed(&mut self, device_id: &str, reason: String) {
        let Some(entry) = self.devices.get_mut(device_id) else {
            return;
        };
        if let Err(err) = entry.device.transition_to(DeviceStatus::Error) {
            warn!(error = %err, "Cannot mark device failed");
            return;
        }
        self.stats.devices_failed += 1;
        for nf in self.network_functions.values_mut() {
            if nf.status == NetworkFunctionStatus::WaitingForDevice && nf.is_bound_to(device_id) {
                nf.status = NetworkFunctionStatus::Error;
            }
        }
        error!(device = %device_id, reason = %reason, "Device failed");
        audit_log!(Self::audit(AuditCategory::ErrorCondition, "device_failed")
            .with_object_id(device_id)
            .with_object_type("device")
            .with_error(reason));
    }

    fn apply_plug(&mut self, request_id: &str, device_id: &str, result: TaskResult<EventOutcome>) {
        let Some(nf) = self.network_functions.get_mut(request_id) else {
            return;
        };
        let Some(entry) = self.devices.get_mut(device_id) else {
            return;
        };

        match result {
            Ok(EventOutcome::Plugged(PlugReport { attached, error: None })) => {
                entry.device.add_ports(&attached);
                nf.attached = attached;
                if nf.status == NetworkFunctionStatus::Plugging {
                    nf.status = NetworkFunctionStatus::Active;
                }
                info!(request = %request_id, device = %device_id, "Interfaces plugged");
                audit_log!(Self::audit(AuditCategory::ResourceModify, "plug_interfaces")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_id(device_id)
                    .with_object_type("device")
                    .with_correlation_id(request_id)
                    .with_details(serde_json::json!({
                        "interfaces_in_use": entry.device.interfaces_in_use(),
                    })));
            }
            other => {
                let (stranded, reason) = match other {
                    Ok(EventOutcome::Plugged(report)) => (
                        report.attached,
                        report.error.unwrap_or_else(|| "attach failed".to_string()),
                    ),
                    Err(err) => (Vec::new(), err.to_string()),
                    _ => (Vec::new(), "attach failed".to_string()),
                };
                // Ports still attached keep their slots until the delete detaches them
                let held = (stranded.len() as u32).min(nf.reserved_interfaces);
                if let Err(err) = entry.device.release_interfaces(nf.reserved_interfaces - held) {
                    warn!(error = %err, "Failed to release interfaces");
                }
                nf.reserved_interfaces = held;
                entry.device.add_ports(&stranded);
                nf.attached = stranded;
                if nf.status == NetworkFunctionStatus::Plugging {
                    nf.status = NetworkFunctionStatus::Error;
                }
                self.stats.plug_failures += 1;
                audit_log!(Self::audit(AuditCategory::ResourceModify, "plug_interfaces")
                    .with_object_id(device_id)
                    .with_object_type("device")
                    .with_correlation_id(request_id)
                    .with_details(serde_json::json!({
                        "stranded_ports": nf.attached.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
                        "interfaces_in_use": entry.device.interfaces_in_use(),
                    }))
                    .with_error(reason));
            }
        }
    }

    fn apply_unplug(&mut self, request_id: &str, device_id: &str, result: TaskResult<EventOutcome>) {
        match result {
            Ok(EventOutcome::Unplugged(true)) => self.finish_unplug(request_id, device_id),
            other => {
                let reason = match other {
                    Err(err) => err.to_string(),
                    _ => "detach failed".to_string(),
                };
                if let Some(nf) = self.network_functions.get_mut(request_id) {
                    nf.status = NetworkFunctionStatus::Error;
                }
                self.stats.unplug_failures += 1;
                audit_log!(Self::audit(AuditCategory::ResourceModify, "unplug_interfaces")
                    .with_object_id(device_id)
                    .with_object_type("device")
                    .with_correlation_id(request_id)
                    .with_error(reason));
            }
        }
    }

    /// Unbinds a network function and deletes the device once unused.
    fn finish_unplug(&mut self, request_id: &str, device_id: &str) {
        let Some(nf) = self.network_functions.get_mut(request_id) else {
            return;
        };
        if let Some(entry) = self.devices.get_mut(device_id) {
            if let Err(err) = entry.device.release_interfaces(nf.reserved_interfaces) {
                warn!(error = %err, "Failed to release interfaces");
            }
            entry.device.remove_ports(&nf.data_ports());
        }
        nf.reserved_interfaces = 0;
        nf.attached.clear();
        nf.status = NetworkFunctionStatus::Deleted;

        info!(request = %request_id, device = %device_id, "Network function deleted");
        audit_log!(Self::audit(AuditCategory::ResourceDelete, "delete_network_function")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(request_id)
            .with_object_type("network_function"));

        let in_use = self.network_functions.values().any(|nf| nf.is_bound_to(device_id));
        if !in_use && self.devices.contains_key(device_id) {
            self.post(
                device_id,
                DeviceEvent::DeleteDevice {
                    device_id: device_id.to_string(),
                },
            );
        }
    }

    fn apply_delete(&mut self, device_id: &str, result: TaskResult<EventOutcome>) {
        match result {
            Ok(EventOutcome::Deleted(report)) => {
                let Some(mut entry) = self.devices.remove(device_id) else {
                    return;
                };
                if let Err(err) = entry.device.transition_to(DeviceStatus::Deleted) {
                    warn!(error = %err, "Unexpected device status on delete");
                }
                self.stats.devices_deleted += 1;

                let details = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
                let record = Self::audit(AuditCategory::ResourceDelete, "delete_device")
                    .with_object_id(device_id)
                    .with_object_type("device")
                    .with_details(details);
                if report.is_clean() {
                    info!(device = %device_id, "Device deleted");
                    audit_log!(record.with_outcome(AuditOutcome::Success));
                } else {
                    warn!(device = %device_id, "Device deleted, some resources may be left behind");
                    audit_log!(record.with_error("cleanup incomplete"));
                }
            }
            other => {
                let reason = match other {
                    Err(err) => err.to_string(),
                    _ => "unexpected outcome".to_string(),
                };
                if let Some(entry) = self.devices.get_mut(device_id) {
                    if let Err(err) = entry.device.transition_to(DeviceStatus::Error) {
                        warn!(error = %err, "Cannot mark device failed");
                    }
                }
                audit_log!(Self::audit(AuditCategory::ResourceDelete, "delete_device")
                    .with_object_id(device_id)
                    .with_object_type("device")
                    .with_error(reason));
            }
        }
    }

    fn apply_configure(&mut self, device_id: &str, request: &ServiceConfigRequest, result: TaskResult<EventOutcome>) {
        let record = Self::audit(AuditCategory::ServiceConfig, "configure_service")
            .with_object_id(request.resource_id.clone())
            .with_object_type(request.service_type.to_string())
            .with_details(serde_json::json!({
                "device_id": device_id,
                "operation": request.operation,
            }));
        match result {
            Ok(_) => {
                self.stats.services_configured += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(err) => {
                self.stats.service_failures += 1;
                audit_log!(record.with_error(err.to_string()));
            }
        }
    }
}

impl fmt::Debug for DeviceOrch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceOrch")
            .field("devices", &self.devices.len())
            .field("network_functions", &self.network_functions.len())
            .field("pending_events", &self.sequencer.pending_count())
            .field("stats", &self.stats)
            .finish()
    }
}

#[async_trait]
impl Orch for DeviceOrch {
    fn name(&self) -> &str {
        ORCH_NAME
    }

    async fn do_task(&mut self) {
        for request in self.inbox.drain() {
            self.handle_request(request);
        }

        for event in self.sequencer.run() {
            self.dispatch(event);
        }

        if self.executor.job_count() == 0 {
            return;
        }
        match self.executor.fire().await {
            Ok(completed) => {
                for job in completed {
                    self.complete(job);
                }
            }
            Err(err) => {
                error!(error = %err, "Executor batch failed");
                let stranded: Vec<Event<DeviceEvent>> = self.in_flight.drain().map(|(_, e)| e).collect();
                for event in stranded {
                    self.release(&event);
                }
            }
        }
    }

    fn has_pending_tasks(&self) -> bool {
        !self.inbox.is_empty() || !self.sequencer.is_empty()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.sequencer.dump()
    }

    /// Posts one health check per booting device.
    fn on_timer(&mut self) {
        let mut booting: Vec<String> = self
            .devices
            .values_mut()
            .filter(|e| e.device.status() == DeviceStatus::PendingCreate && !e.health_pending)
            .map(|e| {
                e.health_pending = true;
                e.device.id.clone()
            })
            .collect();
        booting.sort();
        for device_id in booting {
            self.post(&device_id.clone(), DeviceEvent::HealthCheck { device_id });
        }
    }
}
