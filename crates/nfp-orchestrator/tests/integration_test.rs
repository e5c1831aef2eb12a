//! Integration tests for the orchestrator against the simulated cloud.
//!
//! These tests drive DeviceOrch through the OrchDaemon heartbeat and check
//! the resulting backend state, the way the binary runs it.

use std::sync::Arc;
use std::time::Duration;

use nfp_orch_common::NotificationSender;
use nfp_orchestrator::backend::{LoggingServiceDriver, SimOperation, SimulatedCloud};
use nfp_orchestrator::config::OrchestratorConfig;
use nfp_orchestrator::daemon::{OrchDaemon, OrchDaemonConfig};
use nfp_orchestrator::device::{
    DeviceData, DeviceLifecycleManager, DeviceOrch, DeviceOrchConfig, DeviceStatus, DriverCapabilities,
    NetworkFunctionDevice, OrchRequest, Port,
};
use nfp_orchestrator::service::{
    ConfigOperation, ServiceConfigRequest, ServiceConfigurator, ServiceType, VendorDrivers,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const TENANT: &str = "tenant-a";
const VENDOR: &str = "vyos";
const MAX_HEARTBEATS: usize = 50;

struct Setup {
    cloud: Arc<SimulatedCloud>,
    driver: Arc<LoggingServiceDriver>,
    sender: NotificationSender<OrchRequest>,
    daemon: OrchDaemon,
}

fn setup(caps: DriverCapabilities, boot_polls: u32, heartbeat_interval_ms: u64) -> Setup {
    let cloud = Arc::new(SimulatedCloud::with_boot_polls(boot_polls));
    let manager = Arc::new(DeviceLifecycleManager::with_backend(caps, cloud.clone()));

    let driver = Arc::new(LoggingServiceDriver::new());
    let mut configurator = ServiceConfigurator::new();
    configurator.register_vendor(VENDOR, VendorDrivers::new().with_firewall(driver.clone()));

    let orch = DeviceOrch::new(DeviceOrchConfig::default(), manager, Arc::new(configurator));
    let sender = orch.sender();

    let mut daemon = OrchDaemon::new(OrchDaemonConfig {
        heartbeat_interval_ms,
    });
    daemon.register_orch(Box::new(orch));

    Setup {
        cloud,
        driver,
        sender,
        daemon,
    }
}

fn create_request(cloud: &SimulatedCloud, request_id: &str, consumer: bool) -> (OrchRequest, Vec<String>) {
    let mut port_ids = vec![cloud.add_port("provider-net")];
    let mut ports = vec![Port::provider(port_ids[0].clone())];
    if consumer {
        let id = cloud.add_port("consumer-net");
        ports.push(Port::consumer(id.clone()));
        port_ids.push(id);
    }
    let request = OrchRequest::CreateNetworkFunction {
        request_id: request_id.to_string(),
        device_data: DeviceData::new(TENANT, VENDOR, "mgmt-net").with_ports(ports),
    };
    (request, port_ids)
}

fn delete_request(request_id: &str) -> OrchRequest {
    OrchRequest::DeleteNetworkFunction {
        request_id: request_id.to_string(),
    }
}

/// Runs heartbeats until `done` holds. Returns false if it never does.
async fn run_until<F>(daemon: &mut OrchDaemon, mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..MAX_HEARTBEATS {
        if done() {
            return true;
        }
        daemon.run_once().await;
    }
    done()
}

// ============================================================================
// 1. Device Reuse Scenario
// ============================================================================

#[test]
fn test_reuse_decision_on_nearly_full_device() {
    let caps = DriverCapabilities {
        supports_hotplug: false,
        ..DriverCapabilities::default()
    };
    let cloud = Arc::new(SimulatedCloud::new());
    let manager = DeviceLifecycleManager::with_backend(caps, cloud.clone());

    let mut device_a = NetworkFunctionDevice::new("A", TENANT, VENDOR, 10);
    device_a.reserve_interfaces(9).unwrap();
    device_a.transition_to(DeviceStatus::Active).unwrap();

    let provider_only = DeviceData::new(TENANT, VENDOR, "mgmt-net").with_ports(vec![Port::provider("p1")]);
    assert_eq!(
        manager.get_device_to_reuse([&device_a], &provider_only).unwrap(),
        Some("A".to_string())
    );

    let provider = cloud.add_port("provider-net");
    let consumer = cloud.add_port("consumer-net");
    let both = DeviceData::new(TENANT, VENDOR, "mgmt-net")
        .with_ports(vec![Port::provider(provider.clone()), Port::consumer(consumer.clone())]);
    assert_eq!(manager.get_device_to_reuse([&device_a], &both).unwrap(), None);

    // No device fits, so a new one is launched with every port attached
    let created = manager.create_device(&both).unwrap();
    assert_eq!(created.interfaces_in_use, 3);
    assert_eq!(created.max_interfaces, 10);
    let interfaces = cloud.instance_interfaces(&created.id);
    assert_eq!(interfaces.len(), 3);
    assert_eq!(interfaces[1..].to_vec(), vec![provider, consumer]);
}

#[test]
fn test_reuse_refused_without_sharing() {
    let caps = DriverCapabilities {
        supports_device_sharing: false,
        ..DriverCapabilities::default()
    };
    let manager = DeviceLifecycleManager::with_backend(caps, Arc::new(SimulatedCloud::new()));
    let mut device = NetworkFunctionDevice::new("A", TENANT, VENDOR, 10);
    device.transition_to(DeviceStatus::Active).unwrap();

    let request = DeviceData::new(TENANT, VENDOR, "mgmt-net").with_ports(vec![Port::provider("p1")]);
    let err = manager.get_device_to_reuse([&device], &request).unwrap_err();
    assert!(err.is_capability());
}

// ============================================================================
// 2. Daemon-Driven Lifecycle
// ============================================================================

#[tokio::test]
async fn test_shared_device_lifecycle_through_daemon() {
    let mut s = setup(DriverCapabilities::default(), 1, 10);

    let (nf1, nf1_ports) = create_request(&s.cloud, "nf-1", true);
    s.sender.notify(nf1).unwrap();

    let cloud = s.cloud.clone();
    assert!(
        run_until(&mut s.daemon, || {
            let ids = cloud.instance_ids();
            ids.len() == 1 && cloud.instance_interfaces(&ids[0]).len() == 3
        })
        .await
    );
    let device_id = s.cloud.instance_ids()[0].clone();
    let mgmt_port = s.cloud.instance_interfaces(&device_id)[0].clone();

    // Same tenant and vendor: the running device is shared
    let (nf2, nf2_ports) = create_request(&s.cloud, "nf-2", false);
    s.sender.notify(nf2).unwrap();
    assert!(run_until(&mut s.daemon, || cloud.instance_interfaces(&device_id).len() == 4).await);
    assert_eq!(s.cloud.instance_ids(), vec![device_id.clone()]);
    assert_eq!(s.cloud.call_count(SimOperation::CreateInstance), 1);

    s.sender
        .notify(OrchRequest::ConfigureService {
            device_id: device_id.clone(),
            request: ServiceConfigRequest {
                service_type: ServiceType::Firewall,
                operation: ConfigOperation::Create,
                resource_id: "fw-1".to_string(),
                body: serde_json::json!({"rules": []}),
            },
        })
        .unwrap();
    let driver = s.driver.clone();
    assert!(run_until(&mut s.daemon, || driver.applied().len() == 1).await);
    let applied = s.driver.applied();
    assert_eq!(applied[0].device_id, device_id);
    assert_eq!(applied[0].resource_id, "fw-1");

    // First delete only unplugs; the device still serves nf-2
    s.sender.notify(delete_request("nf-1")).unwrap();
    assert!(run_until(&mut s.daemon, || cloud.instance_interfaces(&device_id).len() == 2).await);
    assert!(s.cloud.has_instance(&device_id));

    s.sender.notify(delete_request("nf-2")).unwrap();
    assert!(run_until(&mut s.daemon, || cloud.instance_count() == 0).await);

    // Owned mgmt port is gone, borrowed tenant ports survive
    assert!(s.cloud.deleted_ports().contains(&mgmt_port));
    for port in nf1_ports.iter().chain(nf2_ports.iter()) {
        assert!(s.cloud.has_port(port));
    }
}

#[tokio::test]
async fn test_no_sharing_launches_one_device_per_function() {
    let caps = DriverCapabilities {
        supports_device_sharing: false,
        ..DriverCapabilities::default()
    };
    let mut s = setup(caps, 0, 10);

    for id in ["nf-1", "nf-2"] {
        let (request, _) = create_request(&s.cloud, id, false);
        s.sender.notify(request).unwrap();
    }

    let cloud = s.cloud.clone();
    assert!(
        run_until(&mut s.daemon, || {
            let ids = cloud.instance_ids();
            ids.len() == 2 && ids.iter().all(|id| cloud.instance_interfaces(id).len() == 2)
        })
        .await
    );
}

#[tokio::test]
async fn test_failed_launch_leaves_nothing_behind() {
    let mut s = setup(DriverCapabilities::default(), 0, 10);
    s.cloud.fail(SimOperation::CreateInstance);

    let (request, _) = create_request(&s.cloud, "nf-1", false);
    let ports_before = s.cloud.port_count();
    s.sender.notify(request).unwrap();

    let cloud = s.cloud.clone();
    assert!(run_until(&mut s.daemon, || cloud.call_count(SimOperation::CreateInstance) == 1).await);
    s.daemon.run_once().await;

    assert_eq!(s.cloud.instance_count(), 0);
    // The mgmt port was created and rolled back
    assert_eq!(s.cloud.port_count(), ports_before);
    assert_eq!(s.cloud.call_count(SimOperation::DeletePort), 1);
}

// ============================================================================
// 3. Event Loop and Shutdown
// ============================================================================

#[tokio::test]
async fn test_daemon_run_stops_on_cancel() {
    let mut s = setup(DriverCapabilities::default(), 2, 5);
    let (request, _) = create_request(&s.cloud, "nf-1", true);
    s.sender.notify(request).unwrap();

    let shutdown = CancellationToken::new();
    let canceller = shutdown.clone();
    let cloud = s.cloud.clone();
    tokio::spawn(async move {
        loop {
            let ids = cloud.instance_ids();
            if ids.len() == 1 && cloud.instance_interfaces(&ids[0]).len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        canceller.cancel();
    });

    tokio::time::timeout(Duration::from_secs(10), s.daemon.run(shutdown))
        .await
        .expect("daemon did not stop");

    assert!(!s.daemon.is_running());
    assert_eq!(s.cloud.instance_count(), 1);
}

// ============================================================================
// 4. Shipped Demo Inputs
// ============================================================================

#[test]
fn test_demo_inputs_parse() {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/demos");

    let config = OrchestratorConfig::load(format!("{}/config.yaml", dir)).unwrap();
    assert_eq!(config.daemon.heartbeat_interval_ms, 500);
    assert_eq!(config.device_orch.executor_workers, 8);
    assert_eq!(config.vendors, vec!["vyos".to_string(), "haproxy".to_string()]);

    let contents = std::fs::read_to_string(format!("{}/requests.json", dir)).unwrap();
    let requests: Vec<OrchRequest> = serde_json::from_str(&contents).unwrap();
    assert_eq!(requests.len(), 3);
    match &requests[0] {
        OrchRequest::CreateNetworkFunction {
            request_id,
            device_data,
        } => {
            assert_eq!(request_id, "chain-web-fw");
            assert_eq!(device_data.placement_key(), "tenant-a:vyos");
            assert_eq!(device_data.ports.len(), 2);
        }
        other => panic!("unexpected request {:?}", other),
    }
}
