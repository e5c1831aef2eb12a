//! nfp-orchestrator entry point.
//!
//! Runs the orchestrator against the in-memory simulated cloud. Requests
//! are read from a JSON file and injected before the event loop starts.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nfp_orchestrator::audit::{init_logging, init_logging_pretty};
use nfp_orchestrator::backend::{LoggingServiceDriver, SimulatedCloud};
use nfp_orchestrator::config::OrchestratorConfig;
use nfp_orchestrator::daemon::OrchDaemon;
use nfp_orchestrator::device::{DeviceLifecycleManager, DeviceOrch, NetworkPolicy, OrchRequest};
use nfp_orchestrator::service::{ServiceConfigurator, VendorDrivers};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Network function device orchestrator
#[derive(Parser, Debug)]
#[command(name = "nfp-orchestrator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// JSON file holding a list of requests to inject at startup
    #[arg(short = 'r', long)]
    requests: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    pretty_logs: bool,

    /// Heartbeat interval in milliseconds (overrides the config file)
    #[arg(long)]
    heartbeat_interval: Option<u64>,

    /// Status polls a simulated instance spends booting
    #[arg(long, default_value = "2")]
    boot_polls: u32,

    /// Disable interface hot-plug
    #[arg(long)]
    no_hotplug: bool,

    /// Disable device sharing
    #[arg(long)]
    no_sharing: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.pretty_logs {
        init_logging_pretty(&args.log_level);
    } else {
        init_logging(&args.log_level);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("nfp-orchestrator failed: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    info!("====================================================================");
    info!("Starting nfp-orchestrator (simulated cloud)");
    info!("====================================================================");
    info!("Heartbeat interval: {}ms", config.daemon.heartbeat_interval_ms);
    info!("Device sharing: {}", config.driver.supports_device_sharing);
    info!("Interface hot-plug: {}", config.driver.supports_hotplug);
    info!("Max interfaces per device: {}", config.driver.max_interfaces);
    info!("Vendors: {}", config.vendors.join(", "));

    let requests = match &args.requests {
        Some(path) => read_requests(path)?,
        None => Vec::new(),
    };

    let cloud = Arc::new(SimulatedCloud::with_boot_polls(args.boot_polls));
    seed_ports(&cloud, &requests);

    let manager = Arc::new(DeviceLifecycleManager::with_backend(config.driver.clone(), cloud.clone()));

    let service_driver = Arc::new(LoggingServiceDriver::new());
    let mut configurator = ServiceConfigurator::new();
    for vendor in &config.vendors {
        configurator.register_vendor(
            vendor.clone(),
            VendorDrivers::new()
                .with_firewall(service_driver.clone())
                .with_load_balancer(service_driver.clone())
                .with_vpn(service_driver.clone()),
        );
    }

    let device_orch = DeviceOrch::new(config.device_orch.clone(), manager, Arc::new(configurator));
    info!("Injecting {} request(s)", requests.len());
    for request in requests {
        if let Err(err) = device_orch.submit(request) {
            warn!(error = %err, "Dropping request");
        }
    }

    let mut daemon = OrchDaemon::new(config.daemon.clone());
    daemon.register_orch(Box::new(device_orch));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    let signal_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, shutting down gracefully...");
                signal_token.cancel();
            }
            Err(err) => {
                error!("Failed to listen for ctrl-c: {}", err);
            }
        }
    });

    daemon.run(shutdown).await;
    signal_handle.abort();

    info!("Simulated cloud at shutdown: {:?}", cloud);
    info!("Service configurations applied: {}", service_driver.applied().len());
    info!("====================================================================");
    info!("nfp-orchestrator shutdown complete");
    info!("====================================================================");

    Ok(())
}

fn load_config(args: &Args) -> Result<OrchestratorConfig> {
    let mut config = match &args.config {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };

    if let Some(interval) = args.heartbeat_interval {
        config.daemon.heartbeat_interval_ms = interval;
    }
    if args.no_hotplug {
        config.driver.supports_hotplug = false;
    }
    if args.no_sharing {
        config.driver.supports_device_sharing = false;
    }

    config.validate().context("validating configuration")?;
    Ok(config)
}

fn read_requests(path: &Path) -> Result<Vec<OrchRequest>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading requests from {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing requests in {}", path.display()))
}

/// Creates the tenant ports the requests refer to.
fn seed_ports(cloud: &SimulatedCloud, requests: &[OrchRequest]) {
    for request in requests {
        let OrchRequest::CreateNetworkFunction { device_data, .. } = request else {
            continue;
        };
        let network = format!("{}-data", device_data.tenant_id);
        for port in &device_data.ports {
            match port.policy {
                NetworkPolicy::Neutron => cloud.seed_port(&port.id, &network),
                NetworkPolicy::Gbp => cloud.seed_policy_target(&port.id, &network),
            };
        }
    }
}
