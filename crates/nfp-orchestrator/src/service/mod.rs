//! Vendor service configuration.
//!
//! Once an appliance is up, firewall/load balancer/VPN resources are pushed
//! to it through a vendor driver. Each capability has its own closed driver
//! trait; a vendor registers the subset it implements in a [`VendorDrivers`]
//! set and [`ServiceConfigurator`] dispatches on
//! ([`ServiceType`], [`ConfigOperation`]).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Kind of service resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Firewall,
    LoadBalancer,
    Vpn,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Firewall => write!(f, "firewall"),
            ServiceType::LoadBalancer => write!(f, "load_balancer"),
            ServiceType::Vpn => write!(f, "vpn"),
        }
    }
}

/// Operation applied to a service resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOperation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ConfigOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOperation::Create => write!(f, "create"),
            ConfigOperation::Update => write!(f, "update"),
            ConfigOperation::Delete => write!(f, "delete"),
        }
    }
}

/// A configuration request for one resource on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfigRequest {
    pub service_type: ServiceType,
    pub operation: ConfigOperation,
    pub resource_id: String,
    /// Vendor-agnostic resource description
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Appliance a request is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTarget {
    pub device_id: String,
    pub service_vendor: String,
    pub mgmt_ip_address: String,
}

/// Error returned by service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceConfigError {
    #[error("No drivers registered for vendor {0}")]
    UnknownVendor(String),

    #[error("Vendor {vendor} does not support {service_type}")]
    UnsupportedService {
        vendor: String,
        service_type: ServiceType,
    },

    #[error("{service_type} {operation} of {resource_id} failed: {message}")]
    Driver {
        service_type: ServiceType,
        operation: ConfigOperation,
        resource_id: String,
        message: String,
    },
}

impl ServiceConfigError {
    /// Creates a driver failure.
    pub fn driver(
        service_type: ServiceType,
        operation: ConfigOperation,
        resource_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Driver {
            service_type,
            operation,
            resource_id: resource_id.into(),
            message: message.into(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceConfigError>;

/// Firewall configuration on an appliance.
pub trait FirewallDriver: Send + Sync {
    fn create_firewall(&self, target: &ConfigTarget, firewall_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
    fn update_firewall(&self, target: &ConfigTarget, firewall_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
    fn delete_firewall(&self, target: &ConfigTarget, firewall_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
}

/// Load balancer configuration on an appliance.
pub trait LoadBalancerDriver: Send + Sync {
    fn create_load_balancer(&self, target: &ConfigTarget, lb_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
    fn update_load_balancer(&self, target: &ConfigTarget, lb_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
    fn delete_load_balancer(&self, target: &ConfigTarget, lb_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
}

/// VPN configuration on an appliance.
pub trait VpnDriver: Send + Sync {
    fn create_vpn_service(&self, target: &ConfigTarget, vpn_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
    fn update_vpn_service(&self, target: &ConfigTarget, vpn_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
    fn delete_vpn_service(&self, target: &ConfigTarget, vpn_id: &str, body: &serde_json::Value)
        -> ServiceResult<()>;
}

/// Drivers one vendor provides.
#[derive(Clone, Default)]
pub struct VendorDrivers {
    pub firewall: Option<Arc<dyn FirewallDriver>>,
    pub load_balancer: Option<Arc<dyn LoadBalancerDriver>>,
    pub vpn: Option<Arc<dyn VpnDriver>>,
}

impl VendorDrivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_firewall(mut self, driver: Arc<dyn FirewallDriver>) -> Self {
        self.firewall = Some(driver);
        self
    }

    pub fn with_load_balancer(mut self, driver: Arc<dyn LoadBalancerDriver>) -> Self {
        self.load_balancer = Some(driver);
        self
    }

    pub fn with_vpn(mut self, driver: Arc<dyn VpnDriver>) -> Self {
        self.vpn = Some(driver);
        self
    }

    /// Returns true if a driver for `service_type` is registered.
    pub fn supports(&self, service_type: ServiceType) -> bool {
        match service_type {
            ServiceType::Firewall => self.firewall.is_some(),
            ServiceType::LoadBalancer => self.load_balancer.is_some(),
            ServiceType::Vpn => self.vpn.is_some(),
        }
    }
}

impl fmt::Debug for VendorDrivers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorDrivers")
            .field("firewall", &self.firewall.is_some())
            .field("load_balancer", &self.load_balancer.is_some())
            .field("vpn", &self.vpn.is_some())
            .finish()
    }
}

/// Dispatches service configuration to the vendor's drivers.
#[derive(Debug, Default)]
pub struct ServiceConfigurator {
    vendors: HashMap<String, VendorDrivers>,
}

impl ServiceConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the drivers of a vendor.
    pub fn register_vendor(&mut self, vendor: impl Into<String>, drivers: VendorDrivers) {
        let vendor = vendor.into();
        debug!(vendor = %vendor, ?drivers, "Registering vendor drivers");
        self.vendors.insert(vendor, drivers);
    }

    /// Returns the registered vendor names.
    pub fn vendors(&self) -> impl Iterator<Item = &str> {
        self.vendors.keys().map(|v| v.as_str())
    }

    /// Applies `request` to the appliance described by `target`.
    pub fn configure(&self, target: &ConfigTarget, request: &ServiceConfigRequest) -> ServiceResult<()> {
        let drivers = self
            .vendors
            .get(&target.service_vendor)
            .ok_or_else(|| ServiceConfigError::UnknownVendor(target.service_vendor.clone()))?;
        let unsupported = || ServiceConfigError::UnsupportedService {
            vendor: target.service_vendor.clone(),
            service_type: request.service_type,
        };

        let id = request.resource_id.as_str();
        let body = &request.body;
        let result = match request.service_type {
            ServiceType::Firewall => {
                let driver = drivers.firewall.as_ref().ok_or_else(unsupported)?;
                match request.operation {
                    ConfigOperation::Create => driver.create_firewall(target, id, body),
                    ConfigOperation::Update => driver.update_firewall(target, id, body),
                    ConfigOperation::Delete => driver.delete_firewall(target, id, body),
                }
            }
            ServiceType::LoadBalancer => {
                let driver = drivers.load_balancer.as_ref().ok_or_else(unsupported)?;
                match request.operation {
                    ConfigOperation::Create => driver.create_load_balancer(target, id, body),
                    ConfigOperation::Update => driver.update_load_balancer(target, id, body),
                    ConfigOperation::Delete => driver.delete_load_balancer(target, id, body),
                }
            }
            ServiceType::Vpn => {
                let driver = drivers.vpn.as_ref().ok_or_else(unsupported)?;
                match request.operation {
                    ConfigOperation::Create => driver.create_vpn_service(target, id, body),
                    ConfigOperation::Update => driver.update_vpn_service(target, id, body),
                    ConfigOperation::Delete => driver.delete_vpn_service(target, id, body),
                }
            }
        };

        if let Err(err) = &result {
            warn!(device = %target.device_id, error = %err, "Service configuration failed");
        }
        result
    }
}
