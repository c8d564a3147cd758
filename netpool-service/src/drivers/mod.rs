// Copyright 2024 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{DriverKindConfig, DriverPoolConfig};
use crate::model::{NewResource, Resource, ResourceStatus};

pub mod fake;
pub mod vrouter;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),
    #[error("Resource validation failed: {0}")]
    Validation(String),
    #[error("Provisioning failed: {0}")]
    Provisioning(String),
    #[error("Timed out waiting for instance: {0}")]
    Timeout(String),
    #[error("Device unreachable: {0}")]
    Unreachable(String),
    #[error("Operation not supported by driver")]
    NotSupported,
    #[error("Driver error: {0}")]
    Internal(String),
}

/// Adapter that knows how to provision, stop, wipe and health-check one
/// family of resources. Drivers are stateless apart from their configuration;
/// all mutable state lives in the resource record.
#[async_trait]
pub trait Driver {
    /// Coarse resource category used for discovery (e.g. `network.router`).
    fn class(&self) -> &str;

    /// Provision and wait until healthy. May take minutes. Updates
    /// `resource.data` (address, instance id, ...).
    async fn init(&self, resource: &mut Resource) -> Result<(), DriverError>;

    /// Tear down. Idempotent on already-stopped resources.
    async fn stop(&self, resource: &Resource) -> Result<(), DriverError>;

    /// Return the resource to a pristine state without decommissioning it.
    async fn wipe(&self, resource: &Resource) -> Result<(), DriverError>;

    /// Health probe; fails when the device is unreachable.
    async fn check(&self, resource: &Resource) -> Result<(), DriverError>;

    /// Shape-check user-supplied fields at add time.
    fn validate(&self, values: &serde_json::Map<String, Value>) -> Result<(), DriverError>;

    /// Descriptor clients use to build valid inputs.
    fn schema(&self) -> Value;

    /// Materialize the non-persistent fields of a new resource in the
    /// requested initial state. Without values only a `STOPPED` shell can be
    /// prepared (auto-provisioning); with values a pre-provisioned instance
    /// is registered in the given state.
    fn prepare(
        &self,
        status: ResourceStatus,
        values: Option<serde_json::Map<String, Value>>,
    ) -> Result<NewResource, DriverError>;
}

/// Compile-time registry binding configured driver names to driver
/// implementations selected by the `driver` kind tag in the config.
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver + Send + Sync>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn from_config(drivers: &HashMap<String, DriverPoolConfig>) -> Self {
        let mut registry = Self::new();
        for (name, config) in drivers {
            let driver: Arc<dyn Driver + Send + Sync> = match &config.driver {
                DriverKindConfig::Fake(config) => Arc::new(fake::FakeDriver::new(config.clone())),
                DriverKindConfig::VRouter(config) => {
                    Arc::new(vrouter::VRouterDriver::new(config.clone()))
                }
            };
            registry.register(name, driver);
        }
        registry
    }

    pub fn register(&mut self, name: &str, driver: Arc<dyn Driver + Send + Sync>) {
        self.drivers.insert(name.to_string(), driver);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Driver + Send + Sync>, DriverError> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::UnknownDriver(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
