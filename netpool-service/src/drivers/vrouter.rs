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

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::VRouterDriverConfig;
use crate::drivers::{Driver, DriverError};
use crate::model::{NewResource, Resource, ResourceStatus};

const INSTANCE_ID_LENGTH: usize = 36;

/// Driver for virtual router instances booted through a provisioner REST API.
///
/// `init` is the long-running operation: it creates an instance, polls the
/// provisioner until the instance is active, then waits for the router's own
/// management port to answer before declaring the resource healthy.
pub struct VRouterDriver {
    config: VRouterDriverConfig,
    client: reqwest::Client,
}

impl VRouterDriver {
    pub fn new(config: VRouterDriverConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");
        Self { config, client }
    }

    fn provisioner_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_url.as_str().trim_end_matches('/'),
            path
        )
    }

    fn management_url(&self, address: &str, path: &str) -> String {
        format!("http://{}:{}/{}", address, self.config.api_port, path)
    }

    fn instance_id(resource: &Resource) -> Option<String> {
        resource
            .data
            .get("instance_id")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }

    fn address(resource: &Resource) -> Result<String, DriverError> {
        resource
            .data
            .get("address")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| DriverError::Unreachable("resource has no address".to_string()))
    }

    async fn wait_for_active(&self, instance_id: &str) -> Result<String, DriverError> {
        let deadline = Instant::now() + self.config.spawn_timeout;
        loop {
            let response = self
                .client
                .get(self.provisioner_url(&format!("v1/instances/{}", instance_id)))
                .send()
                .await;
            if let Ok(response) = response {
                if let Ok(instance) = response.json::<Value>().await {
                    match instance.get("status").and_then(Value::as_str) {
                        Some("ACTIVE") => {
                            return instance
                                .get("address")
                                .and_then(Value::as_str)
                                .map(|s| s.to_string())
                                .ok_or_else(|| {
                                    DriverError::Provisioning(
                                        "active instance has no address".to_string(),
                                    )
                                });
                        }
                        Some("ERROR") => {
                            return Err(DriverError::Provisioning(format!(
                                "instance {} failed to launch",
                                instance_id
                            )));
                        }
                        _ => {}
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout(format!(
                    "instance {} did not become active",
                    instance_id
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn wait_for_boot(&self, address: &str) -> Result<(), DriverError> {
        let deadline = Instant::now() + self.config.boot_timeout;
        while !self.probe(address).await {
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout(format!(
                    "router at {} did not finish booting",
                    address
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Ok(())
    }

    /// A router that answers on its management port is considered alive,
    /// including an authentication challenge.
    async fn probe(&self, address: &str) -> bool {
        match self
            .client
            .get(self.management_url(address, "v1/router"))
            .send()
            .await
        {
            Ok(response) => {
                response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Driver for VRouterDriver {
    fn class(&self) -> &str {
        "network.router"
    }

    async fn init(&self, resource: &mut Resource) -> Result<(), DriverError> {
        if resource.status != ResourceStatus::Stopped {
            return Ok(());
        }

        let name = format!("vrouter-{}", &Uuid::new_v4().simple().to_string()[..12]);
        debug!("Launching router instance {}", name);
        let instance: Value = self
            .client
            .post(self.provisioner_url("v1/instances"))
            .json(&json!({
                "name": name,
                "image_id": self.config.image_id,
                "flavor": self.config.flavor,
                "network_id": self.config.management_network_id,
            }))
            .send()
            .await
            .map_err(|e| DriverError::Provisioning(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Provisioning(e.to_string()))?
            .json()
            .await
            .map_err(|e| DriverError::Provisioning(e.to_string()))?;

        let instance_id = instance
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Provisioning("provisioner returned no id".to_string()))?
            .to_string();

        let address = self.wait_for_active(&instance_id).await?;

        let mut data = resource.data_object();
        data.insert("instance_id".to_string(), json!(instance_id));
        data.insert("address".to_string(), json!(address));
        resource.data = Value::Object(data);

        self.wait_for_boot(&address).await
    }

    async fn stop(&self, resource: &Resource) -> Result<(), DriverError> {
        let Some(instance_id) = Self::instance_id(resource) else {
            return Ok(());
        };
        let response = self
            .client
            .delete(self.provisioner_url(&format!("v1/instances/{}", instance_id)))
            .send()
            .await
            .map_err(|e| DriverError::Internal(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .map_err(|e| DriverError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn wipe(&self, resource: &Resource) -> Result<(), DriverError> {
        let address = Self::address(resource)?;
        self.client
            .post(self.management_url(&address, "v1/router/reset"))
            .send()
            .await
            .map_err(|e| DriverError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn check(&self, resource: &Resource) -> Result<(), DriverError> {
        if resource.status != ResourceStatus::Started {
            return Ok(());
        }
        let address = Self::address(resource)?;
        IpAddr::from_str(&address)
            .map_err(|e| DriverError::Validation(format!("invalid address: {}", e)))?;
        if !self.probe(&address).await {
            return Err(DriverError::Unreachable(format!(
                "failed to connect to router at {}",
                address
            )));
        }
        Ok(())
    }

    fn validate(&self, values: &serde_json::Map<String, Value>) -> Result<(), DriverError> {
        let address = values
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Validation("address missing".to_string()))?;
        IpAddr::from_str(address)
            .map_err(|e| DriverError::Validation(format!("invalid address: {}", e)))?;
        let instance_id = values
            .get("instance_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DriverError::Validation("router instance UUID (instance_id) missing".to_string())
            })?;
        if instance_id.len() != INSTANCE_ID_LENGTH {
            return Err(DriverError::Validation(
                "instance_id is not a UUID".to_string(),
            ));
        }
        Ok(())
    }

    fn schema(&self) -> Value {
        json!({
            "title": "Virtual router resource object JSON schema.",
            "type": "object",
            "properties": {
                "address": { "type": "string", "format": "ip-address" },
                "instance_id": {
                    "type": "string",
                    "minLength": INSTANCE_ID_LENGTH,
                    "maxLength": INSTANCE_ID_LENGTH
                }
            }
        })
    }

    fn prepare(
        &self,
        status: ResourceStatus,
        values: Option<serde_json::Map<String, Value>>,
    ) -> Result<NewResource, DriverError> {
        match values {
            Some(values) => Ok(NewResource::new(self.class())
                .status(status)
                .data(values)),
            None if status == ResourceStatus::Stopped => {
                Ok(NewResource::new(self.class()).status(ResourceStatus::Stopped))
            }
            None => Err(DriverError::NotSupported),
        }
    }
}
