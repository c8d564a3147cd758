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
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::FakeDriverConfig;
use crate::drivers::{Driver, DriverError};
use crate::model::{NewResource, Resource, ResourceStatus};

/// Driver for local development and tests: no external system is touched,
/// instances are synthesized in memory. Failure injection flags make the
/// worker failure paths reachable from tests.
pub struct FakeDriver {
    config: FakeDriverConfig,
    fail_init: AtomicBool,
    fail_stop: AtomicBool,
    fail_wipe: AtomicBool,
    fail_check: AtomicBool,
    init_calls: AtomicU64,
    stop_calls: AtomicU64,
    wipe_calls: AtomicU64,
}

impl FakeDriver {
    pub fn new(config: FakeDriverConfig) -> Self {
        Self {
            config,
            fail_init: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_wipe: AtomicBool::new(false),
            fail_check: AtomicBool::new(false),
            init_calls: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
            wipe_calls: AtomicU64::new(0),
        }
    }

    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_wipe(&self, fail: bool) {
        self.fail_wipe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_check(&self, fail: bool) {
        self.fail_check.store(fail, Ordering::SeqCst);
    }

    pub fn init_calls(&self) -> u64 {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn wipe_calls(&self) -> u64 {
        self.wipe_calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new(FakeDriverConfig::default())
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn class(&self) -> &str {
        &self.config.class
    }

    async fn init(&self, resource: &mut Resource) -> Result<(), DriverError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(DriverError::Provisioning(
                "fake driver configured to fail init".to_string(),
            ));
        }
        let mut data = resource.data_object();
        data.insert("address".to_string(), json!("127.0.0.1"));
        data.insert("instance_id".to_string(), json!(Uuid::new_v4().to_string()));
        resource.data = Value::Object(data);
        Ok(())
    }

    async fn stop(&self, _resource: &Resource) -> Result<(), DriverError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(DriverError::Internal(
                "fake driver configured to fail stop".to_string(),
            ));
        }
        Ok(())
    }

    async fn wipe(&self, _resource: &Resource) -> Result<(), DriverError> {
        self.wipe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_wipe.load(Ordering::SeqCst) {
            return Err(DriverError::Internal(
                "fake driver configured to fail wipe".to_string(),
            ));
        }
        Ok(())
    }

    async fn check(&self, _resource: &Resource) -> Result<(), DriverError> {
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(DriverError::Unreachable(
                "fake driver configured to fail check".to_string(),
            ));
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
        if !values.contains_key("instance_id") {
            return Err(DriverError::Validation(
                "instance UUID (instance_id) missing".to_string(),
            ));
        }
        Ok(())
    }

    fn schema(&self) -> Value {
        json!({
            "title": "Fake resource object JSON schema.",
            "type": "object",
            "properties": {
                "address": { "type": "string", "format": "ip-address" },
                "instance_id": { "type": "string", "minLength": 36, "maxLength": 36 }
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

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    fn resource() -> Resource {
        Resource {
            id: Uuid::new_v4(),
            driver: "fake".to_string(),
            class: "network.router".to_string(),
            status: ResourceStatus::Stopped,
            pool: None,
            processing: true,
            allocated: false,
            deleted: false,
            description: None,
            data: json!({}),
        }
    }

    #[test]
    async fn init_fills_instance_data() {
        let driver = FakeDriver::default();
        let mut resource = resource();
        driver.init(&mut resource).await.unwrap();
        let data = resource.data_object();
        assert!(data.contains_key("address"));
        assert!(data.contains_key("instance_id"));
        assert_eq!(driver.init_calls(), 1);
    }

    #[test]
    async fn injected_failures_surface() {
        let driver = FakeDriver::default();
        driver.fail_init(true);
        let mut resource = resource();
        assert!(driver.init(&mut resource).await.is_err());
        driver.fail_stop(true);
        assert!(driver.stop(&resource).await.is_err());
    }

    #[test]
    async fn check_reports_unreachable_devices() {
        let driver = FakeDriver::default();
        let resource = resource();
        assert!(driver.check(&resource).await.is_ok());
        driver.fail_check(true);
        assert!(matches!(
            driver.check(&resource).await,
            Err(DriverError::Unreachable(_))
        ));
    }

    #[test]
    fn validate_requires_address_and_instance_id() {
        let driver = FakeDriver::default();
        let mut values = serde_json::Map::new();
        assert!(driver.validate(&values).is_err());

        values.insert("address".to_string(), json!("not-an-ip"));
        values.insert("instance_id".to_string(), json!("x"));
        assert!(driver.validate(&values).is_err());

        values.insert("address".to_string(), json!("10.0.0.1"));
        assert!(driver.validate(&values).is_ok());
    }

    #[test]
    fn prepare_without_values_only_supports_stopped() {
        let driver = FakeDriver::default();
        let prepared = driver.prepare(ResourceStatus::Stopped, None).unwrap();
        assert_eq!(prepared.status, ResourceStatus::Stopped);
        assert!(matches!(
            driver.prepare(ResourceStatus::Started, None),
            Err(DriverError::NotSupported)
        ));
    }
}
