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
use std::time::Duration;

use poem::http::StatusCode;
use poem::test::TestClient;
use serde_json::json;
use test_r::test;
use uuid::Uuid;

use netpool_service::api;
use netpool_service::api::drivers::DriversResponse;
use netpool_service::api::meta::{ApiVersionsResponse, CollectionsResponse};
use netpool_service::api::resources::{ResourceResponse, ResourcesResponse};
use netpool_service::config::{
    DbConfig, DriverKindConfig, DriverPoolConfig, FakeDriverConfig, PoolServiceConfig,
};
use netpool_service::model::{ResourceStatus, ResourceUpdate};
use netpool_service::repo::resource::ResourceRepo;
use netpool_service::service::Services;

mod common;

use common::{create_resource, resource_repo, SqliteDb};

test_r::enable!();

struct Fixture {
    repo: Arc<dyn ResourceRepo + Send + Sync>,
    client: TestClient<poem::Route>,
    _db: SqliteDb,
}

impl Fixture {
    /// A service wired to a fresh database, with the background loops already
    /// shut down so the tests observe exactly the states the API produces.
    async fn new() -> Self {
        let db = SqliteDb::new().await;
        let config = PoolServiceConfig {
            db: DbConfig::Sqlite(db.config()),
            workers_count: 1,
            task_queue_timeout: Duration::from_millis(100),
            sleep_time: Duration::from_secs(300),
            drivers: HashMap::from([(
                "fake".to_string(),
                DriverPoolConfig {
                    low_watermark: 0,
                    high_watermark: 100,
                    driver: DriverKindConfig::Fake(FakeDriverConfig::default()),
                },
            )]),
            ..Default::default()
        };
        let services = Services::new(&config).await.unwrap();
        services.shutdown().await;

        let client = TestClient::new(api::combined_routes(&services));
        Self {
            repo: resource_repo(&db),
            client,
            _db: db,
        }
    }
}

fn creation_body() -> serde_json::Value {
    json!({
        "resource": {
            "driver": "fake",
            "description": "edge router",
            "data": {
                "address": "10.0.0.1",
                "instance_id": Uuid::new_v4().to_string(),
            }
        }
    })
}

#[test]
async fn root_lists_api_versions() {
    let fixture = Fixture::new().await;

    let resp = fixture.client.get("/").send().await;
    resp.assert_status_is_ok();
    let body: ApiVersionsResponse = resp.json().await.value().deserialize();
    assert_eq!(body.versions, vec!["v1".to_string()]);

    let resp = fixture.client.get("/v1").send().await;
    resp.assert_status_is_ok();
    let body: CollectionsResponse = resp.json().await.value().deserialize();
    assert_eq!(
        body.collections,
        vec!["drivers".to_string(), "resources".to_string()]
    );
}

#[test]
async fn healthcheck_and_version_respond() {
    let fixture = Fixture::new().await;

    let resp = fixture.client.get("/healthcheck").send().await;
    resp.assert_status_is_ok();

    let resp = fixture.client.get("/version").send().await;
    resp.assert_status_is_ok();
}

#[test]
async fn drivers_are_listed_and_expose_their_schema() {
    let fixture = Fixture::new().await;

    let resp = fixture.client.get("/v1/drivers/").send().await;
    resp.assert_status_is_ok();
    let body: DriversResponse = resp.json().await.value().deserialize();
    assert_eq!(body.drivers, vec!["fake".to_string()]);

    let resp = fixture.client.get("/v1/drivers/fake").send().await;
    resp.assert_status_is_ok();

    let resp = fixture.client.get("/v1/drivers/missing").send().await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[test]
async fn resources_can_be_created_shown_and_listed() {
    let fixture = Fixture::new().await;

    let resp = fixture
        .client
        .post("/v1/resources/")
        .body_json(&creation_body())
        .send()
        .await;
    resp.assert_status_is_ok();
    let created: ResourceResponse = resp.json().await.value().deserialize();
    assert_eq!(created.resource.status, ResourceStatus::Started);
    assert_eq!(created.resource.driver, "fake");

    let resp = fixture
        .client
        .get(format!("/v1/resources/{}", created.resource.id))
        .send()
        .await;
    resp.assert_status_is_ok();
    let shown: ResourceResponse = resp.json().await.value().deserialize();
    assert_eq!(shown.resource, created.resource);

    let resp = fixture
        .client
        .get("/v1/resources/")
        .query("driver", &"fake")
        .send()
        .await;
    resp.assert_status_is_ok();
    let listed: ResourcesResponse = resp.json().await.value().deserialize();
    assert_eq!(listed.resources.len(), 1);

    let resp = fixture
        .client
        .get("/v1/resources/")
        .query("driver", &"other")
        .send()
        .await;
    resp.assert_status_is_ok();
    let listed: ResourcesResponse = resp.json().await.value().deserialize();
    assert!(listed.resources.is_empty());
}

#[test]
async fn invalid_creation_requests_are_rejected() {
    let fixture = Fixture::new().await;

    let resp = fixture
        .client
        .post("/v1/resources/")
        .body_json(&json!({
            "resource": { "driver": "fake", "data": { "address": "not-an-ip" } }
        }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let resp = fixture
        .client
        .post("/v1/resources/")
        .body_json(&json!({
            "resource": { "driver": "missing", "data": {} }
        }))
        .send()
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[test]
async fn missing_resources_return_not_found() {
    let fixture = Fixture::new().await;

    let resp = fixture
        .client
        .get(format!("/v1/resources/{}", Uuid::new_v4()))
        .send()
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);

    let resp = fixture
        .client
        .delete(format!("/v1/resources/{}", Uuid::new_v4()))
        .send()
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[test]
async fn allocation_lifecycle_via_put() {
    let fixture = Fixture::new().await;
    let resource = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;

    let resp = fixture
        .client
        .put(format!("/v1/resources/{}", resource.id))
        .body_json(&json!({ "resource": { "allocated": true } }))
        .send()
        .await;
    resp.assert_status_is_ok();
    let allocated: ResourceResponse = resp.json().await.value().deserialize();
    assert!(allocated.resource.allocated);
    assert_eq!(allocated.resource.pool, None);

    // a second allocation is a conflict
    let resp = fixture
        .client
        .put(format!("/v1/resources/{}", resource.id))
        .body_json(&json!({ "resource": { "allocated": true } }))
        .send()
        .await;
    resp.assert_status(StatusCode::CONFLICT);

    // giving it back schedules the wipe
    let resp = fixture
        .client
        .put(format!("/v1/resources/{}", resource.id))
        .body_json(&json!({ "resource": { "allocated": false } }))
        .send()
        .await;
    resp.assert_status_is_ok();
    let deallocated: ResourceResponse = resp.json().await.value().deserialize();
    assert!(!deallocated.resource.allocated);
    assert!(deallocated.resource.processing);

    let stored = fixture.repo.get(&resource.id).await.unwrap();
    assert_eq!(stored.status, ResourceStatus::Wiping);
}

#[test]
async fn put_without_allocated_field_changes_nothing() {
    let fixture = Fixture::new().await;
    let resource = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;

    let resp = fixture
        .client
        .put(format!("/v1/resources/{}", resource.id))
        .body_json(&json!({ "resource": { "status": "STOPPED" } }))
        .send()
        .await;
    resp.assert_status_is_ok();

    let stored = fixture.repo.get(&resource.id).await.unwrap();
    assert_eq!(stored.status, ResourceStatus::Started);
}

#[test]
async fn delete_schedules_teardown_or_conflicts() {
    let fixture = Fixture::new().await;

    // a started resource refuses deletion
    let started = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;
    let resp = fixture
        .client
        .delete(format!("/v1/resources/{}", started.id))
        .send()
        .await;
    resp.assert_status(StatusCode::CONFLICT);

    // a failed resource can be force-deleted
    let failed = create_resource(&fixture.repo, "fake", ResourceStatus::Error).await;
    let resp = fixture
        .client
        .delete(format!("/v1/resources/{}", failed.id))
        .query("force", &"true")
        .send()
        .await;
    resp.assert_status(StatusCode::NO_CONTENT);

    let stored = fixture.repo.get(&failed.id).await.unwrap();
    assert_eq!(stored.status, ResourceStatus::Deleting);
    assert!(stored.processing);
}

#[test]
async fn processing_resources_conflict_on_updates() {
    let fixture = Fixture::new().await;
    let busy = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;
    fixture
        .repo
        .update(&busy.id, &ResourceUpdate::new().processing(true))
        .await
        .unwrap();

    let resp = fixture
        .client
        .put(format!("/v1/resources/{}", busy.id))
        .body_json(&json!({ "resource": { "allocated": true } }))
        .send()
        .await;
    resp.assert_status(StatusCode::CONFLICT);

    let resp = fixture
        .client
        .delete(format!("/v1/resources/{}", busy.id))
        .send()
        .await;
    resp.assert_status(StatusCode::CONFLICT);
}
