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

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use test_r::test;
use uuid::Uuid;

use netpool_service::drivers::fake::FakeDriver;
use netpool_service::model::{ResourceFilters, ResourceSearch, ResourceStatus, ResourceUpdate};
use netpool_service::queue::TaskQueue;
use netpool_service::reaper::Reaper;
use netpool_service::repo::resource::ResourceRepo;
use netpool_service::service::{ResourceError, ResourceService};
use netpool_service::worker::TaskWorker;

mod common;

use common::{create_resource, drain_queue, fake_registry, resource_repo, SqliteDb};

test_r::enable!();

struct Fixture {
    repo: Arc<dyn ResourceRepo + Send + Sync>,
    driver: Arc<FakeDriver>,
    queue: Arc<TaskQueue>,
    worker: TaskWorker,
    service: ResourceService,
    _db: SqliteDb,
}

impl Fixture {
    async fn new() -> Self {
        let db = SqliteDb::new().await;
        let repo = resource_repo(&db);
        let (registry, driver) = fake_registry();
        let queue = Arc::new(TaskQueue::new(repo.clone(), 1024));
        let worker = TaskWorker::new(
            queue.clone(),
            registry.clone(),
            repo.clone(),
            Duration::from_millis(50),
        );
        let service = ResourceService::new(repo.clone(), registry, queue.clone());
        Self {
            repo,
            driver,
            queue,
            worker,
            service,
            _db: db,
        }
    }
}

fn valid_values() -> serde_json::Map<String, serde_json::Value> {
    json!({
        "address": "10.0.0.1",
        "instance_id": Uuid::new_v4().to_string(),
    })
    .as_object()
    .unwrap()
    .clone()
}

#[test]
async fn add_creates_validated_resource_in_started() {
    let fixture = Fixture::new().await;

    let resource = fixture
        .service
        .add("fake", Some("edge router".to_string()), valid_values())
        .await
        .unwrap();

    assert_eq!(resource.driver, "fake");
    assert_eq!(resource.class, "network.router");
    assert_eq!(resource.status, ResourceStatus::Started);
    assert_eq!(resource.description, Some("edge router".to_string()));
    assert_eq!(resource.data.get("address"), Some(&json!("10.0.0.1")));
    assert!(!resource.allocated);
    assert!(!resource.processing);
}

#[test]
async fn add_rejects_invalid_values() {
    let fixture = Fixture::new().await;

    let result = fixture
        .service
        .add(
            "fake",
            None,
            json!({"address": "not-an-ip"}).as_object().unwrap().clone(),
        )
        .await;
    assert!(matches!(result, Err(ResourceError::InvalidRequest(_))));
}

#[test]
async fn add_rejects_unknown_driver() {
    let fixture = Fixture::new().await;

    let result = fixture.service.add("missing", None, valid_values()).await;
    assert!(matches!(result, Err(ResourceError::UnknownDriver(name)) if name == "missing"));
}

#[test]
async fn allocate_takes_resource_out_of_its_pool() {
    let fixture = Fixture::new().await;
    let resource = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;
    fixture
        .repo
        .update(
            &resource.id,
            &ResourceUpdate::new().pool(Some("fake".to_string())),
        )
        .await
        .unwrap();

    let allocated = fixture.service.allocate(&resource.id).await.unwrap();
    assert!(allocated.allocated);
    assert_eq!(allocated.pool, None);
    assert!(!allocated.processing);
}

#[test]
async fn allocate_conflicts_are_reported_precisely() {
    let fixture = Fixture::new().await;

    let busy = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;
    fixture
        .repo
        .update(&busy.id, &ResourceUpdate::new().processing(true))
        .await
        .unwrap();
    assert!(matches!(
        fixture.service.allocate(&busy.id).await,
        Err(ResourceError::Processing(_))
    ));

    let taken = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;
    fixture.service.allocate(&taken.id).await.unwrap();
    assert!(matches!(
        fixture.service.allocate(&taken.id).await,
        Err(ResourceError::Allocated(_))
    ));

    assert!(matches!(
        fixture.service.allocate(&Uuid::new_v4()).await,
        Err(ResourceError::NotFound(_))
    ));
}

#[test]
async fn deallocate_schedules_a_wipe() {
    let fixture = Fixture::new().await;
    let resource = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;
    fixture.service.allocate(&resource.id).await.unwrap();

    fixture.service.deallocate(&resource.id).await.unwrap();
    let wiping = fixture.repo.get(&resource.id).await.unwrap();
    assert_eq!(wiping.status, ResourceStatus::Wiping);
    assert!(wiping.processing);
    assert!(!wiping.allocated);

    drain_queue(&fixture.queue, &fixture.worker).await;

    let wiped = fixture.repo.get(&resource.id).await.unwrap();
    assert_eq!(wiped.status, ResourceStatus::Started);
    assert!(!wiped.processing);
    assert_eq!(fixture.driver.wipe_calls(), 1);
}

#[test]
async fn deallocate_in_wrong_status_is_a_conflict_and_rolls_back() {
    let fixture = Fixture::new().await;
    let resource = create_resource(&fixture.repo, "fake", ResourceStatus::Error).await;

    let result = fixture.service.deallocate(&resource.id).await;
    assert!(matches!(result, Err(ResourceError::Conflict(_))));

    let rolled_back = fixture.repo.get(&resource.id).await.unwrap();
    assert!(!rolled_back.processing);
    assert_eq!(rolled_back.status, ResourceStatus::Error);
    assert!(fixture.queue.is_empty());
}

#[test]
async fn delete_refuses_started_resources() {
    let fixture = Fixture::new().await;
    let resource = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;

    let result = fixture.service.delete(&resource.id, false).await;
    assert!(matches!(result, Err(ResourceError::Conflict(_))));

    let rolled_back = fixture.repo.get(&resource.id).await.unwrap();
    assert!(!rolled_back.processing);
    assert_eq!(rolled_back.status, ResourceStatus::Started);
}

#[test]
async fn delete_refuses_allocated_and_processing_resources() {
    let fixture = Fixture::new().await;

    let allocated = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;
    fixture.service.allocate(&allocated.id).await.unwrap();
    assert!(matches!(
        fixture.service.delete(&allocated.id, false).await,
        Err(ResourceError::Allocated(_))
    ));

    let busy = create_resource(&fixture.repo, "fake", ResourceStatus::Stopped).await;
    fixture
        .repo
        .update(&busy.id, &ResourceUpdate::new().processing(true))
        .await
        .unwrap();
    assert!(matches!(
        fixture.service.delete(&busy.id, false).await,
        Err(ResourceError::Processing(_))
    ));
}

#[test]
async fn delete_of_failed_resource_ends_with_removal() {
    let fixture = Fixture::new().await;
    let resource = create_resource(&fixture.repo, "fake", ResourceStatus::Error).await;

    fixture.service.delete(&resource.id, false).await.unwrap();
    let deleting = fixture.repo.get(&resource.id).await.unwrap();
    assert_eq!(deleting.status, ResourceStatus::Deleting);

    drain_queue(&fixture.queue, &fixture.worker).await;
    let deleted = fixture.repo.get(&resource.id).await.unwrap();
    assert_eq!(deleted.status, ResourceStatus::Deleted);

    let reaper = Reaper::new(fixture.repo.clone(), Duration::from_secs(30));
    reaper.sweep().await.unwrap();
    assert!(matches!(
        fixture.service.get(&resource.id).await,
        Err(ResourceError::NotFound(_))
    ));
}

#[test]
async fn list_isolates_paging_from_filters() {
    let fixture = Fixture::new().await;
    for _ in 0..3 {
        fixture
            .service
            .add("fake", None, valid_values())
            .await
            .unwrap();
    }

    let search = ResourceSearch {
        filters: ResourceFilters {
            driver: Some("fake".to_string()),
            ..Default::default()
        },
        limit: Some(2),
        offset: None,
    };
    assert_eq!(fixture.service.list(&search).await.unwrap().len(), 2);

    let all = ResourceSearch::filtered(ResourceFilters {
        driver: Some("fake".to_string()),
        ..Default::default()
    });
    assert_eq!(fixture.service.list(&all).await.unwrap().len(), 3);
}

#[test]
async fn schema_and_driver_names_come_from_the_registry() {
    let fixture = Fixture::new().await;

    assert_eq!(fixture.service.driver_names(), vec!["fake".to_string()]);
    let schema = fixture.service.schema("fake").unwrap();
    assert!(schema.get("properties").is_some());
    assert!(matches!(
        fixture.service.schema("missing"),
        Err(ResourceError::UnknownDriver(_))
    ));
}

#[test]
async fn allocate_and_stop_race_has_a_single_winner() {
    let fixture = Fixture::new().await;
    let resource = create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;

    // a balancer deciding to stop the resource races a tenant allocating it
    let (stopped, allocated) = tokio::join!(
        fixture
            .queue
            .push(netpool_service::tasks::Task::stop(resource.clone())),
        fixture.service.allocate(&resource.id)
    );

    assert_eq!(
        stopped.is_ok() as u8 + allocated.is_ok() as u8,
        1,
        "exactly one side of the race must win"
    );

    let settled = fixture.repo.get(&resource.id).await.unwrap();
    if stopped.is_ok() {
        assert_eq!(settled.status, ResourceStatus::Stopping);
        assert!(settled.processing);
        assert!(!settled.allocated);
    } else {
        assert!(settled.allocated);
        assert_eq!(settled.status, ResourceStatus::Started);
        assert!(!settled.processing);
    }
}
