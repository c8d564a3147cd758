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

use test_r::test;

use netpool_service::balancer::{Balancer, BalancerError, BalancerManager};
use netpool_service::drivers::DriverRegistry;
use netpool_service::model::{ResourceStatus, ResourceUpdate, ACTIVE_STATUSES};
use netpool_service::pool::Pool;
use netpool_service::queue::TaskQueue;
use netpool_service::repo::resource::ResourceRepo;
use netpool_service::unused::UnusedSet;
use netpool_service::worker::TaskWorker;

mod common;

use common::{
    create_pooled_resource, create_resource, drain_queue, fake_registry, resource_repo, SqliteDb,
};

test_r::enable!();

struct Fixture {
    repo: Arc<dyn ResourceRepo + Send + Sync>,
    registry: Arc<DriverRegistry>,
    driver: Arc<netpool_service::drivers::fake::FakeDriver>,
    queue: Arc<TaskQueue>,
    worker: TaskWorker,
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
        Self {
            repo,
            registry,
            driver,
            queue,
            worker,
            _db: db,
        }
    }

    fn balancer(&self, low: u64, high: u64) -> Balancer {
        Balancer::new(
            Pool::new("fake", self.repo.clone()),
            UnusedSet::new("fake", self.registry.clone(), self.repo.clone()),
            low,
            high,
            self.queue.clone(),
        )
    }

    fn pool(&self) -> Pool {
        Pool::new("fake", self.repo.clone())
    }

    /// One tick of the whole engine: balance, then let the worker finish
    /// everything the balancer scheduled.
    async fn tick(&self, balancer: &Balancer) {
        balancer.balance().await.unwrap();
        drain_queue(&self.queue, &self.worker).await;
    }
}

#[test]
async fn cold_start_fills_pool_to_low_watermark() {
    let fixture = Fixture::new().await;
    let balancer = fixture.balancer(2, 5);

    // first run: no reserve exists, two resources are auto-provisioned and
    // started
    balancer.balance().await.unwrap();
    assert_eq!(fixture.queue.len(), 2);
    drain_queue(&fixture.queue, &fixture.worker).await;
    assert_eq!(fixture.driver.init_calls(), 2);

    // second run: the two started resources are placed into the pool
    fixture.tick(&balancer).await;
    assert_eq!(fixture.pool().count().await.unwrap(), 2);
}

#[test]
async fn allocation_triggers_refill() {
    let fixture = Fixture::new().await;
    let balancer = fixture.balancer(2, 5);
    fixture.tick(&balancer).await;
    fixture.tick(&balancer).await;
    assert_eq!(fixture.pool().count().await.unwrap(), 2);

    // a tenant takes one resource out of the pool
    let allocated = fixture.pool().list().await.unwrap()[0].clone();
    fixture
        .repo
        .update(
            &allocated.id,
            &ResourceUpdate::new().allocated(true).pool(None),
        )
        .await
        .unwrap();
    assert_eq!(fixture.pool().count().await.unwrap(), 1);

    // the deficit is eliminated over the next two ticks
    fixture.tick(&balancer).await;
    fixture.tick(&balancer).await;
    assert_eq!(fixture.pool().count().await.unwrap(), 2);
}

#[test]
async fn overflow_is_trimmed_and_stopped() {
    let fixture = Fixture::new().await;
    for _ in 0..5 {
        create_pooled_resource(&fixture.repo, "fake", "fake").await;
    }

    let balancer = fixture.balancer(1, 2);
    balancer.balance().await.unwrap();
    assert_eq!(fixture.pool().count().await.unwrap(), 2);

    drain_queue(&fixture.queue, &fixture.worker).await;
    assert_eq!(fixture.driver.stop_calls(), 3);

    let stopped = fixture
        .repo
        .count(&netpool_service::model::ResourceFilters {
            driver: Some("fake".to_string()),
            statuses: Some(vec![ResourceStatus::Stopped]),
            unused: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(stopped, 3);
}

#[test]
async fn unused_started_resources_are_stopped() {
    let fixture = Fixture::new().await;
    create_resource(&fixture.repo, "fake", ResourceStatus::Started).await;

    let balancer = fixture.balancer(0, 5);
    fixture.tick(&balancer).await;

    assert_eq!(fixture.driver.stop_calls(), 1);
    let unused = UnusedSet::new("fake", fixture.registry.clone(), fixture.repo.clone());
    assert_eq!(
        unused.count(&[ResourceStatus::Stopped], false).await.unwrap(),
        1
    );
    assert_eq!(unused.count(ACTIVE_STATUSES, false).await.unwrap(), 0);
}

#[test]
async fn repeated_ticks_converge_into_the_watermark_band() {
    let fixture = Fixture::new().await;
    let balancer = fixture.balancer(2, 5);

    for _ in 0..4 {
        fixture.tick(&balancer).await;
    }

    let pool_count = fixture.pool().count().await.unwrap();
    let unused = UnusedSet::new("fake", fixture.registry.clone(), fixture.repo.clone());
    let active_reserve = unused.count(ACTIVE_STATUSES, false).await.unwrap();
    assert!((2..=5).contains(&(pool_count + active_reserve)));

    // a converged pool is left alone
    let before = fixture.pool().list().await.unwrap();
    fixture.tick(&balancer).await;
    let after = fixture.pool().list().await.unwrap();
    assert_eq!(before.len(), after.len());
}

#[test]
async fn in_flight_resources_count_as_reserve_and_are_left_alone() {
    let fixture = Fixture::new().await;
    let busy = create_resource(&fixture.repo, "fake", ResourceStatus::Starting).await;
    fixture
        .repo
        .update(&busy.id, &ResourceUpdate::new().processing(true))
        .await
        .unwrap();

    let balancer = fixture.balancer(1, 5);
    balancer.balance().await.unwrap();

    // the resource already on its way to STARTED covers the deficit, so
    // nothing new is provisioned and the busy resource is not touched
    assert!(fixture.queue.is_empty());
    let untouched = fixture.repo.get(&busy.id).await.unwrap();
    assert_eq!(untouched.pool, None);
    assert_eq!(untouched.status, ResourceStatus::Starting);
    assert!(untouched.processing);
}

#[test]
async fn manager_rejects_duplicate_balancers() {
    let fixture = Fixture::new().await;
    let mut manager = BalancerManager::new(Duration::from_secs(30));

    manager.add_balancer(fixture.balancer(2, 5)).unwrap();
    let result = manager.add_balancer(fixture.balancer(2, 5));
    assert!(matches!(result, Err(BalancerError::AlreadyAdded(_))));
}

#[test]
async fn failing_balancer_does_not_starve_the_others() {
    let fixture = Fixture::new().await;
    let mut manager = BalancerManager::new(Duration::from_secs(30));

    // a balancer whose driver is not registered fails on auto-provisioning
    let broken = Balancer::new(
        Pool::new("missing", fixture.repo.clone()),
        UnusedSet::new("missing", fixture.registry.clone(), fixture.repo.clone()),
        2,
        5,
        fixture.queue.clone(),
    );
    manager.add_balancer(broken).unwrap();
    manager.add_balancer(fixture.balancer(2, 5)).unwrap();

    manager.balance_pools().await;

    // the healthy pool still got its start tasks scheduled
    assert_eq!(fixture.queue.len(), 2);
}
