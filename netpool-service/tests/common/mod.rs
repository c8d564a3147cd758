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

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use netpool_service::config::DbSqliteConfig;
use netpool_service::db;
use netpool_service::drivers::fake::FakeDriver;
use netpool_service::drivers::DriverRegistry;
use netpool_service::model::{NewResource, Resource, ResourceStatus, ResourceUpdate};
use netpool_service::queue::TaskQueue;
use netpool_service::repo::resource::{DbResourceRepo, ResourceRepo};
use netpool_service::worker::TaskWorker;
use sqlx::Pool;
use uuid::Uuid;

pub struct SqliteDb {
    pub db_path: String,
    pub pool: Arc<Pool<sqlx::Sqlite>>,
}

impl SqliteDb {
    pub async fn new() -> Self {
        let db_path = format!("/tmp/netpool-{}.db", Uuid::new_v4());
        let db_config = DbSqliteConfig {
            database: db_path.clone(),
            max_connections: 10,
        };

        db::sqlite_migrate(&db_config).await.unwrap();

        let pool = Arc::new(db::create_sqlite_pool(&db_config).await.unwrap());

        Self { db_path, pool }
    }

    pub fn config(&self) -> DbSqliteConfig {
        DbSqliteConfig {
            database: self.db_path.clone(),
            max_connections: 10,
        }
    }
}

impl Drop for SqliteDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

pub fn resource_repo(db: &SqliteDb) -> Arc<dyn ResourceRepo + Send + Sync> {
    Arc::new(DbResourceRepo::new(db.pool.clone()))
}

/// A registry holding a single fake driver under the name `fake`, with a
/// handle to the driver for failure injection and call counting.
pub fn fake_registry() -> (Arc<DriverRegistry>, Arc<FakeDriver>) {
    let driver = Arc::new(FakeDriver::default());
    let mut registry = DriverRegistry::new();
    registry.register("fake", driver.clone());
    (Arc::new(registry), driver)
}

/// Create a resource directly in the store, bypassing the drivers.
pub async fn create_resource(
    repo: &Arc<dyn ResourceRepo + Send + Sync>,
    driver: &str,
    status: ResourceStatus,
) -> Resource {
    let new = NewResource::new("network.router")
        .driver(driver)
        .status(status);
    repo.create(&new).await.unwrap()
}

/// Create a resource and place it in the given pool.
pub async fn create_pooled_resource(
    repo: &Arc<dyn ResourceRepo + Send + Sync>,
    driver: &str,
    pool: &str,
) -> Resource {
    let resource = create_resource(repo, driver, ResourceStatus::Started).await;
    repo.update(
        &resource.id,
        &ResourceUpdate::new().pool(Some(pool.to_string())),
    )
    .await
    .unwrap()
}

/// Run all currently queued tasks to completion through a single worker.
pub async fn drain_queue(queue: &Arc<TaskQueue>, worker: &TaskWorker) {
    while let Some(task) = queue.pop(Duration::from_millis(50)).await {
        worker.handle(task).await;
    }
}
