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

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::balancer::{Balancer, BalancerManager};
use crate::config::{DbConfig, PoolServiceConfig};
use crate::db;
use crate::drivers::{DriverError, DriverRegistry};
use crate::pool::Pool;
use crate::queue::{QueueError, TaskQueue};
use crate::reaper::Reaper;
use crate::repo::resource::{DbResourceRepo, ResourceRepo};
use crate::repo::RepoError;
use crate::unused::{UnusedSet, UnusedSetError};
use crate::worker::spawn_workers;

pub mod resource;

pub use resource::ResourceService;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(Uuid),
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),
    #[error("Invalid resource: {0}")]
    InvalidRequest(String),
    #[error("Resource {0} is allocated")]
    Allocated(Uuid),
    #[error("Resource {0} is being processed")]
    Processing(Uuid),
    #[error("Resource {0} is not in an allowed state for the requested transition")]
    Conflict(Uuid),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepoError> for ResourceError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::NotFound(id) => ResourceError::NotFound(id),
            RepoError::Internal(e) => ResourceError::Internal(e),
        }
    }
}

impl From<DriverError> for ResourceError {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::UnknownDriver(name) => ResourceError::UnknownDriver(name),
            DriverError::Validation(e) => ResourceError::InvalidRequest(e),
            other => ResourceError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ResourceError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Conflict { resource_id } => ResourceError::Conflict(resource_id),
            QueueError::Full => ResourceError::Internal(error.to_string()),
            QueueError::Repo(e) => e.into(),
        }
    }
}

impl From<UnusedSetError> for ResourceError {
    fn from(error: UnusedSetError) -> Self {
        match error {
            UnusedSetError::Repo(e) => e.into(),
            UnusedSetError::Driver(e) => e.into(),
        }
    }
}

/// Everything the service process runs: the facade consumed by the HTTP
/// layer plus the background machinery (workers, balancers, reaper).
/// Constructed once at startup and passed to the handlers explicitly.
#[derive(Clone)]
pub struct Services {
    pub resource_service: Arc<ResourceService>,
    pub driver_registry: Arc<DriverRegistry>,
    balancer_manager: Arc<BalancerManager>,
    reaper: Arc<Reaper>,
    pools: Vec<Pool>,
    cancellation: CancellationToken,
    worker_handles: Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl Services {
    pub async fn new(config: &PoolServiceConfig) -> Result<Services, String> {
        let repo: Arc<dyn ResourceRepo + Send + Sync> = match config.db.clone() {
            DbConfig::Postgres(c) => {
                let db_pool = db::create_postgres_pool(&c)
                    .await
                    .map_err(|e| e.to_string())?;
                Arc::new(DbResourceRepo::new(Arc::new(db_pool)))
            }
            DbConfig::Sqlite(c) => {
                let db_pool = db::create_sqlite_pool(&c)
                    .await
                    .map_err(|e| e.to_string())?;
                Arc::new(DbResourceRepo::new(Arc::new(db_pool)))
            }
        };

        let driver_registry = Arc::new(DriverRegistry::from_config(&config.drivers));
        let task_queue = Arc::new(TaskQueue::new(repo.clone(), config.task_queue_capacity));

        let cancellation = CancellationToken::new();
        let worker_handles = spawn_workers(
            config.workers_count,
            task_queue.clone(),
            driver_registry.clone(),
            repo.clone(),
            config.task_queue_timeout,
            cancellation.clone(),
        );

        let mut balancer_manager = BalancerManager::new(config.sleep_time);
        let mut pools = Vec::new();
        for (driver_name, driver_config) in &config.drivers {
            let pool = Pool::new(driver_name.clone(), repo.clone());
            let unused_set = UnusedSet::new(
                driver_name.clone(),
                driver_registry.clone(),
                repo.clone(),
            );
            balancer_manager
                .add_balancer(Balancer::new(
                    pool.clone(),
                    unused_set,
                    driver_config.low_watermark,
                    driver_config.high_watermark,
                    task_queue.clone(),
                ))
                .map_err(|e| e.to_string())?;
            pools.push(pool);
        }
        let balancer_manager = Arc::new(balancer_manager);
        balancer_manager.run();

        let reaper = Arc::new(Reaper::new(repo.clone(), config.sleep_time));
        reaper.run();

        let resource_service = Arc::new(ResourceService::new(
            repo,
            driver_registry.clone(),
            task_queue,
        ));

        Ok(Services {
            resource_service,
            driver_registry,
            balancer_manager,
            reaper,
            pools,
            cancellation,
            worker_handles: Arc::new(tokio::sync::Mutex::new(worker_handles)),
        })
    }

    /// Cooperative shutdown: stop the balancer loop, let workers finish their
    /// current task, return pooled resources to the unused set, stop the
    /// reaper.
    pub async fn shutdown(&self) {
        self.balancer_manager.kill().await;

        self.cancellation.cancel();
        let mut handles = self.worker_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        for pool in &self.pools {
            if let Err(e) = pool.pop(None, false).await {
                tracing::error!("Failed to drain pool {}: {}", pool.name(), e);
            }
        }

        self.reaper.stop().await;
    }
}
