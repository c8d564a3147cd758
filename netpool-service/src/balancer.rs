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
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::metrics;
use crate::model::{ResourceStatus, ACTIVE_STATUSES};
use crate::pool::Pool;
use crate::queue::TaskQueue;
use crate::repo::RepoError;
use crate::tasks::Task;
use crate::unused::{UnusedSet, UnusedSetError};

#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    UnusedSet(#[from] UnusedSetError),
    #[error("Balancer for pool {0} already added")]
    AlreadyAdded(String),
}

/// Per-pool controller: keeps the pool population between the low and high
/// watermarks by moving warm resources in, starting cold ones, and stopping
/// what the pool no longer needs. Runs are issued by the `BalancerManager`.
pub struct Balancer {
    pool: Pool,
    unused_set: UnusedSet,
    low_watermark: u64,
    high_watermark: u64,
    queue: Arc<TaskQueue>,
}

impl Balancer {
    pub fn new(
        pool: Pool,
        unused_set: UnusedSet,
        low_watermark: u64,
        high_watermark: u64,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            pool,
            unused_set,
            low_watermark,
            high_watermark,
            queue,
        }
    }

    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// A single balancing run, in strict phase order: eliminate the deficit,
    /// eliminate the overflow, stop whatever warm resources remain unused.
    pub async fn balance(&self) -> Result<(), BalancerError> {
        let pool_count = self.pool.count().await?;
        // In-flight resources (starting, wiping) count towards the reserve,
        // otherwise every tick until they settle would provision more.
        let active_reserve = self.unused_set.count(ACTIVE_STATUSES, true).await?;
        debug!(
            pool = self.pool.name(),
            low = self.low_watermark,
            high = self.high_watermark,
            count = pool_count,
            active_reserve,
            "Running balancer"
        );

        let deficit = self.low_watermark as i64 - pool_count as i64 - active_reserve as i64;
        if deficit > 0 {
            self.eliminate_deficit(deficit as u64).await?;
        }

        let overflow = self.pool.count().await? as i64 - self.high_watermark as i64;
        if overflow > 0 {
            self.eliminate_overflow(overflow as u64).await?;
        }

        self.stop_unused().await
    }

    /// Fill the pool towards the low watermark: already started unused
    /// resources are pushed in directly, the remainder is started (possibly
    /// auto-provisioning fresh resources).
    async fn eliminate_deficit(&self, deficit: u64) -> Result<(), BalancerError> {
        let started = self
            .unused_set
            .get(ResourceStatus::Started, Some(deficit))
            .await?;
        debug!("Eliminate deficit: {}/{}", started.len(), deficit);
        for resource in &started {
            self.pool.push(&resource.id).await?;
        }

        let residual = deficit - started.len() as u64;
        if residual > 0 {
            let stopped = self
                .unused_set
                .get(ResourceStatus::Stopped, Some(residual))
                .await?;
            for resource in stopped {
                self.push_task(Task::start(resource)).await;
            }
        }
        Ok(())
    }

    /// Trim the pool down to the high watermark, stopping what was popped.
    async fn eliminate_overflow(&self, overflow: u64) -> Result<(), BalancerError> {
        let popped = self.pool.pop(Some(overflow), true).await?;
        debug!("Eliminate overflow: {}/{}", popped.len(), overflow);
        for resource in popped {
            self.push_task(Task::stop(resource)).await;
        }
        Ok(())
    }

    /// Return unused hot resources to STOPPED so they do not hold upstream
    /// capacity indefinitely.
    async fn stop_unused(&self) -> Result<(), BalancerError> {
        let started = self.unused_set.list(ResourceStatus::Started, None).await?;
        if !started.is_empty() {
            debug!("Stop unused: {}", started.len());
        }
        for resource in started {
            self.push_task(Task::stop(resource)).await;
        }
        Ok(())
    }

    /// A rejected push means another actor won the race for this resource;
    /// the task is discarded and the next run re-evaluates.
    async fn push_task(&self, task: Task) {
        let resource_id = task.resource.id;
        if let Err(e) = self.queue.push(task).await {
            warn!(
                "Discarding balancer task for resource {}: {}",
                resource_id, e
            );
        }
    }
}

/// Owns one balancer per pool and runs them serially on a periodic tick. A
/// failing balancer is logged and skipped so it cannot starve the others.
pub struct BalancerManager {
    balancers: HashMap<String, Balancer>,
    sleep_time: Duration,
    cancellation: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BalancerManager {
    pub fn new(sleep_time: Duration) -> Self {
        Self {
            balancers: HashMap::new(),
            sleep_time,
            cancellation: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn add_balancer(&mut self, balancer: Balancer) -> Result<(), BalancerError> {
        let pool_name = balancer.pool_name().to_string();
        if self.balancers.contains_key(&pool_name) {
            return Err(BalancerError::AlreadyAdded(pool_name));
        }
        self.balancers.insert(pool_name, balancer);
        Ok(())
    }

    pub fn balancer(&self, pool_name: &str) -> Option<&Balancer> {
        self.balancers.get(pool_name)
    }

    /// Run every balancer once, isolating failures per pool.
    pub async fn balance_pools(&self) {
        for (pool_name, balancer) in &self.balancers {
            if let Err(e) = balancer.balance().await {
                error!("Balancer {} error: {}", pool_name, e);
            }
        }
        metrics::record_balancer_run();
    }

    /// Start the periodic tick loop. Idempotent.
    pub fn run(self: &Arc<Self>) {
        let mut handle = self.handle.lock().expect("balancer handle lock poisoned");
        if handle.is_some() {
            return;
        }
        let manager = self.clone();
        *handle = Some(tokio::spawn(async move {
            loop {
                manager.balance_pools().await;
                tokio::select! {
                    _ = manager.cancellation.cancelled() => break,
                    _ = tokio::time::sleep(manager.sleep_time) => {}
                }
            }
        }));
    }

    /// Stop the tick loop and wait for the current run to finish.
    pub async fn kill(&self) {
        self.cancellation.cancel();
        let handle = {
            self.handle
                .lock()
                .expect("balancer handle lock poisoned")
                .take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
