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

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::drivers::DriverRegistry;
use crate::metrics;
use crate::model::ResourceUpdate;
use crate::queue::TaskQueue;
use crate::repo::resource::ResourceRepo;
use crate::tasks::Task;

/// Consumes tasks from the queue and executes the driver call, writing the
/// outcome status back to the store. Driver failures are absorbed into the
/// resource state (fail status); they never reach the queue or the caller
/// that pushed the task.
pub struct TaskWorker {
    queue: Arc<TaskQueue>,
    registry: Arc<DriverRegistry>,
    repo: Arc<dyn ResourceRepo + Send + Sync>,
    timeout: Duration,
}

impl TaskWorker {
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<DriverRegistry>,
        repo: Arc<dyn ResourceRepo + Send + Sync>,
        timeout: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            repo,
            timeout,
        }
    }

    /// Worker loop: the pop timeout doubles as the cancellation point, so a
    /// shutdown is observed after the current task (if any) completes.
    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            if cancellation.is_cancelled() {
                break;
            }
            if let Some(task) = self.queue.pop(self.timeout).await {
                self.handle(task).await;
            }
        }
    }

    /// Execute one task and persist its outcome. The worker is the unique
    /// writer of a resource while `processing = true`, so a plain update is
    /// sufficient here.
    pub async fn handle(&self, mut task: Task) {
        let resource_id = task.resource.id;
        let op = task.op_name();
        match task.execute(&self.registry).await {
            Ok(()) => {
                debug!(
                    "Resource state change: {}/{}",
                    resource_id,
                    task.success_status()
                );
                let update = ResourceUpdate::new()
                    .status(task.success_status())
                    .processing(false)
                    .data(task.resource.data_object());
                if let Err(e) = self.repo.update(&resource_id, &update).await {
                    error!("Failed to record task outcome for {}: {}", resource_id, e);
                }
                metrics::record_task_executed(op, "success");
            }
            Err(e) => {
                error!("Task {} failed for resource {}: {}", op, resource_id, e);
                debug!(
                    "Resource state change: {}/{}",
                    resource_id,
                    task.fail_status()
                );
                let update = ResourceUpdate::new()
                    .status(task.fail_status())
                    .processing(false);
                if let Err(e) = self.repo.update(&resource_id, &update).await {
                    error!("Failed to record task failure for {}: {}", resource_id, e);
                }
                metrics::record_task_executed(op, "failure");
            }
        }
    }
}

/// Spawn the fixed worker pool. Workers exit after their current task once
/// the cancellation token fires.
pub fn spawn_workers(
    count: usize,
    queue: Arc<TaskQueue>,
    registry: Arc<DriverRegistry>,
    repo: Arc<dyn ResourceRepo + Send + Sync>,
    timeout: Duration,
    cancellation: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let worker = TaskWorker::new(queue.clone(), registry.clone(), repo.clone(), timeout);
            let cancellation = cancellation.clone();
            tokio::spawn(async move { worker.run(cancellation).await })
        })
        .collect()
}
