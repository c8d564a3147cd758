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

use tracing::debug;
use uuid::Uuid;

use crate::model::{ResourceFilters, ResourceUpdate};
use crate::repo::resource::ResourceRepo;
use crate::repo::RepoError;
use crate::tasks::Task;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The compare-and-set gate rejected the push: some other actor moved the
    /// resource out of the task's allowed pre-states first.
    #[error("Task rejected: resource {resource_id} is no longer in an allowed state")]
    Conflict { resource_id: Uuid },
    #[error("Task queue is full")]
    Full,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Bounded multi-producer/multi-consumer FIFO of tasks.
///
/// `push` is the gatekeeper of the state machine: a task is only enqueued if
/// the resource can atomically be moved from one of the task's allowed
/// pre-states into its in-flight state with `processing = true`. Together
/// with the worker clearing `processing` on both outcomes this guarantees at
/// most one in-flight task per resource.
pub struct TaskQueue {
    repo: Arc<dyn ResourceRepo + Send + Sync>,
    sender: async_channel::Sender<Task>,
    receiver: async_channel::Receiver<Task>,
}

impl TaskQueue {
    pub fn new(repo: Arc<dyn ResourceRepo + Send + Sync>, capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity);
        Self {
            repo,
            sender,
            receiver,
        }
    }

    /// Add a task to the queue, gated by the compare-and-set described above.
    /// Never blocks: a full queue fails fast after reverting the gate.
    pub async fn push(&self, mut task: Task) -> Result<(), QueueError> {
        let resource_id = task.resource.id;
        let prior_status = task.resource.status;
        // Allocated resources never take tasks; gating on it here closes the
        // race with a concurrent allocate, whose own compare-and-set requires
        // processing = false.
        let filters = ResourceFilters {
            statuses: Some(task.in_statuses().to_vec()),
            allocated: Some(false),
            ..Default::default()
        };
        let update = ResourceUpdate::new()
            .status(task.process_status())
            .processing(true);

        let updated = self
            .repo
            .compare_update(&resource_id, &filters, &update)
            .await?
            .ok_or(QueueError::Conflict { resource_id })?;

        debug!(
            "Resource state change: {}/{}",
            resource_id,
            task.process_status()
        );
        task.resource = updated;

        let process_status = task.process_status();
        if self.sender.try_send(task).is_err() {
            // Undo the gate so the resource is not stranded in an in-flight
            // status no worker will ever finish.
            let revert_filters = ResourceFilters {
                statuses: Some(vec![process_status]),
                ..Default::default()
            };
            let revert = ResourceUpdate::new().status(prior_status).processing(false);
            let _ = self
                .repo
                .compare_update(&resource_id, &revert_filters, &revert)
                .await;
            return Err(QueueError::Full);
        }

        Ok(())
    }

    /// Remove a task from the queue, blocking up to `timeout`. Returns `None`
    /// on timeout or when the queue has been closed.
    pub async fn pop(&self, timeout: Duration) -> Option<Task> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Ok(task)) => Some(task),
            _ => None,
        }
    }

    /// Number of tasks currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn close(&self) {
        self.receiver.close();
    }
}
