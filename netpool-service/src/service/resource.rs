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

use serde_json::Value;
use uuid::Uuid;

use crate::drivers::DriverRegistry;
use crate::model::{Resource, ResourceFilters, ResourceSearch, ResourceStatus, ResourceUpdate};
use crate::queue::{QueueError, TaskQueue};
use crate::repo::resource::ResourceRepo;
use crate::service::ResourceError;
use crate::tasks::Task;

/// Administrative facade over the store, the driver registry and the task
/// queue. Guarded transitions (allocate/deallocate/delete) use the store's
/// compare-and-set so the precondition check is atomic with the write.
pub struct ResourceService {
    repo: Arc<dyn ResourceRepo + Send + Sync>,
    registry: Arc<DriverRegistry>,
    queue: Arc<TaskQueue>,
}

impl ResourceService {
    pub fn new(
        repo: Arc<dyn ResourceRepo + Send + Sync>,
        registry: Arc<DriverRegistry>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            repo,
            registry,
            queue,
        }
    }

    /// Register a pre-provisioned resource. The driver validates the
    /// user-supplied fields and prepares the record in STARTED.
    pub async fn add(
        &self,
        driver_name: &str,
        description: Option<String>,
        values: serde_json::Map<String, Value>,
    ) -> Result<Resource, ResourceError> {
        let driver = self.registry.get(driver_name)?;
        driver.validate(&values)?;
        let new = driver
            .prepare(ResourceStatus::Started, Some(values))?
            .driver(driver_name)
            .description(description);
        Ok(self.repo.create(&new).await?)
    }

    pub async fn list(&self, search: &ResourceSearch) -> Result<Vec<Resource>, ResourceError> {
        Ok(self.repo.find(search).await?)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Resource, ResourceError> {
        Ok(self.repo.get(id).await?)
    }

    /// Hand the resource to a tenant. Allocated resources leave their pool.
    pub async fn allocate(&self, id: &Uuid) -> Result<Resource, ResourceError> {
        let filters = ResourceFilters {
            processing: Some(false),
            allocated: Some(false),
            ..Default::default()
        };
        let update = ResourceUpdate::new()
            .allocated(true)
            .pool(None)
            .processing(false);
        match self.repo.compare_update(id, &filters, &update).await? {
            Some(resource) => Ok(resource),
            None => Err(self.transition_conflict(id).await),
        }
    }

    /// Take the resource back from a tenant and schedule a wipe so it returns
    /// to the reserve in a pristine state.
    pub async fn deallocate(&self, id: &Uuid) -> Result<Resource, ResourceError> {
        let filters = ResourceFilters {
            processing: Some(false),
            ..Default::default()
        };
        let update = ResourceUpdate::new().allocated(false).processing(true);
        match self.repo.compare_update(id, &filters, &update).await? {
            Some(resource) => {
                let updated = resource.clone();
                self.push_or_revert(Task::wipe(resource)).await?;
                Ok(updated)
            }
            None => Err(self.transition_conflict(id).await),
        }
    }

    /// Schedule removal. With `force`, a driver failure during teardown still
    /// lets the resource reach DELETED.
    pub async fn delete(&self, id: &Uuid, force: bool) -> Result<(), ResourceError> {
        let filters = ResourceFilters {
            processing: Some(false),
            allocated: Some(false),
            ..Default::default()
        };
        let update = ResourceUpdate::new().processing(true);
        match self.repo.compare_update(id, &filters, &update).await? {
            Some(resource) => self.push_or_revert(Task::delete(resource, force)).await,
            None => Err(self.transition_conflict(id).await),
        }
    }

    pub fn schema(&self, driver_name: &str) -> Result<Value, ResourceError> {
        Ok(self.registry.get(driver_name)?.schema())
    }

    pub fn driver_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Push a task whose resource the facade just marked `processing`. If the
    /// push gate rejects it the flag is rolled back so the resource does not
    /// stay stuck, and the rejection surfaces as a conflict.
    async fn push_or_revert(&self, task: Task) -> Result<(), ResourceError> {
        let resource_id = task.resource.id;
        match self.queue.push(task).await {
            Ok(()) => Ok(()),
            Err(error) => {
                let revert = ResourceUpdate::new().processing(false);
                let _ = self.repo.update(&resource_id, &revert).await;
                match error {
                    QueueError::Conflict { resource_id } => {
                        Err(ResourceError::Conflict(resource_id))
                    }
                    other => Err(other.into()),
                }
            }
        }
    }

    /// A guarded transition found the resource in a state that refuses it;
    /// re-read to report which precondition failed.
    async fn transition_conflict(&self, id: &Uuid) -> ResourceError {
        match self.repo.get(id).await {
            Ok(resource) if resource.processing => ResourceError::Processing(*id),
            Ok(resource) if resource.allocated => ResourceError::Allocated(*id),
            Ok(_) => ResourceError::Conflict(*id),
            Err(e) => e.into(),
        }
    }
}
