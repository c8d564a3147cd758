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

use tracing::debug;

use crate::drivers::{DriverError, DriverRegistry};
use crate::model::{Resource, ResourceFilters, ResourceSearch, ResourceStatus, ResourceUpdate};
use crate::repo::resource::ResourceRepo;
use crate::repo::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum UnusedSetError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// The resources of one driver that sit in no pool: not allocated, not being
/// processed, not scheduled for removal. This is the balancer's reserve.
pub struct UnusedSet {
    driver_name: String,
    registry: Arc<DriverRegistry>,
    repo: Arc<dyn ResourceRepo + Send + Sync>,
}

impl UnusedSet {
    pub fn new(
        driver_name: impl Into<String>,
        registry: Arc<DriverRegistry>,
        repo: Arc<dyn ResourceRepo + Send + Sync>,
    ) -> Self {
        Self {
            driver_name: driver_name.into(),
            registry,
            repo,
        }
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    fn filters(&self, statuses: Vec<ResourceStatus>, processing: bool) -> ResourceFilters {
        ResourceFilters {
            driver: Some(self.driver_name.clone()),
            statuses: Some(statuses),
            unused: true,
            allocated: Some(false),
            processing: Some(processing),
            deleted: Some(false),
            ..Default::default()
        }
    }

    /// Materialize up to `count` unused resources in the given status,
    /// marking each `processing = true`. If fewer exist, the driver is asked
    /// to prepare the remainder (auto-provisioning); drivers that cannot
    /// prepare resources in that status end the attempt silently.
    pub async fn get(
        &self,
        status: ResourceStatus,
        count: Option<u64>,
    ) -> Result<Vec<Resource>, UnusedSetError> {
        let found = self.list(status, count).await?;
        let mut resources = Vec::with_capacity(found.len());
        for resource in found {
            let update = ResourceUpdate::new().processing(true);
            resources.push(self.repo.update(&resource.id, &update).await?);
        }

        if let Some(count) = count {
            if (resources.len() as u64) < count {
                let driver = self.registry.get(&self.driver_name)?;
                for _ in resources.len() as u64..count {
                    match driver.prepare(status, None) {
                        Ok(new) => {
                            let new = new.driver(&self.driver_name).processing(true);
                            let resource = self.repo.create(&new).await?;
                            debug!(
                                "Prepared new {} resource {} in status {}",
                                self.driver_name, resource.id, status
                            );
                            resources.push(resource);
                        }
                        Err(DriverError::NotSupported) => break,
                        Err(error) => return Err(error.into()),
                    }
                }
            }
        }

        Ok(resources)
    }

    /// Read-only variant of `get`: no processing mark, no auto-provisioning.
    pub async fn list(
        &self,
        status: ResourceStatus,
        count: Option<u64>,
    ) -> Result<Vec<Resource>, RepoError> {
        let search = ResourceSearch {
            filters: self.filters(vec![status], false),
            limit: count,
            offset: None,
        };
        self.repo.find(&search).await
    }

    pub async fn count(
        &self,
        statuses: &[ResourceStatus],
        processing: bool,
    ) -> Result<u64, RepoError> {
        self.repo
            .count(&self.filters(statuses.to_vec(), processing))
            .await
    }
}
