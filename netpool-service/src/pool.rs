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

use uuid::Uuid;

use crate::model::{Resource, ResourceFilters, ResourceSearch, ResourceUpdate};
use crate::repo::resource::ResourceRepo;
use crate::repo::RepoError;

/// A pool is not a container: it is a name plus query predicates over the
/// store. The pool named `P` consists of all resources with
/// `pool = P AND allocated = false`.
#[derive(Clone)]
pub struct Pool {
    name: String,
    repo: Arc<dyn ResourceRepo + Send + Sync>,
}

impl Pool {
    pub fn new(name: impl Into<String>, repo: Arc<dyn ResourceRepo + Send + Sync>) -> Self {
        Self {
            name: name.into(),
            repo,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn filters(&self) -> ResourceFilters {
        ResourceFilters {
            pool: Some(self.name.clone()),
            allocated: Some(false),
            ..Default::default()
        }
    }

    /// Move a resource into the pool; the resource is done processing once it
    /// is handed over.
    pub async fn push(&self, id: &Uuid) -> Result<Resource, RepoError> {
        let update = ResourceUpdate::new()
            .pool(Some(self.name.clone()))
            .processing(false);
        self.repo.update(id, &update).await
    }

    /// Take up to `count` resources out of the pool (all of them when `count`
    /// is `None`), marking each with the given `processing` flag. The find
    /// and the updates are not atomic with each other; the single-balancer
    /// deployment assumption makes this safe.
    pub async fn pop(
        &self,
        count: Option<u64>,
        processing: bool,
    ) -> Result<Vec<Resource>, RepoError> {
        let search = ResourceSearch {
            filters: self.filters(),
            limit: count,
            offset: None,
        };
        let resources = self.repo.find(&search).await?;
        let update = ResourceUpdate::new().pool(None).processing(processing);
        let mut popped = Vec::with_capacity(resources.len());
        for resource in resources {
            popped.push(self.repo.update(&resource.id, &update).await?);
        }
        Ok(popped)
    }

    pub async fn list(&self) -> Result<Vec<Resource>, RepoError> {
        self.repo
            .find(&ResourceSearch::filtered(self.filters()))
            .await
    }

    pub async fn count(&self) -> Result<u64, RepoError> {
        self.repo.count(&self.filters()).await
    }
}
