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

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::metrics;
use crate::model::{ResourceFilters, ResourceSearch, ResourceStatus};
use crate::repo::resource::ResourceRepo;
use crate::repo::RepoError;

/// The only actor that removes rows from the store: a background loop that
/// periodically deletes resources which reached DELETED and are not being
/// processed.
pub struct Reaper {
    repo: Arc<dyn ResourceRepo + Send + Sync>,
    sleep_time: Duration,
    cancellation: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    pub fn new(repo: Arc<dyn ResourceRepo + Send + Sync>, sleep_time: Duration) -> Self {
        Self {
            repo,
            sleep_time,
            cancellation: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// One sweep: remove every reapable resource currently in the store.
    pub async fn sweep(&self) -> Result<u64, RepoError> {
        let search = ResourceSearch::filtered(ResourceFilters {
            statuses: Some(vec![ResourceStatus::Deleted]),
            processing: Some(false),
            ..Default::default()
        });
        let resources = self.repo.find(&search).await?;
        let mut reaped = 0;
        for resource in resources {
            debug!("Deleting resource {}", resource.id);
            match self.repo.delete(&resource.id).await {
                Ok(()) => {
                    reaped += 1;
                    metrics::record_resource_reaped();
                }
                Err(RepoError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    /// Start the periodic sweep loop. Idempotent.
    pub fn run(self: &Arc<Self>) {
        let mut handle = self.handle.lock().expect("reaper handle lock poisoned");
        if handle.is_some() {
            return;
        }
        let reaper = self.clone();
        *handle = Some(tokio::spawn(async move {
            loop {
                if let Err(e) = reaper.sweep().await {
                    error!("Reaper sweep failed: {}", e);
                }
                tokio::select! {
                    _ = reaper.cancellation.cancelled() => break,
                    _ = tokio::time::sleep(reaper.sleep_time) => {}
                }
            }
        }));
    }

    /// Stop the sweep loop and wait for the current sweep to finish.
    pub async fn stop(&self) {
        self.cancellation.cancel();
        let handle = {
            self.handle
                .lock()
                .expect("reaper handle lock poisoned")
                .take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
