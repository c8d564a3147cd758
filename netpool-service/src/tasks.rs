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

use tracing::warn;
use uuid::Uuid;

use crate::drivers::{DriverError, DriverRegistry};
use crate::model::{Resource, ResourceStatus};

/// The driver operation a task performs against its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOp {
    Start,
    Stop,
    Wipe,
    Delete { force: bool },
}

/// A unit of work scheduled against a single resource: one driver call plus
/// the associated status transition. The allowed pre-states and the
/// process/success/fail states are derived from the operation.
#[derive(Debug, Clone)]
pub struct Task {
    pub resource: Resource,
    pub op: TaskOp,
}

impl Task {
    pub fn start(resource: Resource) -> Self {
        Self {
            resource,
            op: TaskOp::Start,
        }
    }

    pub fn stop(resource: Resource) -> Self {
        Self {
            resource,
            op: TaskOp::Stop,
        }
    }

    pub fn wipe(resource: Resource) -> Self {
        Self {
            resource,
            op: TaskOp::Wipe,
        }
    }

    pub fn delete(resource: Resource, force: bool) -> Self {
        Self {
            resource,
            op: TaskOp::Delete { force },
        }
    }

    pub fn resource_id(&self) -> Uuid {
        self.resource.id
    }

    pub fn op_name(&self) -> &'static str {
        match self.op {
            TaskOp::Start => "start",
            TaskOp::Stop => "stop",
            TaskOp::Wipe => "wipe",
            TaskOp::Delete { .. } => "delete",
        }
    }

    /// Statuses the resource must be in for this task to be accepted.
    pub fn in_statuses(&self) -> &'static [ResourceStatus] {
        match self.op {
            TaskOp::Start => &[ResourceStatus::Stopped],
            TaskOp::Stop => &[ResourceStatus::Started],
            TaskOp::Wipe => &[ResourceStatus::Started],
            TaskOp::Delete { .. } => &[ResourceStatus::Error, ResourceStatus::Stopped],
        }
    }

    /// Status the resource carries while the task is in flight.
    pub fn process_status(&self) -> ResourceStatus {
        match self.op {
            TaskOp::Start => ResourceStatus::Starting,
            TaskOp::Stop => ResourceStatus::Stopping,
            TaskOp::Wipe => ResourceStatus::Wiping,
            TaskOp::Delete { .. } => ResourceStatus::Deleting,
        }
    }

    pub fn success_status(&self) -> ResourceStatus {
        match self.op {
            TaskOp::Start => ResourceStatus::Started,
            TaskOp::Stop => ResourceStatus::Stopped,
            TaskOp::Wipe => ResourceStatus::Started,
            TaskOp::Delete { .. } => ResourceStatus::Deleted,
        }
    }

    pub fn fail_status(&self) -> ResourceStatus {
        ResourceStatus::Error
    }

    /// Resolve the driver by the resource's driver name and invoke the
    /// operation. A forced delete swallows the driver failure so the resource
    /// still reaches its success state.
    pub async fn execute(&mut self, registry: &DriverRegistry) -> Result<(), DriverError> {
        let driver = registry.get(&self.resource.driver)?;
        match self.op {
            TaskOp::Start => driver.init(&mut self.resource).await,
            TaskOp::Stop => driver.stop(&self.resource).await,
            TaskOp::Wipe => driver.wipe(&self.resource).await,
            TaskOp::Delete { force } => match driver.stop(&self.resource).await {
                Ok(()) => Ok(()),
                Err(error) if force => {
                    warn!(
                        "Ignoring driver failure on forced delete of {}: {}",
                        self.resource.id, error
                    );
                    Ok(())
                }
                Err(error) => Err(error),
            },
        }
    }
}
