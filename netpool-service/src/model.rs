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

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use poem_openapi::{Enum, Object};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a managed resource.
///
/// The `..ing` statuses mark a task in flight against the resource; entering
/// them is gated by the task queue's compare-and-set (see `queue`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Enum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[oai(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Stopped,
    Starting,
    Started,
    Stopping,
    Wiping,
    Deleting,
    Deleted,
    Error,
}

/// Statuses that count towards a pool's active reserve: resources that are
/// warm, or on their way to warm, and will be placeable once settled.
pub const ACTIVE_STATUSES: &[ResourceStatus] = &[
    ResourceStatus::Started,
    ResourceStatus::Starting,
    ResourceStatus::Wiping,
];

impl Display for ResourceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceStatus::Stopped => "STOPPED",
            ResourceStatus::Starting => "STARTING",
            ResourceStatus::Started => "STARTED",
            ResourceStatus::Stopping => "STOPPING",
            ResourceStatus::Wiping => "WIPING",
            ResourceStatus::Deleting => "DELETING",
            ResourceStatus::Deleted => "DELETED",
            ResourceStatus::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(ResourceStatus::Stopped),
            "STARTING" => Ok(ResourceStatus::Starting),
            "STARTED" => Ok(ResourceStatus::Started),
            "STOPPING" => Ok(ResourceStatus::Stopping),
            "WIPING" => Ok(ResourceStatus::Wiping),
            "DELETING" => Ok(ResourceStatus::Deleting),
            "DELETED" => Ok(ResourceStatus::Deleted),
            "ERROR" => Ok(ResourceStatus::Error),
            _ => Err(format!("Unknown resource status: {}", s)),
        }
    }
}

/// A persisted, driver-managed external resource (e.g. a virtual router VM).
///
/// Known scalar fields live at the top level; everything driver-specific
/// (address, instance id, ...) is kept in the free-form `data` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct Resource {
    pub id: Uuid,
    pub driver: String,
    pub class: String,
    pub status: ResourceStatus,
    pub pool: Option<String>,
    pub processing: bool,
    pub allocated: bool,
    pub deleted: bool,
    pub description: Option<String>,
    pub data: Value,
}

impl Resource {
    pub fn data_object(&self) -> serde_json::Map<String, Value> {
        match &self.data {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        }
    }
}

/// The not-yet-persisted shape of a resource, produced by `Driver::prepare`
/// and turned into a `Resource` by `ResourceRepo::create`.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub driver: String,
    pub class: String,
    pub status: ResourceStatus,
    pub description: Option<String>,
    pub data: serde_json::Map<String, Value>,
    pub processing: bool,
}

impl NewResource {
    /// A new shell resource of the given class. The driver name (the registry
    /// key, not known to the driver itself) is filled in by the caller.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            driver: String::new(),
            class: class.into(),
            status: ResourceStatus::Stopped,
            description: None,
            data: serde_json::Map::new(),
            processing: false,
        }
    }

    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn data(mut self, data: serde_json::Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn processing(mut self, processing: bool) -> Self {
        self.processing = processing;
        self
    }
}

/// Attribute filters understood by the store. All present fields must match
/// (conjunction); `statuses` is set membership; `unused` means
/// `pool IS NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilters {
    pub driver: Option<String>,
    pub class: Option<String>,
    pub statuses: Option<Vec<ResourceStatus>>,
    pub pool: Option<String>,
    pub unused: bool,
    pub processing: Option<bool>,
    pub allocated: Option<bool>,
    pub deleted: Option<bool>,
}

impl ResourceFilters {
    pub fn is_empty(&self) -> bool {
        *self == ResourceFilters::default()
    }
}

/// A filtered query with paging, the argument of `find` and `count`.
#[derive(Debug, Clone, Default)]
pub struct ResourceSearch {
    pub filters: ResourceFilters,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ResourceSearch {
    pub fn filtered(filters: ResourceFilters) -> Self {
        Self {
            filters,
            limit: None,
            offset: None,
        }
    }
}

/// A partial update. Known scalar fields are set at the top level, `data`
/// keys are shallow-merged into the stored `data` object. `pool` uses a
/// nested option so it can be explicitly set to null.
#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub status: Option<ResourceStatus>,
    pub pool: Option<Option<String>>,
    pub processing: Option<bool>,
    pub allocated: Option<bool>,
    pub deleted: Option<bool>,
    pub description: Option<String>,
    pub data: Option<serde_json::Map<String, Value>>,
}

impl ResourceUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn pool(mut self, pool: Option<String>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn processing(mut self, processing: bool) -> Self {
        self.processing = Some(processing);
        self
    }

    pub fn allocated(mut self, allocated: bool) -> Self {
        self.allocated = Some(allocated);
        self
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = Some(deleted);
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn data(mut self, data: serde_json::Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.pool.is_none()
            && self.processing.is_none()
            && self.allocated.is_none()
            && self.deleted.is_none()
            && self.description.is_none()
            && self.data.as_ref().is_none_or(|data| data.is_empty())
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Object,
)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize, Object,
)]
pub struct ErrorsBody {
    pub errors: Vec<String>,
}
