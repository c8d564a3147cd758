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

use poem_openapi::param::{Path, Query};
use poem_openapi::payload::Json;
use poem_openapi::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::api::ApiTags;
use crate::model::{
    ErrorBody, ErrorsBody, Resource, ResourceFilters, ResourceSearch, ResourceStatus,
};
use crate::service::{ResourceError as ResourceServiceError, ResourceService};

#[derive(ApiResponse, Debug, Clone)]
pub enum ResourceApiError {
    /// Invalid request, returning with a list of issues detected in the request
    #[oai(status = 400)]
    BadRequest(Json<ErrorsBody>),
    /// Resource not found
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
    /// The resource is allocated, being processed, or otherwise refuses the transition
    #[oai(status = 409)]
    Conflict(Json<ErrorBody>),
    /// Internal server error
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

type Result<T> = std::result::Result<T, ResourceApiError>;

impl From<ResourceServiceError> for ResourceApiError {
    fn from(value: ResourceServiceError) -> Self {
        match value {
            ResourceServiceError::NotFound(_) => ResourceApiError::NotFound(Json(ErrorBody {
                error: value.to_string(),
            })),
            ResourceServiceError::UnknownDriver(_) | ResourceServiceError::InvalidRequest(_) => {
                ResourceApiError::BadRequest(Json(ErrorsBody {
                    errors: vec![value.to_string()],
                }))
            }
            ResourceServiceError::Allocated(_)
            | ResourceServiceError::Processing(_)
            | ResourceServiceError::Conflict(_) => ResourceApiError::Conflict(Json(ErrorBody {
                error: value.to_string(),
            })),
            ResourceServiceError::Internal(_) => ResourceApiError::InternalError(Json(ErrorBody {
                error: value.to_string(),
            })),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct ResourceCreation {
    pub driver: String,
    pub description: Option<String>,
    /// Driver-specific fields, validated by the driver's schema.
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct ResourceCreationRequest {
    pub resource: ResourceCreation,
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct ResourceAllocation {
    pub allocated: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct ResourceAllocationRequest {
    pub resource: ResourceAllocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct ResourceResponse {
    pub resource: Resource,
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct ResourcesResponse {
    pub resources: Vec<Resource>,
}

#[derive(ApiResponse, Debug, Clone)]
pub enum DeleteResourceResponse {
    /// The resource has been scheduled for deletion
    #[oai(status = 204)]
    Deleted,
}

pub struct ResourcesApi {
    resource_service: Arc<ResourceService>,
}

#[OpenApi(prefix_path = "/v1/resources", tag = ApiTags::Resource)]
impl ResourcesApi {
    pub fn new(resource_service: Arc<ResourceService>) -> Self {
        Self { resource_service }
    }

    /// Return a summary list of resources
    ///
    /// All query parameters are optional filters; `status` may be repeated to
    /// express set membership, `unused=true` selects resources in no pool.
    #[oai(path = "/", method = "get", operation_id = "list_resources")]
    #[allow(clippy::too_many_arguments)]
    async fn list_resources(
        &self,
        driver: Query<Option<String>>,
        class: Query<Option<String>>,
        status: Query<Vec<ResourceStatus>>,
        pool: Query<Option<String>>,
        unused: Query<Option<bool>>,
        processing: Query<Option<bool>>,
        allocated: Query<Option<bool>>,
        deleted: Query<Option<bool>>,
        limit: Query<Option<u64>>,
        offset: Query<Option<u64>>,
    ) -> Result<Json<ResourcesResponse>> {
        let filters = ResourceFilters {
            driver: driver.0,
            class: class.0,
            statuses: if status.0.is_empty() {
                None
            } else {
                Some(status.0)
            },
            pool: pool.0,
            unused: unused.0.unwrap_or(false),
            processing: processing.0,
            allocated: allocated.0,
            deleted: deleted.0,
        };
        let search = ResourceSearch {
            filters,
            limit: limit.0,
            offset: offset.0,
        };
        let resources = self.resource_service.list(&search).await?;
        Ok(Json(ResourcesResponse { resources }))
    }

    /// Create a new resource
    ///
    /// Registers a pre-provisioned instance with the given driver. The
    /// driver-specific fields in `data` are validated against the driver's
    /// schema and the resource is created in STARTED.
    #[oai(path = "/", method = "post", operation_id = "create_resource")]
    async fn create_resource(
        &self,
        body: Json<ResourceCreationRequest>,
    ) -> Result<Json<ResourceResponse>> {
        let creation = body.0.resource;
        let values = match creation.data {
            None => serde_json::Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(ResourceApiError::BadRequest(Json(ErrorsBody {
                    errors: vec!["resource data must be an object".to_string()],
                })))
            }
        };
        let resource = self
            .resource_service
            .add(&creation.driver, creation.description, values)
            .await?;
        Ok(Json(ResourceResponse { resource }))
    }

    /// Get a resource
    #[oai(path = "/:resource_id", method = "get", operation_id = "get_resource")]
    async fn get_resource(&self, resource_id: Path<Uuid>) -> Result<Json<ResourceResponse>> {
        let resource = self.resource_service.get(&resource_id.0).await?;
        Ok(Json(ResourceResponse { resource }))
    }

    /// Allocate or deallocate a resource
    ///
    /// Only the `allocated` field drives a transition; status and driver are
    /// server-owned and ignored when present in the body.
    #[oai(path = "/:resource_id", method = "put", operation_id = "update_resource")]
    async fn update_resource(
        &self,
        resource_id: Path<Uuid>,
        body: Json<ResourceAllocationRequest>,
    ) -> Result<Json<ResourceResponse>> {
        let resource = match body.0.resource.allocated {
            Some(true) => self.resource_service.allocate(&resource_id.0).await?,
            Some(false) => self.resource_service.deallocate(&resource_id.0).await?,
            None => self.resource_service.get(&resource_id.0).await?,
        };
        Ok(Json(ResourceResponse { resource }))
    }

    /// Delete a resource
    ///
    /// Schedules asynchronous teardown and removal. With `force=true` the
    /// resource reaches DELETED even if the driver fails to tear it down.
    #[oai(
        path = "/:resource_id",
        method = "delete",
        operation_id = "delete_resource"
    )]
    async fn delete_resource(
        &self,
        resource_id: Path<Uuid>,
        force: Query<Option<bool>>,
    ) -> Result<DeleteResourceResponse> {
        self.resource_service
            .delete(&resource_id.0, force.0.unwrap_or(false))
            .await?;
        Ok(DeleteResourceResponse::Deleted)
    }
}
