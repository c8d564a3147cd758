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

use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ApiTags;
use crate::model::ErrorBody;
use crate::service::{ResourceError as ResourceServiceError, ResourceService};

#[derive(ApiResponse, Debug, Clone)]
pub enum DriverApiError {
    /// Driver not found
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
    /// Internal server error
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

type Result<T> = std::result::Result<T, DriverApiError>;

impl From<ResourceServiceError> for DriverApiError {
    fn from(value: ResourceServiceError) -> Self {
        match value {
            ResourceServiceError::UnknownDriver(_) => DriverApiError::NotFound(Json(ErrorBody {
                error: value.to_string(),
            })),
            other => DriverApiError::InternalError(Json(ErrorBody {
                error: other.to_string(),
            })),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct DriversResponse {
    pub drivers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct DriverResponse {
    /// The driver's resource schema descriptor.
    pub driver: Value,
}

pub struct DriversApi {
    resource_service: Arc<ResourceService>,
}

#[OpenApi(prefix_path = "/v1/drivers", tag = ApiTags::Driver)]
impl DriversApi {
    pub fn new(resource_service: Arc<ResourceService>) -> Self {
        Self { resource_service }
    }

    /// Return the list of configured driver names
    #[oai(path = "/", method = "get", operation_id = "list_drivers")]
    async fn list_drivers(&self) -> Json<DriversResponse> {
        Json(DriversResponse {
            drivers: self.resource_service.driver_names(),
        })
    }

    /// Get a driver's resource schema
    #[oai(path = "/:driver_name", method = "get", operation_id = "get_driver")]
    async fn get_driver(&self, driver_name: Path<String>) -> Result<Json<DriverResponse>> {
        let schema = self.resource_service.schema(&driver_name.0)?;
        Ok(Json(DriverResponse { driver: schema }))
    }
}
