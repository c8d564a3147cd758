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

use poem_openapi::payload::Json;
use poem_openapi::*;
use serde::{Deserialize, Serialize};

use crate::api::ApiTags;

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct ApiVersionsResponse {
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct CollectionsResponse {
    pub collections: Vec<String>,
}

pub struct MetaApi;

#[OpenApi(tag = ApiTags::Meta)]
impl MetaApi {
    /// List the available API versions
    #[oai(path = "/", method = "get", operation_id = "list_versions")]
    async fn list_versions(&self) -> Json<ApiVersionsResponse> {
        Json(ApiVersionsResponse {
            versions: vec!["v1".to_string()],
        })
    }

    /// List the collections of the v1 API
    #[oai(path = "/v1", method = "get", operation_id = "list_collections")]
    async fn list_collections(&self) -> Json<CollectionsResponse> {
        Json(CollectionsResponse {
            collections: vec!["drivers".to_string(), "resources".to_string()],
        })
    }
}
