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

use crate::service::Services;
use poem::Route;
use poem_openapi::{OpenApiService, Tags};

pub mod drivers;
pub mod healthcheck;
pub mod meta;
pub mod resources;

#[derive(Tags)]
enum ApiTags {
    Resource,
    Driver,
    Meta,
    HealthCheck,
}

pub fn combined_routes(services: &Services) -> Route {
    let api_service = make_open_api_service(services);

    let ui = api_service.swagger_ui();
    let spec = api_service.spec_endpoint_yaml();

    Route::new()
        .nest("/", api_service)
        .nest("/docs", ui)
        .nest("/specs", spec)
}

type ApiServices = (
    resources::ResourcesApi,
    drivers::DriversApi,
    meta::MetaApi,
    healthcheck::HealthcheckApi,
);

pub fn make_open_api_service(services: &Services) -> OpenApiService<ApiServices, ()> {
    OpenApiService::new(
        (
            resources::ResourcesApi::new(services.resource_service.clone()),
            drivers::DriversApi::new(services.resource_service.clone()),
            meta::MetaApi,
            healthcheck::HealthcheckApi,
        ),
        "Netpool API",
        "1.0",
    )
}
