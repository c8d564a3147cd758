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

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolServiceConfig {
    pub environment: String,
    pub tracing: TracingConfig,
    pub http_host: String,
    pub http_port: u16,
    pub db: DbConfig,
    pub workers_count: usize,
    #[serde(with = "humantime_serde")]
    pub task_queue_timeout: Duration,
    pub task_queue_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub sleep_time: Duration,
    pub drivers: HashMap<String, DriverPoolConfig>,
}

impl Default for PoolServiceConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            tracing: TracingConfig::default(),
            http_host: "0.0.0.0".to_string(),
            http_port: 8585,
            db: DbConfig::default(),
            workers_count: 5,
            task_queue_timeout: Duration::from_secs(5),
            task_queue_capacity: 1024,
            sleep_time: Duration::from_secs(30),
            drivers: HashMap::from([(
                "fake".to_string(),
                DriverPoolConfig {
                    low_watermark: 2,
                    high_watermark: 5,
                    driver: DriverKindConfig::Fake(FakeDriverConfig::default()),
                },
            )]),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Default `EnvFilter` directive, overridable through `RUST_LOG`.
    pub level: String,
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_output: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbConfig {
    Postgres(DbPostgresConfig),
    Sqlite(DbSqliteConfig),
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig::Sqlite(DbSqliteConfig {
            database: "netpool.db".to_string(),
            max_connections: 10,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbPostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub schema: Option<String>,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbSqliteConfig {
    pub database: String,
    pub max_connections: u32,
}

/// Per-driver pool policy: the watermarks the balancer keeps the pool
/// between, and the driver implementation managing the resources.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverPoolConfig {
    pub low_watermark: u64,
    pub high_watermark: u64,
    pub driver: DriverKindConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKindConfig {
    Fake(FakeDriverConfig),
    VRouter(VRouterDriverConfig),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FakeDriverConfig {
    pub class: String,
}

impl Default for FakeDriverConfig {
    fn default() -> Self {
        Self {
            class: "network.router".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VRouterDriverConfig {
    /// Base URL of the provisioner API that boots router instances.
    pub api_url: Url,
    pub image_id: String,
    pub flavor: String,
    pub management_network_id: String,
    pub management_network_cidr: String,
    /// Port on which a booted router answers management requests.
    pub api_port: u16,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub spawn_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub boot_timeout: Duration,
}

pub struct ConfigLoader<T: Default + Serialize + DeserializeOwned> {
    pub config_file_name: PathBuf,
    marker: PhantomData<T>,
}

impl<T: Default + Serialize + DeserializeOwned> ConfigLoader<T> {
    pub fn new(config_file_name: &Path) -> Self {
        Self {
            config_file_name: config_file_name.to_path_buf(),
            marker: PhantomData,
        }
    }

    fn figment(&self) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(T::default()))
            .merge(Toml::file(&self.config_file_name))
            .merge(Env::prefixed("NETPOOL__").split("__"))
    }

    pub fn load(&self) -> figment::Result<T> {
        self.figment().extract()
    }

    pub fn dump_default(&self) -> String {
        toml::to_string(&T::default()).expect("Failed to serialize default config")
    }
}

pub fn make_config_loader() -> ConfigLoader<PoolServiceConfig> {
    ConfigLoader::new(&PathBuf::from("config/netpool-service.toml"))
}

pub fn init_tracing(config: &TracingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    if config.json_output {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
