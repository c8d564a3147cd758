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

use std::time::Duration;

use netpool_service::config::{init_tracing, make_config_loader, DbConfig, PoolServiceConfig};
use netpool_service::service::Services;
use netpool_service::{api, db, metrics};
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::EndpointExt;
use tracing::{error, info};

fn main() -> Result<(), std::io::Error> {
    let config_loader = make_config_loader();

    if std::env::args().any(|arg| arg == "--dump-config") {
        println!("{}", config_loader.dump_default());
        return Ok(());
    }

    let config = config_loader.load().map_err(|e| {
        eprintln!("Failed to load config: {}", e);
        std::io::Error::other(format!("Config error: {e}"))
    })?;

    init_tracing(&config.tracing);
    let prometheus_registry = metrics::register_all();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(&config, prometheus_registry))
}

async fn async_main(
    config: &PoolServiceConfig,
    prometheus_registry: prometheus::Registry,
) -> Result<(), std::io::Error> {
    info!(
        "Starting netpool server on {}:{}",
        config.http_host, config.http_port
    );

    match config.db.clone() {
        DbConfig::Postgres(c) => {
            db::postgres_migrate(&c).await.map_err(|e| {
                error!("DB - init error: {}", e);
                std::io::Error::other(format!("Init error: {e:?}"))
            })?;
        }
        DbConfig::Sqlite(c) => {
            db::sqlite_migrate(&c).await.map_err(|e| {
                error!("DB - init error: {}", e);
                std::io::Error::other(format!("Init error: {e:?}"))
            })?;
        }
    };

    let services = Services::new(config).await.map_err(|e| {
        error!("Services - init error: {}", e);
        std::io::Error::other(e)
    })?;

    let app = api::combined_routes(&services)
        .nest(
            "/metrics",
            poem::endpoint::PrometheusExporter::new(prometheus_registry),
        )
        .with(Tracing);

    let listener = TcpListener::bind(format!("{}:{}", config.http_host, config.http_port));
    poem::Server::new(listener)
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
            },
            Some(Duration::from_secs(10)),
        )
        .await?;

    services.shutdown().await;
    Ok(())
}
