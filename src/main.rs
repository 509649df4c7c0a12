mod config;
mod controllers;
mod errors;
mod models;
mod service;
mod utils;

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use color_eyre::Result;
use eyre::WrapErr;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{config::Config, routes::routes},
    service::{
        email_service::notifier_from_config,
        handler::{AppState, app_config, spawn_sweeper},
        store::{MemoryTeamStore, PgTeamStore, TeamStore},
    },
    utils::clock::SystemClock,
};

async fn team_store(config: &Config) -> Result<Arc<dyn TeamStore>> {
    if config.database_url().is_none() {
        warn!("DATABASE_URL not set, using in-memory team store; registrations will not survive a restart");
        return Ok(Arc::new(MemoryTeamStore::new()));
    }

    let store = PgTeamStore::new(config.db_pool().await?);
    store.migrate().await.wrap_err("Running migrations")?;
    Ok(Arc::new(store))
}

#[actix_web::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let store = team_store(&config).await?;
    let notifier = notifier_from_config(&config)?;
    let state = web::Data::new(AppState::new(
        &config,
        store,
        notifier,
        Arc::new(SystemClock),
    ));

    if let Some(every) = config.sweep_interval() {
        spawn_sweeper(state.clone(), every);
    }

    let bind = format!("{}:{}", config.host, config.port);
    info!(%bind, platform = %config.platform_name, "Starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(app_config)
            .configure(routes)
    })
    .bind(&bind)
    .wrap_err_with(|| format!("Binding {bind}"))?
    .run()
    .await?;

    Ok(())
}
