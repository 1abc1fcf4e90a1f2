#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use bouncer_core::{admission, engine::WhitelistEngine, fetch, kv, options::OptionsStore, table};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::{Config, TablesBackend},
    server::{AppState, build_router},
};

pub mod config;
pub mod server;


pub fn build_state(config: &Config) -> Result<AppState> {
    let kv = match &config.state_path {
        Some(path) => kv::json_file(path.clone()),
        None => kv::memory(),
    };
    let fetcher = fetch::default_fetcher(config.http_timeout);
    let mut engine = WhitelistEngine::new(Arc::clone(&kv), Arc::clone(&fetcher));
    if config.tables == TablesBackend::JsonGrid {
        engine = engine.with_tables(table::json_grid(Arc::clone(&fetcher)));
    }
    if let Some(descriptor) = &config.default_source {
        // A broken default descriptor is a deployment mistake; fail at
        // startup instead of at the first `default` row.
        let source = WhitelistEngine::parse_source_descriptor(descriptor)
            .context("invalid BOUNCERD_DEFAULT_SOURCE")?;
        engine = engine.with_default_source(source);
    }
    if let Some(token) = &config.api_token {
        engine = engine.with_default_token(token.clone());
    }
    let options = OptionsStore::new(kv, admission::admission_options());
    Ok(AppState::new(Arc::new(engine), Arc::new(options)))
}

pub fn build_app(config: &Config) -> Result<axum::Router> {
    Ok(build_router(build_state(config)?))
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(bind_addr = %config.bind_addr, "bouncerd listening");
    axum::serve(listener, build_app(&config)?).await?;
    Ok(())
}
