#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::dbg_macro, clippy::use_debug)]
#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,
    clippy::unreachable
)]
#![warn(
    clippy::self_named_module_files,
    clippy::shadow_unrelated,
    clippy::str_to_string,
    clippy::wildcard_enum_match_arm
)]

use std::{env, sync::Arc};

use axum::Router;
use eyre::{Context, Result};

mod clock;
mod config;
mod endpoints;
mod oidc;
mod server;
mod session;
mod store;
mod strategy;

/// Discovers the provider and builds the application. Nothing listens until this succeeds.
async fn app(config: &config::Config) -> Result<Router> {
    let issuer = oidc::Issuer::discover(&config.discovery_url)
        .await
        .wrap_err_with(|| format!("could not discover issuer at {}", config.discovery_url))?;
    let client = oidc::OidcClient::new(issuer, config).wrap_err("could not build oidc client")?;
    let strategy = strategy::OidcStrategy::new(client, config.fetch_userinfo);
    Ok(endpoints::router(
        Arc::new(strategy),
        config.into(),
        store::SessionCache::default(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // initialize logger
    pretty_env_logger::formatted_builder()
        .parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();

    // initialize panic and error report handler
    color_eyre::install()?;

    // load config from config file and environment variables
    let config = config::load()?;

    let app = app(&config).await?;
    server::serve(app, &config).await
}
