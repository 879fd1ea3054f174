use std::net::{IpAddr, SocketAddr};

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use eyre::{Context, Result};
use log::info;
use tokio::net::TcpListener;

use crate::config::Config;

/// Serves HTTPS with the local certificate pair when running locally, plain
/// HTTP behind a TLS terminating proxy otherwise.
pub async fn serve(app: Router, config: &Config) -> Result<()> {
    let ip: IpAddr = config
        .host
        .parse()
        .wrap_err_with(|| format!("invalid listen host {}", config.host))?;
    let addr = SocketAddr::new(ip, config.port);

    if config.is_local() {
        // the rustls provider may already be installed, which is fine
        drop(rustls::crypto::ring::default_provider().install_default());
        let tls = RustlsConfig::from_pem_file(&config.tls_cert, &config.tls_key)
            .await
            .wrap_err_with(|| {
                format!(
                    "could not load TLS certificate {} and key {}",
                    config.tls_cert.display(),
                    config.tls_key.display()
                )
            })?;
        info!("Server listening on https://localhost:{}", config.port);
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("could not bind {addr}"))?;
        info!("Server listening on http://localhost:{}", config.port);
        axum::serve(listener, app).await?;
    }
    Ok(())
}
