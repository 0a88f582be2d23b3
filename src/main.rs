use boxed::api;
use boxed::logger::*;
use boxed::server::*;
use boxed::settings::*;
use std::fs;
use std::sync::Arc;
use tokio::signal;

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("could not listen for SIGINT: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap(cli.log_json);

    let project_settings = parse_settings(cli.settings.as_deref())?;
    info!(?project_settings);
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;

    let address: std::net::SocketAddr = project_settings.http.address.parse()?;
    if let Some((cert_path, key_path)) = project_settings.http.tls() {
        if !fs::metadata(cert_path)?.is_file() {
            return Err(anyhow::anyhow!(
                "TLS cert is not a regular file: {:?}",
                cert_path
            ));
        }
        if !fs::metadata(key_path)?.is_file() {
            return Err(anyhow::anyhow!("TLS key is not a regular file: {:?}", key_path));
        }
    }

    let server = Arc::new(Server::try_new(&project_settings).await?);
    let routes = api::filter(server.clone());

    match project_settings.http.tls() {
        Some((cert_path, key_path)) => {
            info!(%address, "listening with TLS");
            warp::serve(routes)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .bind_with_graceful_shutdown(address, shutdown_signal())
                .1
                .await;
        }
        None => {
            warn!(%address, "listening without TLS");
            warp::serve(routes)
                .try_bind_with_graceful_shutdown(address, shutdown_signal())?
                .1
                .await;
        }
    }

    let shutdown_timeout = std::time::Duration::from_secs(100);
    match tokio::time::timeout(shutdown_timeout, server.shutdown()).await {
        Ok(_) => info!("server shutdown successfully"),
        Err(_) => error!("server shutdown timed out"),
    }

    Ok(())
}
