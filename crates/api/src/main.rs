use anyhow::Context;

use tollgate_api::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    tollgate_observability::init(config.log_format);

    tracing::info!(
        issuer = %config.token.issuer,
        audience = %config.token.audience,
        jwks_url = %config.token.jwks_url,
        token_prefix = %config.token.prefix,
        integrity_route = %config.integrity.route,
        validate_only = config.integrity.upstream.is_none(),
        "starting gateway"
    );

    let app = tollgate_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
