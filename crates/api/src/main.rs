use anyhow::Context;

use scopegate_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scopegate_observability::init();

    let config = AppConfig::from_env()?;
    let app = scopegate_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
