use std::sync::Arc;

use anyhow::Context;

use docket_infra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load configuration")?;
    docket_observability::init(settings.log.format);

    if settings.auth.uses_dev_secret() {
        tracing::warn!("auth.jwt_secret not set; using insecure dev default with the in-memory store");
    }

    let services = Arc::new(docket_api::app::services::build_services(&settings).await?);
    let app = docket_api::app::build_app(services, settings.auth.jwt_secret.clone());

    let listener = tokio::net::TcpListener::bind(&settings.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.http.bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
