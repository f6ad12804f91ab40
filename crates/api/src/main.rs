use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use voxgate_api::state::AppState;
use voxgate_config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    let addr = format!("{}:{}", settings.host, settings.port);

    let state = AppState::build(settings)?;
    let router = voxgate_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "voxgate listening");
    axum::serve(listener, router).await?;
    Ok(())
}
