use tracing_subscriber::EnvFilter;

use unme_relay::config::ServerConfig;
use unme_relay::jwt::JwtService;
use unme_relay::router::build_router;
use unme_relay::shutdown::shutdown_signal;
use unme_relay::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let pool = unme_relay::db::connect(&config).await?;
    let jwt = JwtService::new(&config)?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(pool, config, jwt);
    let registry = state.registry.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Relay listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            registry.shutdown_all();
        })
        .await?;

    Ok(())
}
