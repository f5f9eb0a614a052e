use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use showtime_booking::{app, config::Config, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.app.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        "Starting showtime booking API ({} environment)",
        config.app.environment
    );

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    let cleanup_interval = config.reservation.cleanup_interval();

    let state = AppState::new(config).await?;
    info!("Database and Redis connected");

    // --- Фоновые задачи ---

    // Истечение удержаний по дедлайнам
    task::spawn(Arc::clone(&state.reservations).run_expiry_loop());

    // Периодическая уборка: пропущенные сессии и зависшие PENDING брони
    task::spawn(Arc::clone(&state.cleanup).start(cleanup_interval));

    // --- Веб-сервер ---

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
