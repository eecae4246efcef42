use followup::api::{self, AppState};
use followup::config::Config;
use followup::middleware::whitelist_middleware;
use followup::repositories::Stores;
use followup::services::{DryRunDispatcher, HttpDispatcher, MessageDispatcher};

use axum::middleware;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "followup=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting follow-up engine v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();

    let stores = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await?;
            info!("Database connected");

            if config.run_migrations {
                sqlx::migrate!("./migrations").run(&pool).await?;
                info!("Migrations applied");
            }

            Stores::postgres(pool)
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store; data is lost on restart");
            Stores::in_memory()
        }
    };

    let dispatcher: Arc<dyn MessageDispatcher> = match &config.dispatcher_url {
        Some(url) => {
            info!("Dispatching messages through {}", url);
            Arc::new(HttpDispatcher::new(
                url.clone(),
                config.dispatcher_token.clone(),
                config.engine.dispatch_timeout,
            )?)
        }
        None => {
            warn!("DISPATCHER_URL not set, messages are logged instead of sent");
            Arc::new(DryRunDispatcher)
        }
    };

    let state = AppState::new(stores, dispatcher, &config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_task = if config.scheduler.enabled {
        Some(tokio::spawn(state.scheduler.clone().run(shutdown_rx)))
    } else {
        info!("Scheduler disabled; use POST /scheduler/run to process due executions");
        None
    };

    let whitelist = Arc::new(config.whitelist.clone());
    let app = api::build_router(state)
        .layer(middleware::from_fn_with_state(whitelist, whitelist_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr();
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("HTTP server stopped, waiting for the scheduler");
    let _ = shutdown_tx.send(true);
    if let Some(task) = scheduler_task {
        if let Err(err) = task.await {
            warn!("Scheduler task ended abnormally: {}", err);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
