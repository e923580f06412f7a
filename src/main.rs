use std::process;

use dotenvy::dotenv;
use log::{error, info};

use opsdesk::{
    config::Config,
    create_router,
    database::{create_database_pool, run_migrations},
    services::spawn_deadline_checker,
    shutdown_signal,
    state::AppState,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    let config = Config::load().unwrap_or_else(|e| {
        error!("Configuration error: {e}");
        process::exit(1);
    });

    let db = create_database_pool(&config.database_url).await.unwrap_or_else(|e| {
        error!("Failed to connect to database: {e}");
        process::exit(1);
    });

    if let Err(e) = run_migrations(&db).await {
        error!("Failed to run migrations: {e}");
        process::exit(1);
    }

    let state = AppState::new(db, config);
    spawn_deadline_checker(state.clone());

    let addr = format!("0.0.0.0:{}", state.config.port);
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            process::exit(1);
        }
    };

    info!("Server listening on http://{addr}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
    }

    info!("Server shut down");
}
