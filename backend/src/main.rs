use producer_market::{
    AppState, LogSmsSender,
    auth::bootstrap_admin,
    config::{AppConfig, Env},
    create_router,
    repository::{PostgresRepository, RepositoryState},
    services::housekeeping::spawn_purge_task,
    sms::SmsState,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initializes logging, connects and migrates the
/// database, then serves the HTTP API.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise verbose crate logs.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "producer_market=debug,tower_http=info,sqlx=warn".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Database migrations failed.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 4. Admin account from ADMIN_PHONE / ADMIN_PASSWORD
    match bootstrap_admin(&repo, &config).await {
        Ok(Some(_)) => {}
        Ok(None) => tracing::info!("ADMIN_PHONE/ADMIN_PASSWORD not set, skipping admin bootstrap"),
        Err(e) => panic!("FATAL: admin bootstrap failed: {e}"),
    }

    // 5. Background sweeper for expired carts and verification sessions
    spawn_purge_task(repo.clone(), Duration::from_secs(config.purge_interval_secs));

    // 6. SMS transport. Codes are logged until a carrier integration is configured.
    let sms = Arc::new(LogSmsSender) as SmsState;

    let bind_addr = config.bind_addr.clone();
    let app = create_router(AppState { repo, sms, config });

    // 7. Server
    let listener = TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("FATAL: cannot bind {bind_addr}: {e}"));

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("FATAL: HTTP server terminated unexpectedly.");
}
