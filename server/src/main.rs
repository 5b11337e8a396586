//! Stride Privacy Server - Main Entry Point

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use privacy_server::stores::{
    HttpBillingProcessor, HttpIdentityProvider, MemoryDocumentStore, MemoryWarehouse,
    PostgresDocumentStore, PostgresWarehouse, S3ObjectStore,
};
use privacy_server::stores::{
    AnalyticsWarehouse, BillingProcessor, DocumentStore, IdentityProvider, ObjectStore,
};
use privacy_server::{api, config, deletion, email};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "privacy_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Stride Privacy Server"
    );

    // Initialize the document store and warehouse
    let (docs, warehouse): (Arc<dyn DocumentStore>, Arc<dyn AnalyticsWarehouse>) =
        match &config.database_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;
                let docs = PostgresDocumentStore::new(pool.clone());
                docs.migrate().await?;
                info!("Postgres document store connected");
                (Arc::new(docs), Arc::new(PostgresWarehouse::new(pool)))
            }
            None => {
                tracing::warn!(
                    "DATABASE_URL not set; using in-memory stores (data is not persisted)"
                );
                (
                    Arc::new(MemoryDocumentStore::new()),
                    Arc::new(MemoryWarehouse::new()),
                )
            }
        };

    // Initialize object storage (optional - exports and media purges are
    // disabled if the bucket is unreachable)
    let objects: Option<Arc<dyn ObjectStore>> = {
        let store = S3ObjectStore::new(&config);
        match store.health_check().await {
            Ok(()) => {
                info!(bucket = %config.s3_bucket, "Object storage connected");
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::warn!("Object storage health check failed: {e}. Exports disabled.");
                None
            }
        }
    };

    // External collaborators
    let identity: Arc<dyn IdentityProvider> = Arc::new(HttpIdentityProvider::new(&config)?);
    let billing: Arc<dyn BillingProcessor> = Arc::new(HttpBillingProcessor::new(&config)?);

    // Email notifications (optional)
    let email_service = if config.has_smtp() {
        match email::EmailService::new(&config) {
            Ok(service) => {
                info!("Email notifications enabled");
                Some(Arc::new(service))
            }
            Err(e) => {
                tracing::warn!("Email service initialization failed: {e}. Notifications disabled.");
                None
            }
        }
    } else {
        info!("SMTP not configured; notifications disabled");
        None
    };

    // Build application state and router
    let state = api::AppState::new(
        docs,
        objects,
        warehouse,
        identity,
        billing,
        config.clone(),
        email_service,
    );
    let app = api::create_router(state.clone());

    // Background tasks: the deletion sweep and the hourly maintenance pass
    let _sweep = deletion::scheduler::spawn_deletion_sweep_task(state.clone());
    let _maintenance = deletion::scheduler::spawn_maintenance_task(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
