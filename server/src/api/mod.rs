//! API Router and Application State
//!
//! Central routing configuration and shared state.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    audit::AuditTrail,
    config::Config,
    deletion::{self, RecoveryCodeManager},
    email::EmailService,
    export,
    ratelimit::AttemptStore,
    stores::{AnalyticsWarehouse, BillingProcessor, DocumentStore, IdentityProvider, ObjectStore},
    webhook::{self, IdempotencyGuard},
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Structured document store (also the control-plane persistence layer)
    pub docs: Arc<dyn DocumentStore>,
    /// Object store for media and export archives (optional)
    pub objects: Option<Arc<dyn ObjectStore>>,
    /// Analytics warehouse
    pub warehouse: Arc<dyn AnalyticsWarehouse>,
    /// Identity provider admin API
    pub identity: Arc<dyn IdentityProvider>,
    /// Billing processor API
    pub billing: Arc<dyn BillingProcessor>,
    /// Server configuration
    pub config: Arc<Config>,
    /// Append-only audit writer
    pub audit: AuditTrail,
    /// Webhook event deduplication
    pub idempotency: IdempotencyGuard,
    /// Recovery code issuance and verification
    pub recovery: RecoveryCodeManager,
    /// Email notifications (optional)
    pub email: Option<Arc<EmailService>>,
    /// Advisory attempt counters
    pub attempts: Arc<AttemptStore>,
}

impl AppState {
    /// Create new application state, wiring the shared services off the
    /// document store.
    #[must_use]
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        objects: Option<Arc<dyn ObjectStore>>,
        warehouse: Arc<dyn AnalyticsWarehouse>,
        identity: Arc<dyn IdentityProvider>,
        billing: Arc<dyn BillingProcessor>,
        config: Config,
        email: Option<Arc<EmailService>>,
    ) -> Self {
        let audit = AuditTrail::new(docs.clone(), &config.hash_salt);
        let idempotency = IdempotencyGuard::new(docs.clone());
        let recovery = RecoveryCodeManager::new(
            docs.clone(),
            audit.clone(),
            config.recovery_code_ttl_minutes,
            config.recovery_code_max_attempts,
        );

        Self {
            docs,
            objects,
            warehouse,
            identity,
            billing,
            config: Arc::new(config),
            audit,
            idempotency,
            recovery,
            email,
            attempts: Arc::new(AttemptStore::new()),
        }
    }

    /// Check if object storage is configured and available.
    #[must_use]
    pub const fn has_object_storage(&self) -> bool {
        self.objects.is_some()
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/me/export",
            post(export::handlers::request_export).get(export::handlers::get_export_status),
        )
        .route(
            "/api/me/deletion",
            post(deletion::handlers::request_deletion).get(deletion::handlers::get_deletion_status),
        )
        .route(
            "/api/deletion/recover",
            post(deletion::handlers::recover_account),
        )
        .route(
            "/api/certificates/{certificate_id}/validate",
            get(deletion::handlers::validate_certificate_handler),
        )
        .route(
            "/api/webhooks/billing",
            post(webhook::handlers::receive_billing_event),
        )
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    object_storage: bool,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        object_storage: state.has_object_storage(),
    })
}
