//! Shared test harness
//!
//! Builds the full application against the in-memory store implementations
//! so every test is hermetic: no Postgres, no S3, no network.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use privacy_server::api::{create_router, AppState};
use privacy_server::auth::generate_access_token;
use privacy_server::config::Config;
use privacy_server::stores::{
    DocumentStore, FieldFilter, MemoryBillingProcessor, MemoryDocumentStore,
    MemoryIdentityProvider, MemoryObjectStore, MemoryWarehouse, ObjectStore, QueryOptions,
};

/// The application wired against in-memory collaborators, with direct
/// handles on each store for seeding and assertions.
pub struct TestApp {
    pub state: AppState,
    pub docs: Arc<MemoryDocumentStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub warehouse: Arc<MemoryWarehouse>,
    pub identity: Arc<MemoryIdentityProvider>,
    pub billing: Arc<MemoryBillingProcessor>,
    pub config: Config,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// An app with no object storage configured (exports unavailable).
    pub fn without_object_storage() -> Self {
        Self::build(false)
    }

    fn build(with_objects: bool) -> Self {
        let docs = Arc::new(MemoryDocumentStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let warehouse = Arc::new(MemoryWarehouse::new());
        let identity = Arc::new(MemoryIdentityProvider::new());
        let billing = Arc::new(MemoryBillingProcessor::new());
        let config = Config::default_for_test();

        let objects_arg: Option<Arc<dyn ObjectStore>> = if with_objects {
            Some(objects.clone())
        } else {
            None
        };
        let state = AppState::new(
            docs.clone(),
            objects_arg,
            warehouse.clone(),
            identity.clone(),
            billing.clone(),
            config.clone(),
            None,
        );
        let router = create_router(state.clone());

        Self {
            state,
            docs,
            objects,
            warehouse,
            identity,
            billing,
            config,
            router,
        }
    }

    /// Send one request through the router.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<axum::body::Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router never errors")
    }

    /// Start building a request.
    pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// An authenticated JSON POST.
    pub fn post_json(uri: &str, token: &str, body: &Value) -> Request<Body> {
        Self::request(Method::POST, uri)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    /// An unauthenticated JSON POST.
    pub fn post_json_public(uri: &str, body: &Value) -> Request<Body> {
        Self::request(Method::POST, uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    /// An authenticated GET.
    pub fn get(uri: &str, token: &str) -> Request<Body> {
        Self::request(Method::GET, uri)
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request builds")
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        generate_access_token(user_id, &self.config.jwt_secret, self.config.jwt_access_expiry)
            .expect("token generation")
    }
}

/// Decode a response body as JSON.
pub async fn body_to_json(response: Response<axum::body::Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

/// Seed one user with data in every system: profile + activity + consents +
/// settings documents, two media files, warehouse events, an identity
/// account and a billing customer.
pub async fn seed_user(app: &TestApp, user_id: Uuid) {
    let uid = user_id.to_string();
    let email = format!("{uid}@example.com");

    app.docs
        .set(
            "users",
            &uid,
            json!({
                "user_id": uid,
                "email": email,
                "display_name": "Test User",
                "avatar_key": format!("users/{uid}/avatar.png"),
                "avatar_content_type": "image/png",
            }),
        )
        .await
        .expect("seed user doc");

    for (n, sport) in ["run", "ride", "swim"].iter().enumerate() {
        app.docs
            .set(
                "activity_sessions",
                &format!("{uid}-session-{n}"),
                json!({
                    "user_id": uid,
                    "sport": sport,
                    "distance_km": 5.0 + n as f64,
                    "recorded_at": format!("2026-07-0{}T08:00:00Z", n + 1),
                }),
            )
            .await
            .expect("seed session");
    }

    app.docs
        .set(
            "consents",
            &format!("{uid}-consent-analytics"),
            json!({ "user_id": uid, "kind": "analytics", "granted": true }),
        )
        .await
        .expect("seed consent");

    app.docs
        .set(
            "settings",
            &uid,
            json!({ "user_id": uid, "units": "metric", "week_starts": "monday" }),
        )
        .await
        .expect("seed settings");

    app.objects
        .upload(
            &format!("users/{uid}/avatar.png"),
            vec![0x89, 0x50, 0x4E, 0x47],
            "image/png",
        )
        .await
        .expect("seed avatar");
    app.objects
        .upload(
            &format!("users/{uid}/media/route.gpx"),
            b"<gpx/>".to_vec(),
            "application/gpx+xml",
        )
        .await
        .expect("seed media");

    let user_hash = app.state.audit.user_hash(&uid);
    app.warehouse.insert_event(&user_hash, "session_recorded");
    app.warehouse.insert_event(&user_hash, "app_opened");

    app.identity.insert_account(&uid, &email);
    app.billing.insert_customer(&uid, &format!("cus_{uid}"));
}

/// The stored recovery code for a user, straight from the store (tests have
/// no inbox to read the email from).
pub async fn stored_recovery_code(app: &TestApp, user_id: Uuid) -> String {
    let codes = app
        .docs
        .query(
            "recovery_codes",
            &[
                FieldFilter::eq("user_id", user_id.to_string()),
                FieldFilter::eq("status", "pending"),
            ],
            QueryOptions::default(),
        )
        .await
        .expect("query codes");
    assert_eq!(codes.len(), 1, "expected exactly one pending code");
    codes[0].data["code"]
        .as_str()
        .expect("code is a string")
        .to_string()
}

/// Backdate a scheduled deletion so the sweep considers it due.
pub async fn backdate_schedule(app: &TestApp, request_id: &str) {
    app.docs
        .update(
            "deletion_requests",
            request_id,
            json!({
                "scheduled_deletion_date": "2020-01-01T00:00:00Z",
                "recover_deadline": "2020-01-01T00:00:00Z",
            }),
        )
        .await
        .expect("backdate schedule");
}
