//! Deletion Certificate Integration Tests
//!
//! Round-trip validation, tamper evidence, and the distinction between a
//! missing certificate and an integrity failure.

mod helpers;

use axum::http::Method;
use helpers::{backdate_schedule, body_to_json, seed_user, TestApp};
use privacy_server::deletion::scheduler;
use privacy_server::stores::DocumentStore;
use serde_json::json;
use uuid::Uuid;

/// Run a full scheduled deletion and return the issued certificate id.
async fn deleted_user_certificate(app: &TestApp) -> String {
    let user_id = Uuid::new_v4();
    seed_user(app, user_id).await;
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::post_json(
            "/api/me/deletion",
            &token,
            &json!({ "confirm": "DELETE" }),
        ))
        .await;
    assert_eq!(resp.status(), 200);
    let request_id = body_to_json(resp).await["request_id"]
        .as_str()
        .unwrap()
        .to_string();

    backdate_schedule(app, &request_id).await;
    scheduler::run_due_deletions(&app.state).await;

    let request = app
        .docs
        .get("deletion_requests", &request_id)
        .await
        .unwrap()
        .unwrap();
    request.data["certificate_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn issued_certificate_validates() {
    let app = TestApp::new();
    let certificate_id = deleted_user_certificate(&app).await;

    let resp = app
        .oneshot(
            TestApp::request(
                Method::GET,
                &format!("/api/certificates/{certificate_id}/validate"),
            )
            .body(axum::body::Body::empty())
            .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), 200);

    let body = body_to_json(resp).await;
    assert_eq!(body["valid"], true);
    assert!(body.get("error").is_none());

    let certificate = &body["certificate"];
    assert_eq!(certificate["signature_algorithm"], "hmac-sha256");
    assert_eq!(certificate["deleted_data"]["identity_deleted"], true);
    assert_eq!(certificate["deleted_data"]["object_files_count"], 2);
    assert!(certificate["deleted_data"]["collections_affected"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "activity_sessions"));
}

#[tokio::test]
async fn tampering_with_any_field_invalidates_the_signature() {
    let app = TestApp::new();
    let certificate_id = deleted_user_certificate(&app).await;

    // Flip one stored field behind the issuer's back.
    app.docs
        .update(
            "deletion_certificates",
            &certificate_id,
            json!({ "deleted_data": {
                "collections_affected": ["activity_sessions"],
                "object_files_count": 0,
                "warehouse_rows_affected": 0,
                "identity_deleted": false,
            }}),
        )
        .await
        .unwrap();

    let resp = app
        .oneshot(
            TestApp::request(
                Method::GET,
                &format!("/api/certificates/{certificate_id}/validate"),
            )
            .body(axum::body::Body::empty())
            .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), 200, "integrity failures are surfaced, not hidden");

    let body = body_to_json(resp).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["error"], "signature mismatch");
    assert!(body["certificate"].is_object());
}

#[tokio::test]
async fn unknown_certificate_is_not_found_not_invalid() {
    let app = TestApp::new();

    let resp = app
        .oneshot(
            TestApp::request(Method::GET, "/api/certificates/cert-0-missing/validate")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), 404);
}
