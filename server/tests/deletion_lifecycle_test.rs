//! Deletion Lifecycle Integration Tests
//!
//! End-to-end scenarios over the in-memory stores: scheduling with a grace
//! period, the expiry sweep, the cross-system purge, verification and
//! certification, and partial-failure handling.

mod helpers;

use axum::http::Method;
use helpers::{backdate_schedule, body_to_json, seed_user, TestApp};
use privacy_server::deletion::scheduler;
use privacy_server::stores::{DocumentStore, IdentityProvider, ObjectStore};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn schedule_requires_confirmation_string() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::post_json(
            "/api/me/deletion",
            &token,
            &json!({ "confirm": "WRONG" }),
        ))
        .await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn schedule_sets_grace_period_and_recovery_code() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::post_json(
            "/api/me/deletion",
            &token,
            &json!({ "confirm": "DELETE" }),
        ))
        .await;
    assert_eq!(resp.status(), 200);

    let body = body_to_json(resp).await;
    assert_eq!(body["status"], "scheduled");
    assert_eq!(body["can_recover"], true);
    assert!(body["scheduled_deletion_date"].is_string());

    // The user document carries the deletion flag.
    let user = app
        .docs
        .get("users", &user_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(user.data["deletion_scheduled_at"].is_string());

    // Exactly one pending recovery code was issued.
    helpers::stored_recovery_code(&app, user_id).await;

    // A second deletion request conflicts.
    let resp = app
        .oneshot(TestApp::post_json(
            "/api/me/deletion",
            &token,
            &json!({ "confirm": "DELETE" }),
        ))
        .await;
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn expired_schedule_is_swept_executed_verified_and_certified() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    seed_user(&app, user_id).await;
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

    // Grace period elapses with no recovery.
    backdate_schedule(&app, &request_id).await;
    scheduler::run_due_deletions(&app.state).await;

    // Every system is clean.
    assert!(app.docs.get("users", &uid).await.unwrap().is_none());
    assert_eq!(app.docs.len("activity_sessions"), 0);
    assert_eq!(app.docs.len("consents"), 0);
    assert!(app.docs.get("settings", &uid).await.unwrap().is_none());
    assert_eq!(app.objects.object_count(), 0);
    assert_eq!(app.billing.customer_count(), 0);
    assert!(app.identity.get_user(&uid).await.unwrap().is_none());

    // The request completed and references a certificate.
    let request = app
        .docs
        .get("deletion_requests", &request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.data["status"], "completed");
    let certificate_id = request.data["certificate_id"].as_str().unwrap().to_string();

    // The certificate records a fully verified deletion.
    let cert = app
        .docs
        .get("deletion_certificates", &certificate_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cert.data["verification_result"]["document_store_verified"], true);
    assert_eq!(cert.data["verification_result"]["identity_verified"], true);
    assert_eq!(cert.data["verification_result"]["object_store_verified"], true);
    assert_eq!(cert.data["verification_result"]["warehouse_verified"], true);
    assert_eq!(
        cert.data["verification_result"]["remaining"]
            .as_array()
            .unwrap()
            .len(),
        0
    );
    // Only the hash of the user id appears anywhere on the certificate.
    assert_ne!(cert.data["user_id_hash"], uid);

    // A second sweep pass finds nothing to do.
    scheduler::run_due_deletions(&app.state).await;
    let request = app
        .docs
        .get("deletion_requests", &request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.data["status"], "completed");
}

#[tokio::test]
async fn immediate_deletion_skips_the_grace_period() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::post_json(
            "/api/me/deletion",
            &token,
            &json!({ "confirm": "DELETE", "immediate": true }),
        ))
        .await;
    assert_eq!(resp.status(), 200);

    let body = body_to_json(resp).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["can_recover"], false);
    assert!(body["certificate_id"].is_string());

    assert!(app.docs.get("users", &uid).await.unwrap().is_none());
    assert!(app.identity.get_user(&uid).await.unwrap().is_none());
}

#[tokio::test]
async fn object_store_failure_is_recorded_but_non_fatal() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    seed_user(&app, user_id).await;

    // A third media file that refuses deletion.
    let stuck_key = format!("users/{uid}/media/stuck.fit");
    app.objects
        .upload(&stuck_key, vec![1, 2, 3], "application/octet-stream")
        .await
        .unwrap();
    app.objects.fail_delete(&stuck_key);

    let result = privacy_server::deletion::executor::execute(
        &app.state,
        &uid,
        "req-objects",
        &["all".to_string()],
    )
    .await;

    // Two of three files removed; the overall purge still succeeds.
    assert!(result.success);
    assert_eq!(result.object_store.removed, 2);
    assert!(result.errors.iter().any(|e| e.contains("stuck.fit")));
    assert!(result.identity_deleted);
}

#[tokio::test]
async fn missing_warehouse_table_counts_as_verified_clean() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    seed_user(&app, user_id).await;
    app.warehouse.set_table_missing(true);

    let result = privacy_server::deletion::executor::execute(
        &app.state,
        &uid,
        "req-warehouse",
        &["all".to_string()],
    )
    .await;
    assert!(result.success, "missing table must not fail the purge");

    let verification =
        privacy_server::deletion::verifier::verify(&app.state, &uid, &["all".to_string()]).await;
    assert!(verification.warehouse_verified);
    assert!(verification.all_verified());
}

#[tokio::test]
async fn identity_failure_fails_the_whole_operation() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    seed_user(&app, user_id).await;
    app.identity.fail_delete(true);

    let result = privacy_server::deletion::executor::execute(
        &app.state,
        &uid,
        "req-identity",
        &["all".to_string()],
    )
    .await;

    assert!(!result.success);
    assert!(!result.identity_deleted);
    assert!(result.errors.iter().any(|e| e.contains("identity")));
    // Earlier, more privacy-critical systems were still purged.
    assert!(result.document_store.ok);
}

#[tokio::test]
async fn deletion_status_endpoint_reports_latest_request() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::get("/api/me/deletion", &token))
        .await;
    assert_eq!(resp.status(), 404, "no request yet");

    let resp = app
        .oneshot(TestApp::post_json(
            "/api/me/deletion",
            &token,
            &json!({ "confirm": "DELETE" }),
        ))
        .await;
    assert_eq!(resp.status(), 200);

    let resp = app
        .oneshot(TestApp::get("/api/me/deletion", &token))
        .await;
    assert_eq!(resp.status(), 200);
    let body = body_to_json(resp).await;
    assert_eq!(body["status"], "scheduled");
    assert_eq!(body["can_recover"], true);
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let app = TestApp::new();

    let resp = app
        .oneshot(
            TestApp::request(Method::POST, "/api/me/deletion")
                .header("Content-Type", "application/json")
                .body(axum::body::Body::from(
                    json!({ "confirm": "DELETE" }).to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), 401);
}
