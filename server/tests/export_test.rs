//! Data Export Integration Tests
//!
//! Drives the export job through the API, asserts on the published archive
//! in the in-memory object store, and exercises the failure and cleanup
//! paths.

mod helpers;

use std::io::Read;
use std::time::Duration;

use helpers::{body_to_json, seed_user, TestApp};
use privacy_server::export::cleanup_expired_exports;
use privacy_server::stores::DocumentStore;
use serde_json::json;
use uuid::Uuid;

/// Poll the status endpoint until the background job reaches a terminal
/// state.
async fn wait_for_terminal_status(app: &TestApp, token: &str) -> serde_json::Value {
    for _ in 0..200 {
        let resp = app.oneshot(TestApp::get("/api/me/export", token)).await;
        assert_eq!(resp.status(), 200);
        let body = body_to_json(resp).await;
        match body["status"].as_str() {
            Some("pending" | "processing") => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            _ => return body,
        }
    }
    panic!("export job never finished");
}

#[tokio::test]
async fn full_export_publishes_a_signed_archive() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::post_json(
            "/api/me/export",
            &token,
            &json!({ "format": "json" }),
        ))
        .await;
    assert_eq!(resp.status(), 201);
    let created = body_to_json(resp).await;
    let job_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "pending");

    let done = wait_for_terminal_status(&app, &token).await;
    assert_eq!(done["status"], "completed", "job: {done}");
    assert!(done["download_url"].as_str().unwrap().contains(&job_id));
    assert!(done["file_size_bytes"].as_i64().unwrap() > 0);
    // profile + 3 sessions + 1 consent + settings + billing + 3 files
    // (avatar + media + nothing else yet) + 2 analytics event types
    assert!(done["record_count"].as_i64().unwrap() >= 9);

    // The archive landed under the user's export prefix and is a zip with
    // one file per domain plus the README and avatar.
    let key = format!("exports/{uid}/{job_id}.zip");
    let bytes = app.objects.get_bytes(&key).expect("archive uploaded");
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    for expected in [
        "profile.json",
        "activity_sessions.json",
        "consents.json",
        "settings.json",
        "billing.json",
        "storage_files.json",
        "analytics.json",
        "README.txt",
        "profile_image.png",
    ] {
        assert!(names.contains(&expected.to_string()), "missing {expected} in {names:?}");
    }

    let mut sessions = String::new();
    archive
        .by_name("activity_sessions.json")
        .unwrap()
        .read_to_string(&mut sessions)
        .unwrap();
    let sessions: serde_json::Value = serde_json::from_str(&sessions).unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn csv_export_for_a_nearly_empty_user_still_succeeds() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    // Only a profile document; no sessions, consents, files or billing.
    app.docs
        .set("users", &uid, json!({ "user_id": uid, "email": format!("{uid}@example.com") }))
        .await
        .unwrap();
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::post_json(
            "/api/me/export",
            &token,
            &json!({ "format": "csv" }),
        ))
        .await;
    assert_eq!(resp.status(), 201);

    let done = wait_for_terminal_status(&app, &token).await;
    assert_eq!(done["status"], "completed", "job: {done}");
}

#[tokio::test]
async fn only_one_active_export_per_user() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    // Park a processing job directly in the store.
    app.docs
        .create(
            "export_archives",
            "job-active",
            json!({
                "user_id": user_id.to_string(),
                "status": "processing",
                "format": "json",
                "created_at": chrono::Utc::now().to_rfc3339(),
            }),
        )
        .await
        .unwrap();

    let resp = app
        .oneshot(TestApp::post_json("/api/me/export", &token, &json!({})))
        .await;
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn stale_jobs_are_failed_and_unblock_new_requests() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    // A processing job from two hours ago (crashed worker).
    app.docs
        .create(
            "export_archives",
            "job-stale",
            json!({
                "user_id": user_id.to_string(),
                "status": "processing",
                "format": "json",
                "created_at": (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339(),
            }),
        )
        .await
        .unwrap();

    let resp = app
        .oneshot(TestApp::post_json("/api/me/export", &token, &json!({})))
        .await;
    assert_eq!(resp.status(), 201, "the stale job must not block forever");

    let stale = app
        .docs
        .get("export_archives", "job-stale")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stale.data["status"], "failed");
}

#[tokio::test]
async fn publish_failure_marks_the_job_failed() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    app.objects.fail_uploads(true);

    let resp = app
        .oneshot(TestApp::post_json("/api/me/export", &token, &json!({})))
        .await;
    assert_eq!(resp.status(), 201);

    let done = wait_for_terminal_status(&app, &token).await;
    assert_eq!(done["status"], "failed");
    // The user-visible reason carries no backend detail.
    let message = done["error_message"].as_str().unwrap();
    assert!(!message.contains("simulated"), "internal detail leaked: {message}");
}

#[tokio::test]
async fn export_requires_object_storage() {
    let app = TestApp::without_object_storage();
    let user_id = Uuid::new_v4();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::post_json("/api/me/export", &token, &json!({})))
        .await;
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn cleanup_reclaims_expired_archives() {
    let app = TestApp::new();
    let user_id = Uuid::new_v4();
    let uid = user_id.to_string();
    seed_user(&app, user_id).await;
    let token = app.token_for(user_id);

    let resp = app
        .oneshot(TestApp::post_json("/api/me/export", &token, &json!({})))
        .await;
    assert_eq!(resp.status(), 201);
    let job_id = body_to_json(resp).await["id"].as_str().unwrap().to_string();
    wait_for_terminal_status(&app, &token).await;

    // Not yet expired: the sweep leaves it alone.
    cleanup_expired_exports(&app.state).await;
    let key = format!("exports/{uid}/{job_id}.zip");
    assert!(app.objects.contains(&key));

    // Push the expiry into the past and sweep again.
    app.docs
        .update(
            "export_archives",
            &job_id,
            json!({ "expires_at": "2020-01-01T00:00:00Z" }),
        )
        .await
        .unwrap();
    cleanup_expired_exports(&app.state).await;

    assert!(!app.objects.contains(&key), "archive object reclaimed");
    let job = app
        .docs
        .get("export_archives", &job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.data["status"], "expired");
    assert!(job.data.get("download_url").is_none());

    // An expired job no longer serves a download link.
    let resp = app.oneshot(TestApp::get("/api/me/export", &token)).await;
    let body = body_to_json(resp).await;
    assert!(body.get("download_url").is_none());
}
