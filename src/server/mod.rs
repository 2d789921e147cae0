pub mod auth;
pub mod error;
pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let settings = state.settings.clone();

    let admin = Router::new()
        .route("/logs", get(handlers::list_logs))
        .route("/logs/{session_id}", delete(handlers::delete_log))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    Router::new()
        .route("/api/merge", post(handlers::merge_images))
        .route("/api/styles", get(handlers::list_styles))
        .route("/api/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        .nest("/api/admin", admin)
        .nest_service("/uploads", ServeDir::new(&settings.uploads_dir))
        .fallback_service(ServeDir::new(&settings.static_dir))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(settings.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
    use axum::http::{Request, StatusCode};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::catalog::Catalog;
    use crate::pipeline::orchestrator::test_support::*;
    use crate::pipeline::{MergePipeline, PipelineSettings};
    use crate::state::{AdminCredentials, ServerSettings};
    use crate::storage::{ActivityLog, FsSessionStore, JsonFileActivityLog, LogEntry};

    struct TestApp {
        harness: Harness,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    fn app_with(harness: Harness, admin: Option<AdminCredentials>) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("public")).unwrap();
        std::fs::write(dir.path().join("public/index.html"), "<h1>merge</h1>").unwrap();

        let settings = ServerSettings {
            static_dir: dir.path().join("public"),
            uploads_dir: dir.path().join("uploads"),
            body_limit_bytes: 64 * 1024,
            admin,
        };
        let state = AppState::new(
            harness.pipeline(),
            harness.sessions.clone(),
            harness.log.clone(),
            settings,
        );
        TestApp {
            harness,
            state,
            _dir: dir,
        }
    }

    fn app() -> TestApp {
        app_with(
            Harness::new(),
            Some(AdminCredentials {
                username: "admin".to_string(),
                password: "hunter2".to_string(),
            }),
        )
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn merge_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/merge")
            .header(CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
            .header("user-agent", "router-tests")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn admin_request(method: &str, uri: &str, password: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(password) = password {
            builder = builder.header(
                AUTHORIZATION,
                format!("Basic {}", BASE64.encode(format!("admin:{password}"))),
            );
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn list_logs(state: &AppState) -> (StatusCode, Value) {
        send(state, admin_request("GET", "/api/admin/logs", Some("hunter2"))).await
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app.state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn catalog_endpoints_list_defaults() {
        let app = app();

        let request = Request::builder().uri("/api/styles").body(Body::empty()).unwrap();
        let (status, body) = send(&app.state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["defaultStyle"], "realistic");
        let keys: Vec<&str> = body["styles"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|style| style["key"].as_str())
            .collect();
        assert!(keys.contains(&"fusion"));
        assert!(keys.contains(&"toy"));

        let request = Request::builder().uri("/api/models").body(Body::empty()).unwrap();
        let (status, body) = send(&app.state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["defaultModel"], "dalle3");
        assert_eq!(body["models"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn merge_returns_image_and_meta() {
        let app = app();
        let (status, body) = send(
            &app.state,
            merge_request(json!({ "image1": IMAGE_A, "image2": IMAGE_B, "style": "fusion" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["imageUrl"], "https://cdn.example.com/result.png");
        assert_eq!(body["meta"]["style"], "fusion");
        assert_eq!(body["meta"]["provider"], "openai");
        assert_eq!(body["meta"]["creativeConcept"], "A velvet-eared steam sprite");
        assert_eq!(body["meta"]["sessionId"], "session-0");
        assert!(body["meta"]["imagePrompt"]
            .as_str()
            .unwrap()
            .contains("A velvet-eared steam sprite"));

        let entries = app.harness.log.entries.lock().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].client_address, "198.51.100.4");
        let saved = app.harness.sessions.saved.lock().clone();
        assert_eq!(saved[0].metadata.user_agent, "router-tests");
    }

    #[tokio::test]
    async fn non_fusion_merge_omits_creative_concept() {
        let app = app();
        let (status, body) = send(
            &app.state,
            merge_request(json!({ "image1": IMAGE_A, "image2": IMAGE_B, "style": "anime" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["meta"].get("creativeConcept").is_none());
    }

    #[tokio::test]
    async fn merge_without_second_image_is_a_bad_request() {
        let app = app();
        let (status, body) = send(&app.state, merge_request(json!({ "image1": IMAGE_A }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("required"));
        assert!(app.harness.vision.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let app = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/merge")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{\"image1\": "))
            .unwrap();
        let (status, body) = send(&app.state, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn backend_failure_is_reported_with_upstream_message() {
        let mut harness = Harness::new();
        harness.primary = Arc::new(MockImage {
            name: "openai",
            calls: Default::default(),
            response: Err("Billing hard limit has been reached".to_string()),
        });
        let app = app_with(harness, None);

        let (status, body) = send(
            &app.state,
            merge_request(json!({ "image1": IMAGE_A, "image2": IMAGE_B, "style": "toy" })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Billing hard limit has been reached" }));
        assert!(app.harness.log.entries.lock().is_empty());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = app();
        let padding = "A".repeat(128 * 1024);
        let body = json!({ "image1": padding, "image2": IMAGE_B }).to_string();
        let request = Request::builder()
            .method("POST")
            .uri("/api/merge")
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        let response = build_router(app.state.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.harness.vision.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn admin_routes_require_credentials() {
        let app = app();

        let response = build_router(app.state.clone())
            .oneshot(admin_request("GET", "/api/admin/logs", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(WWW_AUTHENTICATE));

        let (status, _) = send(
            &app.state,
            admin_request("GET", "/api/admin/logs", Some("wrong")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_routes_are_hidden_without_a_password() {
        let app = app_with(Harness::new(), None);
        let (status, _) = send(
            &app.state,
            admin_request("GET", "/api/admin/logs", Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_lists_newest_first_and_deletes_sessions() {
        let app = app();
        for style in ["toy", "anime"] {
            let (status, _) = send(
                &app.state,
                merge_request(json!({ "image1": IMAGE_A, "image2": IMAGE_B, "style": style })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(
            &app.state,
            admin_request("GET", "/api/admin/logs", Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["sessionId"], "session-1");
        assert_eq!(entries[0]["styleKey"], "anime");
        assert_eq!(entries[0]["metadata"]["styleName"], "Anime");
        assert_eq!(entries[1]["sessionId"], "session-0");

        let (status, body) = send(
            &app.state,
            admin_request("DELETE", "/api/admin/logs/session-0", Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["directoryRemoved"], true);
        assert_eq!(app.harness.log.entries.lock().len(), 1);
        assert_eq!(app.harness.sessions.saved.lock().len(), 1);

        let (status, body) = send(
            &app.state,
            admin_request("GET", "/api/admin/logs", Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["sessionId"], "session-1");
        assert_eq!(entries[0]["metadata"]["styleKey"], "anime");

        let (status, body) = send(
            &app.state,
            admin_request("DELETE", "/api/admin/logs/session-0", Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn failed_directory_delete_keeps_the_log_entry() {
        let mut harness = Harness::new();
        harness.sessions = Arc::new(MemorySessions {
            fail_delete: true,
            ..Default::default()
        });
        let app = app_with(
            harness,
            Some(AdminCredentials {
                username: "admin".to_string(),
                password: "hunter2".to_string(),
            }),
        );
        let (status, _) = send(
            &app.state,
            merge_request(json!({ "image1": IMAGE_A, "image2": IMAGE_B, "style": "toy" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app.state,
            admin_request("DELETE", "/api/admin/logs/session-0", Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("permission denied"));
        assert_eq!(app.harness.log.entries.lock().len(), 1);
        assert_eq!(app.harness.sessions.saved.lock().len(), 1);

        let (status, body) = send(
            &app.state,
            admin_request("GET", "/api/admin/logs", Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["sessionId"], "session-0");
        assert_eq!(body[0]["metadata"]["styleKey"], "toy");
    }

    #[tokio::test]
    async fn dangling_log_entries_are_listed_without_metadata() {
        let app = app();
        app.harness.log.entries.lock().push(LogEntry {
            created_at: Utc::now(),
            client_address: "203.0.113.9".to_string(),
            style_key: "toy".to_string(),
            session_directory_name: "2026-01-02_03-04-05_gone".to_string(),
            session_id: "orphan".to_string(),
        });

        let (status, body) = send(
            &app.state,
            admin_request("GET", "/api/admin/logs", Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["sessionId"], "orphan");
        assert_eq!(body[0]["sessionDirectoryName"], "2026-01-02_03-04-05_gone");
        assert!(body[0].get("metadata").is_none());
        assert!(body[0].get("resultImage").is_none());
    }

    #[tokio::test]
    async fn admin_delete_removes_the_session_directory_on_disk() {
        let harness = Harness::new();
        let dir = tempfile::tempdir().unwrap();
        let uploads_dir = dir.path().join("uploads");
        let sessions = Arc::new(FsSessionStore::new(&uploads_dir));
        let activity_log = Arc::new(JsonFileActivityLog::new(
            dir.path().join("data/activity_log.json"),
            1000,
        ));
        let pipeline = MergePipeline::new(
            Arc::new(Catalog::builtin("realistic", "dalle3")),
            harness.vision.clone(),
            harness.text.clone(),
            harness.primary.clone(),
            harness.secondary.clone(),
            sessions.clone(),
            activity_log.clone(),
            PipelineSettings::default(),
        );
        let state = AppState::new(
            pipeline,
            sessions,
            activity_log.clone(),
            ServerSettings {
                static_dir: dir.path().join("public"),
                uploads_dir: uploads_dir.clone(),
                body_limit_bytes: 64 * 1024,
                admin: Some(AdminCredentials {
                    username: "admin".to_string(),
                    password: "hunter2".to_string(),
                }),
            },
        );

        let (status, merged) = send(
            &state,
            merge_request(json!({
                "image1": IMAGE_A,
                "image2": IMAGE_A,
                "style": "toy",
                "model": "gemini-flash",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let session_id = merged["meta"]["sessionId"].as_str().unwrap().to_string();
        assert!(merged["imageUrl"].as_str().unwrap().starts_with("/uploads/"));

        let (status, body) = list_logs(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["sessionId"], session_id.as_str());
        assert_eq!(body[0]["metadata"]["modelKey"], "gemini-flash");
        assert_eq!(body[0]["resultImage"], merged["imageUrl"]);
        let directory_name = body[0]["sessionDirectoryName"].as_str().unwrap().to_string();
        let session_dir = uploads_dir.join(&directory_name);
        assert!(session_dir.join("metadata.json").exists());

        let (status, body) = send(
            &state,
            admin_request("DELETE", &format!("/api/admin/logs/{session_id}"), Some("hunter2")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["directoryRemoved"], true);
        assert!(!session_dir.exists());

        let (status, body) = list_logs(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        activity_log
            .append(LogEntry {
                created_at: Utc::now(),
                client_address: "198.51.100.4".to_string(),
                style_key: "toy".to_string(),
                session_directory_name: directory_name,
                session_id: session_id.clone(),
            })
            .await
            .unwrap();
        let (status, body) = list_logs(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["sessionId"], session_id.as_str());
        assert!(body[0].get("metadata").is_none());
    }

    #[tokio::test]
    async fn serves_static_files() {
        let app = app();
        let response = build_router(app.state.clone())
            .oneshot(Request::builder().uri("/index.html").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"<h1>merge</h1>");
    }
}
