// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API tests driving the router in-process.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use coderun_runner::{CommandTemplate, ProjectRunner, SqliteProjectStore, Toolchain};
use coderun_server::auth::{JwtIdentityResolver, issue_token};
use coderun_server::{AppState, build_router, cors_layer};

const SECRET: &str = "test-secret";

const SCAFFOLD_SCRIPT: &str = r#"mkdir -p "$1/src" && printf '%s' '{"name":"app","dependencies":{"react":"^18.2.0"}}' > "$1/package.json" && printf 'export default 1;' > "$1/src/App.js""#;
const ADD_SCRIPT: &str =
    r#"printf '{"name":"app","dependencies":{"react":"^18.2.0","%s":"^1.0.0"}}' "$1" > package.json"#;
const FAILING_REMOVE_SCRIPT: &str = r#"echo "error This module isn't specified in a package.json file." >&2; exit 1"#;

fn sh(script: &str, placeholder: &str) -> CommandTemplate {
    CommandTemplate::new("sh", ["-c", script, "tool", placeholder])
}

struct TestApp {
    router: Router,
    _temp_dir: tempfile::TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = SqliteProjectStore::in_memory().await.unwrap();
        let toolchain = Toolchain {
            scaffold: sh(SCAFFOLD_SCRIPT, "{path}"),
            start: sh(r#"echo "up on $PORT"; sleep 30"#, "{port}"),
            add_dependency: sh(ADD_SCRIPT, "{package}"),
            remove_dependency: sh(FAILING_REMOVE_SCRIPT, "{package}"),
            scaffold_timeout: Duration::from_secs(20),
            dependency_timeout: Duration::from_secs(20),
        };
        let runner = ProjectRunner::builder()
            .store(Arc::new(store))
            .storage_dir(temp_dir.path().join("storage"))
            .toolchain(toolchain)
            .stop_grace(Duration::from_secs(2))
            .build()
            .unwrap();

        let state = AppState::new(
            Arc::new(runner),
            Arc::new(JwtIdentityResolver::new(SECRET)),
        );
        Self {
            router: build_router(state, cors_layer("http://localhost:5000")),
            _temp_dir: temp_dir,
        }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            let token = issue_token(SECRET, user, Duration::from_secs(3600)).unwrap();
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create(&self, user: &str, name: &str) -> Value {
        let (status, body) = self
            .send(Method::POST, "/react/", Some(user), Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
        body["project"].clone()
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "ok");
}

#[tokio::test]
async fn test_missing_or_invalid_token_is_401() {
    let app = TestApp::new().await;

    let (status, body) = app.send(Method::GET, "/react/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "No token provided");

    let request = Request::builder()
        .uri("/react/")
        .header(header::AUTHORIZATION, "Bearer not-a-token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_and_list_projects() {
    let app = TestApp::new().await;

    let project = app.create("user-1", "my-app").await;
    assert_eq!(project["name"], "my-app");
    assert_eq!(project["ownerId"], "user-1");
    let port = project["port"].as_u64().unwrap();
    assert!((3000..=9999).contains(&port) && port != 3000 && port != 5000);

    let (status, body) = app.send(Method::GET, "/react", Some("user-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["projects"].as_array().unwrap().len(), 1);
    assert_eq!(body["projects"][0]["id"], project["id"]);

    let (_, other) = app.send(Method::GET, "/react", Some("user-2"), None).await;
    assert!(other["projects"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_validation_and_conflict() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(Method::POST, "/react/", Some("user-1"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "name is required");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/react/")
        .header(
            header::AUTHORIZATION,
            format!(
                "Bearer {}",
                issue_token(SECRET, "user-1", Duration::from_secs(60)).unwrap()
            ),
        )
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.create("user-1", "dup").await;
    let (status, body) = app
        .send(
            Method::POST,
            "/react/",
            Some("user-1"),
            Some(json!({ "name": "dup" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("dup"));
}

#[tokio::test]
async fn test_unknown_and_foreign_projects_are_404() {
    let app = TestApp::new().await;
    let project = app.create("user-1", "mine").await;
    let id = project["id"].as_str().unwrap();

    let (status, _) = app
        .send(Method::GET, "/react/does-not-exist/files", Some("user-1"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(
            Method::GET,
            &format!("/react/{id}/files"),
            Some("user-2"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_file_round_trip() {
    let app = TestApp::new().await;
    let project = app.create("user-1", "files").await;
    let id = project["id"].as_str().unwrap();

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/react/{id}/files/content"),
            Some("user-1"),
            Some(json!({ "filename": "src/Hello.js", "content": "hello" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "File created");

    let (status, body) = app
        .send(Method::GET, &format!("/react/{id}/files"), Some("user-1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let hello = &body["files"]["src"]["children"]["Hello.js"];
    assert_eq!(hello["type"], "file");
    assert_eq!(hello["content"], "hello");

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/react/{id}/folders/name"),
            Some("user-1"),
            Some(json!({ "oldFoldername": "src", "newFoldername": "lib" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/react/{id}/files/name"),
            Some("user-1"),
            Some(json!({ "oldFilename": "lib/Hello.js", "newFilename": "lib/World.js" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(
            Method::DELETE,
            &format!("/react/{id}/files"),
            Some("user-1"),
            Some(json!({ "filename": "lib/World.js" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(
            Method::DELETE,
            &format!("/react/{id}/files"),
            Some("user-1"),
            Some(json!({ "filename": "lib/World.js" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_path_traversal_is_400() {
    let app = TestApp::new().await;
    let project = app.create("user-1", "safe").await;
    let id = project["id"].as_str().unwrap();

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/react/{id}/files/content"),
            Some("user-1"),
            Some(json!({ "filename": "../../escape.txt", "content": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dependencies() {
    let app = TestApp::new().await;
    let project = app.create("user-1", "deps").await;
    let id = project["id"].as_str().unwrap();
    let uri = format!("/react/{id}/dependencies");

    let (status, body) = app.send(Method::GET, &uri, Some("user-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dependencies"]["react"], "^18.2.0");

    let (status, _) = app
        .send(
            Method::POST,
            &uri,
            Some("user-1"),
            Some(json!({ "dependency": "axios" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.send(Method::GET, &uri, Some("user-1"), None).await;
    assert_eq!(body["dependencies"]["axios"], "^1.0.0");

    let (status, body) = app
        .send(
            Method::DELETE,
            &uri,
            Some("user-1"),
            Some(json!({ "dependency": "axios" })),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["diagnostics"]
            .as_str()
            .unwrap()
            .contains("isn't specified")
    );

    let (status, _) = app
        .send(Method::POST, &uri, Some("user-1"), Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_run_status_stop() {
    let app = TestApp::new().await;
    let project = app.create("user-1", "server").await;
    let id = project["id"].as_str().unwrap();

    let (status, body) = app
        .send(Method::POST, &format!("/react/{id}/run"), Some("user-1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Project started");
    assert_eq!(body["port"], project["port"]);

    let (_, body) = app
        .send(Method::POST, &format!("/react/{id}/run"), Some("user-1"), None)
        .await;
    assert_eq!(body["message"], "Project already running");
    assert_eq!(body["process"]["state"], "already_running");

    let (status, body) = app
        .send(Method::GET, &format!("/react/{id}/status"), Some("user-1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"]["running"], true);

    let (status, body) = app
        .send(Method::POST, &format!("/react/{id}/stop"), Some("user-1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Project stopped");
    assert_eq!(body["exit"]["requested"], true);

    let (_, body) = app
        .send(Method::GET, &format!("/react/{id}/status"), Some("user-1"), None)
        .await;
    assert_eq!(body["status"]["running"], false);
}
