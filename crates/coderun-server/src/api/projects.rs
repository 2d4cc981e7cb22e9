// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `/react` project routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use coderun_runner::{StartOutcome, StopOutcome, WriteOutcome};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ApiError, AppState};
use crate::auth::CallerId;

type ApiResult<T = Json<Value>> = Result<T, ApiError>;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/react", post(create_project).get(list_projects))
        .route("/react/", post(create_project).get(list_projects))
        .route(
            "/react/{project_id}/dependencies",
            get(read_dependencies)
                .post(add_dependency)
                .delete(remove_dependency),
        )
        .route("/react/{project_id}/run", post(run_project))
        .route("/react/{project_id}/stop", post(stop_project))
        .route("/react/{project_id}/status", get(project_status))
        .route(
            "/react/{project_id}/files",
            get(list_files).delete(delete_file),
        )
        .route("/react/{project_id}/files/name", put(rename_file))
        .route("/react/{project_id}/files/content", put(update_file_content))
        .route("/react/{project_id}/folders/name", put(rename_folder))
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DependencyRequest {
    dependency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameFileRequest {
    old_filename: Option<String>,
    new_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameFolderRequest {
    old_foldername: Option<String>,
    new_foldername: Option<String>,
    old_filename: Option<String>,
    new_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateContentRequest {
    filename: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteFileRequest {
    filename: Option<String>,
}

/// Non-empty value of a required body field.
fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{field} is required")))
}

async fn create_project(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    body: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(body) = body?;
    let name = required("name", body.name)?;

    let project = state.runner.create_project(caller.as_str(), &name).await?;
    info!(project_id = %project.id, owner_id = %project.owner_id, "Project created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Project created", "project": project })),
    ))
}

async fn list_projects(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
) -> ApiResult {
    let projects = state.runner.list_projects(caller.as_str()).await?;
    Ok(Json(json!({ "message": "Projects", "projects": projects })))
}

async fn read_dependencies(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let dependencies = state
        .runner
        .read_dependencies(caller.as_str(), &project_id)
        .await?;
    Ok(Json(
        json!({ "message": "Dependencies", "dependencies": dependencies }),
    ))
}

async fn add_dependency(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
    body: Result<Json<DependencyRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let dependency = required("dependency", body.dependency)?;

    state
        .runner
        .add_dependency(caller.as_str(), &project_id, dependency.trim())
        .await?;
    Ok(Json(json!({
        "message": format!("Dependency {} added", dependency.trim()),
    })))
}

async fn remove_dependency(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
    body: Result<Json<DependencyRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let dependency = required("dependency", body.dependency)?;

    state
        .runner
        .remove_dependency(caller.as_str(), &project_id, dependency.trim())
        .await?;
    Ok(Json(json!({
        "message": format!("Dependency {} removed", dependency.trim()),
    })))
}

async fn run_project(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let outcome = state.runner.run_project(caller.as_str(), &project_id).await?;
    let message = match outcome {
        StartOutcome::Started { .. } => "Project started",
        StartOutcome::AlreadyRunning { .. } => "Project already running",
    };
    Ok(Json(json!({
        "message": message,
        "process": outcome,
        "port": outcome.port(),
    })))
}

async fn stop_project(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let outcome = state
        .runner
        .stop_project(caller.as_str(), &project_id)
        .await?;
    let body = match outcome {
        StopOutcome::Stopped(exit) => json!({ "message": "Project stopped", "exit": exit }),
        StopOutcome::NotRunning => json!({ "message": "Project is not running" }),
    };
    Ok(Json(body))
}

async fn project_status(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let status = state
        .runner
        .project_status(caller.as_str(), &project_id)
        .await?;
    let message = if status.running {
        "Project is running"
    } else {
        "Project is not running"
    };
    Ok(Json(json!({ "message": message, "status": status })))
}

async fn list_files(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
) -> ApiResult {
    let files = state.runner.list_files(caller.as_str(), &project_id).await?;
    Ok(Json(json!({ "message": "Files", "files": files })))
}

async fn rename_file(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
    body: Result<Json<RenameFileRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let from = required("oldFilename", body.old_filename)?;
    let to = required("newFilename", body.new_filename)?;

    state
        .runner
        .rename_file(caller.as_str(), &project_id, &from, &to)
        .await?;
    Ok(Json(json!({ "message": "File renamed" })))
}

async fn rename_folder(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
    body: Result<Json<RenameFolderRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let from = required("oldFoldername", body.old_foldername.or(body.old_filename))?;
    let to = required("newFoldername", body.new_foldername.or(body.new_filename))?;

    state
        .runner
        .rename_folder(caller.as_str(), &project_id, &from, &to)
        .await?;
    Ok(Json(json!({ "message": "Folder renamed" })))
}

async fn update_file_content(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
    body: Result<Json<UpdateContentRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let filename = required("filename", body.filename)?;
    // Empty content is a valid file body.
    let content = body
        .content
        .ok_or_else(|| ApiError::bad_request("content is required"))?;

    let outcome = state
        .runner
        .update_file_content(caller.as_str(), &project_id, &filename, &content)
        .await?;
    let message = match outcome {
        WriteOutcome::Created => "File created",
        WriteOutcome::Overwritten => "File updated",
    };
    Ok(Json(json!({ "message": message, "outcome": outcome })))
}

async fn delete_file(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Path(project_id): Path<String>,
    body: Result<Json<DeleteFileRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let filename = required("filename", body.filename)?;

    state
        .runner
        .delete_file(caller.as_str(), &project_id, &filename)
        .await?;
    Ok(Json(json!({ "message": "File deleted" })))
}
