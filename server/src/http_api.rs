//! Thin CRUD verbs over the engine. Responses are `{success: bool, …}` JSON;
//! the interesting semantics live in `classdeck_core::engine`.

use std::sync::Arc;

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use classdeck_core::engine::CreateSessionParams;
use classdeck_core::engine::SessionEngine;
use classdeck_core::engine::UpdateSessionParams;
use classdeck_core::error::EngineErr;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

type ApiResponse = (StatusCode, Json<Value>);

fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

fn error_response(err: EngineErr) -> ApiResponse {
    let status = match &err {
        EngineErr::Validation(_) => StatusCode::BAD_REQUEST,
        EngineErr::NotFound(_) => StatusCode::NOT_FOUND,
        EngineErr::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineErr::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({"success": false, "error": err.to_string()})),
    )
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CreateSessionBody {
    title: String,
    description: String,
    language: String,
    initial_code: String,
}

pub(crate) async fn create_session(
    State(engine): State<Arc<SessionEngine>>,
    body: Option<Json<CreateSessionBody>>,
) -> ApiResponse {
    let Json(body) = body.unwrap_or_default();
    match engine
        .create_session(CreateSessionParams {
            title: body.title,
            description: body.description,
            language: body.language,
            initial_code: body.initial_code,
        })
        .await
    {
        Ok(code) => (
            StatusCode::CREATED,
            Json(json!({"success": true, "sessionCode": code.to_string()})),
        ),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn get_session(
    State(engine): State<Arc<SessionEngine>>,
    Path(code): Path<String>,
) -> ApiResponse {
    match engine.session_snapshot(&code).await {
        Ok(doc) => ok(json!({"success": true, "session": doc})),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct UpdateSessionBody {
    title: Option<String>,
    description: Option<String>,
    language: Option<String>,
    initial_code: Option<String>,
}

pub(crate) async fn update_session(
    State(engine): State<Arc<SessionEngine>>,
    Path(code): Path<String>,
    Json(body): Json<UpdateSessionBody>,
) -> ApiResponse {
    match engine
        .update_session_meta(&code, UpdateSessionParams {
            title: body.title,
            description: body.description,
            language: body.language,
            initial_code: body.initial_code,
        })
        .await
    {
        Ok(()) => ok(json!({"success": true})),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn delete_session(
    State(engine): State<Arc<SessionEngine>>,
    Path(code): Path<String>,
) -> ApiResponse {
    match engine.delete_session(&code).await {
        Ok(()) => ok(json!({"success": true})),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub(crate) struct JoinBody {
    name: String,
}

pub(crate) async fn join_session(
    State(engine): State<Arc<SessionEngine>>,
    Path(code): Path<String>,
    Json(body): Json<JoinBody>,
) -> ApiResponse {
    match engine.join_student_http(&code, &body.name).await {
        Ok(token) => ok(json!({"success": true, "reconnectToken": token})),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn end_session(
    State(engine): State<Arc<SessionEngine>>,
    Path(code): Path<String>,
) -> ApiResponse {
    match engine.end_session(&code).await {
        Ok(()) => ok(json!({"success": true})),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn set_slide(
    State(engine): State<Arc<SessionEngine>>,
    Path((code, index)): Path<(String, usize)>,
) -> ApiResponse {
    match engine.set_slide(&code, index).await {
        Ok(()) => ok(json!({"success": true})),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn all_summaries(
    State(engine): State<Arc<SessionEngine>>,
    Path(code): Path<String>,
) -> ApiResponse {
    match engine.all_summaries(&code).await {
        Ok(summaries) => ok(json!({"success": true, "summaries": summaries})),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn student_summary(
    State(engine): State<Arc<SessionEngine>>,
    Path((code, name)): Path<(String, String)>,
) -> ApiResponse {
    match engine.student_summary(&code, &name).await {
        Ok(summary) => ok(json!({"success": true, "summary": summary})),
        Err(err) => error_response(err),
    }
}
