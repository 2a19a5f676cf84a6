//! HTTP-shaped request handling
//!
//! Maps JSON request bodies onto the engine and engine results onto
//! `{status, body}` pairs, so any web framework can mount the routes with a
//! thin adapter.
//!
//! | Route                       | Success | Client error |
//! |-----------------------------|---------|--------------|
//! | `POST /orchestrate`         | 200     | 400          |
//! | `POST /interventions/action`| 200     | 400/404/409  |

use crate::engine::{InterventionEngine, OrchestrateRequest};
use crate::error::EngineError;
use crate::intervention::types::UserAction;
use crate::store::EngineStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

/// Status code and JSON body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::from_error(&EngineError::Json(e)),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    fn from_error(err: &EngineError) -> Self {
        let status = match err {
            e if e.is_client_error() => 400,
            EngineError::UnknownSession(_) => 404,
            EngineError::SessionTerminal(_) => 409,
            _ => 500,
        };
        if status == 500 {
            error!(error = %err, "request failed");
        }
        Self::error(status, err.to_string())
    }
}

/// Body of an intervention action request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub user_id: String,
    pub intervention_id: Uuid,
    pub action: UserAction,
}

/// `POST /orchestrate`
pub fn handle_orchestrate<S: EngineStore>(
    engine: &mut InterventionEngine<S>,
    body: &str,
    now: DateTime<Utc>,
) -> ApiResponse {
    let request: OrchestrateRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => return ApiResponse::from_error(&EngineError::Json(e)),
    };
    match engine.orchestrate(&request, now) {
        Ok(response) => ApiResponse::ok(&response),
        Err(e) => ApiResponse::from_error(&e),
    }
}

/// `POST /interventions/action`
pub fn handle_action<S: EngineStore>(
    engine: &mut InterventionEngine<S>,
    body: &str,
    now: DateTime<Utc>,
) -> ApiResponse {
    let request: ActionRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => return ApiResponse::from_error(&EngineError::Json(e)),
    };
    match engine.record_action(&request.user_id, request.intervention_id, request.action, now) {
        Ok(response) => ApiResponse::ok(&response),
        Err(e) => ApiResponse::from_error(&e),
    }
}

/// Dispatch by method and path
pub fn route<S: EngineStore>(
    engine: &mut InterventionEngine<S>,
    method: &str,
    path: &str,
    body: &str,
    now: DateTime<Utc>,
) -> ApiResponse {
    match (method, path) {
        ("POST", "/orchestrate") => handle_orchestrate(engine, body, now),
        ("POST", "/interventions/action") => handle_action(engine, body, now),
        (_, "/orchestrate") | (_, "/interventions/action") => {
            ApiResponse::error(405, format!("{method} not allowed on {path}"))
        }
        _ => ApiResponse::error(404, format!("no route for {path}")),
    }
}
