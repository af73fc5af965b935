//! HTTP surface.
//!
//! Caller identity comes from headers set by the upstream auth layer. Engine
//! calls block on sled, so they run on tokio's blocking pool.
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::document::Field;
use crate::error::{ErrorKind, TransitionError, ValidationError};
use crate::executor::{CreatedDocument, TransitionRequest};
use crate::labels::{StageLabel, next_stage_options};
use crate::service::LifecycleService;
use crate::stage::{DocType, Stage};
use crate::types::Caller;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const OVERRIDE_HEADER: &str = "x-cross-tenant-override";

#[derive(Clone)]
pub struct AppState {
    service: Arc<LifecycleService>,
}

pub fn router(service: Arc<LifecycleService>) -> Router {
    Router::new()
        .route("/documents/:doc_type/:id/transition", post(transition))
        .route("/documents/:doc_type/:id/transitions", get(next_stages))
        .with_state(AppState { service })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionBody {
    pub to_stage: String,
    pub actor_id: String,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub doc_type: DocType,
    pub id: String,
    pub from_stage: Stage,
    pub new_stage: Stage,
    pub version: u64,
    pub created_documents: Vec<CreatedDocument>,
    pub audit_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStagesResponse {
    pub stage: Stage,
    pub version: u64,
    pub next: Vec<StageLabel>,
}

/// Structured JSON error body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_kind: String,
    pub details: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub message: String,
    pub retryable: bool,
    /// Legal next stages, for illegal transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Stage>>,
    /// Missing fields, for missing-field rejections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<Field>>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("engine task failed: {0}")]
    Join(String),
}

impl ApiError {
    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ApiError::Transition(e) => e.kind(),
            ApiError::Join(_) => ErrorKind::Storage,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // storage internals stay in the log
        let message = match kind {
            ErrorKind::Storage => {
                tracing::error!(error = %self, "transition failed on storage");
                "the transition was rolled back after a storage failure; retry with backoff".to_string()
            }
            _ => self.to_string(),
        };

        let (allowed, fields) = match &self {
            ApiError::Transition(TransitionError::Invalid(ValidationError::IllegalTransition { allowed, .. })) => {
                (Some(allowed.clone()), None)
            }
            ApiError::Transition(TransitionError::Invalid(ValidationError::MissingFields { fields, .. })) => {
                (None, Some(fields.clone()))
            }
            _ => (None, None),
        };

        let body = ErrorBody {
            error_kind: kind.as_str().to_string(),
            details: ErrorDetails {
                message,
                retryable: kind.is_retryable(),
                allowed,
                fields,
            },
        };

        (status, Json(body)).into_response()
    }
}

fn caller_from(headers: &HeaderMap, actor_id: &str) -> Result<Caller, ApiError> {
    let tenant = headers
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|tenant| !tenant.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest(format!("missing {TENANT_HEADER} header")))?;

    let caller = Caller::new(tenant, actor_id);
    let cross_tenant = headers
        .get(OVERRIDE_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));

    Ok(if cross_tenant {
        caller.with_cross_tenant_override()
    } else {
        caller
    })
}

fn parse_doc_type(raw: &str) -> Result<DocType, ApiError> {
    raw.parse()
        .map_err(|e: crate::error::ParseError| ApiError::InvalidRequest(e.to_string()))
}

async fn transition(
    State(state): State<AppState>,
    Path((doc_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Json<TransitionBody>, JsonRejection>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let caller = caller_from(&headers, &body.actor_id)?;
    let doc_type = parse_doc_type(&doc_type)?;
    let to: Stage = body
        .to_stage
        .parse()
        .map_err(|e: crate::error::ParseError| ApiError::InvalidRequest(e.to_string()))?;

    let mut request = TransitionRequest::new(doc_type, id, to);
    request.expected_version = body.expected_version;

    let service = state.service.clone();
    let outcome = tokio::task::spawn_blocking(move || service.transition(&caller, &request))
        .await
        .map_err(|e| ApiError::Join(e.to_string()))??;

    Ok(Json(TransitionResponse {
        doc_type: outcome.doc_type,
        id: outcome.id,
        from_stage: outcome.from_stage,
        new_stage: outcome.new_stage,
        version: outcome.version,
        created_documents: outcome.created_documents,
        audit_id: outcome.audit_id,
    }))
}

async fn next_stages(
    State(state): State<AppState>,
    Path((doc_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<NextStagesResponse>, ApiError> {
    let caller = caller_from(&headers, "reader")?;
    let doc_type = parse_doc_type(&doc_type)?;

    let service = state.service.clone();
    let doc = tokio::task::spawn_blocking(move || service.get(&caller, doc_type, &id))
        .await
        .map_err(|e| ApiError::Join(e.to_string()))??;

    Ok(Json(NextStagesResponse {
        stage: doc.stage,
        version: doc.version,
        next: next_stage_options(doc.workflow(), doc.stage),
    }))
}
