//! REST surface over the orchestrator.
//!
//! Thin translation layer: parse the request, call the orchestrator, map the
//! error to a status code. No lifecycle decisions happen here.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Json;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::applications::model::ApplicationStatus;
use crate::apply::agent::FieldAnswer;
use crate::apply::machine::ApplyOptions;
use crate::apply::profile::UserProfile;
use crate::error::{ApplyError, DatabaseError, Error, SecretaryError};
use crate::jobs::model::DocumentType;
use crate::orchestrator::Orchestrator;
use crate::secretary::feed::InboundEmail;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    /// Producer side of the correspondence feed, for raw RFC 822 ingestion.
    feed: tokio::sync::mpsc::Sender<InboundEmail>,
}

/// Build the full API router.
pub fn api_routes(
    orchestrator: Arc<Orchestrator>,
    feed: tokio::sync::mpsc::Sender<InboundEmail>,
) -> Router {
    let state = AppState { orchestrator, feed };
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(add_job).get(list_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/documents", post(generate_documents))
        .route("/api/jobs/{id}/confirm-docs", post(confirm_documents))
        .route("/api/jobs/{id}/smart-apply", post(smart_apply))
        .route("/api/jobs/{id}/continue", post(continue_application))
        .route("/api/jobs/{id}/cancel", post(cancel_application))
        .route("/api/jobs/{id}/questions", get(pending_questions))
        .route("/api/applications", get(list_applications))
        .route("/api/applications/{id}", get(get_application))
        .route("/api/applications/{id}/emails", post(inbound_email))
        .route("/api/applications/{id}/emails/raw", post(inbound_email_raw))
        .route("/api/applications/{id}/confirm", post(confirm_status))
        .route("/api/profile", get(get_profile).put(update_profile))
        .route("/api/answers", get(list_answers))
        .route("/api/answers/{id}", delete(delete_answer).put(update_answer))
        .route("/api/actions", get(list_actions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map a domain error to an HTTP status plus JSON body.
fn error_json(e: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        Error::Apply(ApplyError::JobNotFound { .. })
        | Error::Apply(ApplyError::NoActiveAttempt { .. })
        | Error::Apply(ApplyError::SessionExpired { .. })
        | Error::Secretary(SecretaryError::ApplicationNotFound { .. })
        | Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Apply(ApplyError::AttemptActive { .. }) => StatusCode::CONFLICT,
        Error::Apply(ApplyError::DocumentsNotReady { .. })
        | Error::Apply(ApplyError::NotCancellable { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Secretary(SecretaryError::Feed(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Jobs ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AddJobRequest {
    url: String,
    title: String,
    company: String,
    #[serde(default)]
    description: String,
    compatibility_score: u8,
}

async fn add_job(
    State(state): State<AppState>,
    Json(body): Json<AddJobRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .add_job(
            &body.url,
            &body.title,
            &body.company,
            &body.description,
            body.compatibility_score,
        )
        .await
    {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.list_jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.orchestrator.get_job(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "job not found" })),
        )
            .into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

#[derive(Deserialize)]
struct GenerateRequest {
    types: std::collections::BTreeSet<DocumentType>,
}

async fn generate_documents(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<GenerateRequest>,
) -> impl IntoResponse {
    match state.orchestrator.generate_documents(id, &body.types).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

async fn confirm_documents(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.confirm_documents(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

// ── Smart-apply ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SmartApplyRequest {
    #[serde(default)]
    user_consent_given: bool,
    #[serde(default)]
    doc_types: Option<std::collections::BTreeSet<DocumentType>>,
    #[serde(default)]
    manual_review: Option<bool>,
}

async fn smart_apply(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<SmartApplyRequest>>,
) -> impl IntoResponse {
    let mut options = ApplyOptions::default();
    if let Some(Json(req)) = body {
        options.user_consent_given = req.user_consent_given;
        if let Some(types) = req.doc_types {
            options.doc_types = types;
        }
        if let Some(manual) = req.manual_review {
            options.manual_review = manual;
        }
    }
    match state.orchestrator.process_application(id, &options).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

#[derive(Deserialize)]
struct ContinueRequest {
    answers: Vec<FieldAnswer>,
}

async fn continue_application(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ContinueRequest>,
) -> impl IntoResponse {
    match state.orchestrator.continue_application(id, body.answers).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

async fn cancel_application(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.cancel_application(id).await {
        Ok(()) => Json(serde_json::json!({ "cancelled": true })).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

async fn pending_questions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.pending_questions(id).await {
        Ok(Some(questions)) => Json(questions).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no suspended attempt for this job" })),
        )
            .into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

// ── Applications ────────────────────────────────────────────────────────

async fn list_applications(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.list_applications().await {
        Ok(views) => Json(views).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.get_application(id).await {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "application not found" })),
        )
            .into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

#[derive(Deserialize)]
struct EmailRequest {
    from: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    received_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn inbound_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<EmailRequest>,
) -> impl IntoResponse {
    let email = InboundEmail {
        application_id: id,
        from: body.from,
        subject: body.subject,
        body: body.body,
        received_at: body.received_at.unwrap_or_else(chrono::Utc::now),
    };
    match state.orchestrator.handle_email(&email).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

/// Raw RFC 822 ingestion. Parsed here, classified asynchronously by the feed
/// consumer; the caller gets a 202 once the mail is queued.
async fn inbound_email_raw(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    raw: axum::body::Bytes,
) -> impl IntoResponse {
    let email = match InboundEmail::from_rfc822(id, &raw) {
        Ok(email) => email,
        Err(e) => return error_json(e.into()).into_response(),
    };
    match state.feed.send(email).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "queued": true })),
        )
            .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "correspondence feed is closed" })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct ConfirmStatusRequest {
    status: ApplicationStatus,
}

async fn confirm_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfirmStatusRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .confirm_application_status(id, body.status)
        .await
    {
        Ok(application) => Json(application).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

// ── Profile and Q&A store ───────────────────────────────────────────────

async fn get_profile(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.profile().await)
}

async fn update_profile(
    State(state): State<AppState>,
    Json(profile): Json<UserProfile>,
) -> impl IntoResponse {
    state.orchestrator.update_profile(profile).await;
    StatusCode::NO_CONTENT
}

async fn list_answers(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.list_saved_answers().await {
        Ok(answers) => Json(answers).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

#[derive(Deserialize)]
struct UpdateAnswerRequest {
    answer: String,
}

async fn update_answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAnswerRequest>,
) -> impl IntoResponse {
    match state.orchestrator.update_saved_answer(id, &body.answer).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

async fn delete_answer(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.orchestrator.delete_saved_answer(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_json(e).into_response(),
    }
}

#[derive(Deserialize)]
struct ActionsQuery {
    #[serde(default = "default_actions_limit")]
    limit: usize,
}

fn default_actions_limit() -> usize {
    100
}

async fn list_actions(
    State(state): State<AppState>,
    Query(query): Query<ActionsQuery>,
) -> impl IntoResponse {
    match state.orchestrator.list_actions(query.limit).await {
        Ok(actions) => Json(actions).into_response(),
        Err(e) => error_json(e).into_response(),
    }
}
