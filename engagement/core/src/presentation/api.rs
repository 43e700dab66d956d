// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP routes for the engagement runtime

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use crate::application::engagement_runtime::EngagementRuntime;
use crate::application::error::EngagementError;
use crate::domain::context::EngagementContext;
use crate::domain::decision::EngagementDecision;
use crate::domain::delivery::ScheduleId;
use crate::domain::engagement::EngagementId;
use crate::domain::pattern::PatternType;
use crate::presentation::websocket::ws_handler;

pub struct AppState {
    pub runtime: Arc<EngagementRuntime>,
    pub start_time: std::time::Instant,
}

pub fn app(runtime: Arc<EngagementRuntime>) -> Router {
    let state = Arc::new(AppState {
        runtime,
        start_time: std::time::Instant::now(),
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/turns", post(turn_handler))
        .route("/api/decisions", post(decision_handler))
        .route("/api/schedules/{schedule_id}", delete(cancel_schedule_handler))
        .route("/api/engagements/{engagement_id}/outcome", post(outcome_handler))
        .route("/api/analytics", get(analytics_handler))
        .route("/api/personas/{personality_id}/patterns", get(patterns_handler))
        .route("/api/users/{user_id}/pending", get(pending_handler))
        .route("/ws/{user_id}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps application errors onto status codes
pub struct ApiError(EngagementError);

impl From<EngagementError> for ApiError {
    fn from(e: EngagementError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngagementError::NotFound(_) => StatusCode::NOT_FOUND,
            EngagementError::InvalidState(_) => StatusCode::CONFLICT,
            EngagementError::Persistence { .. } | EngagementError::Configuration(_) => {
                error!(error = %self.0, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "active_connections": state.runtime.registry.active_connections().await,
    }))
}

async fn turn_handler(
    State(state): State<Arc<AppState>>,
    Json(context): Json<EngagementContext>,
) -> Result<Response, ApiError> {
    let result = state.runtime.coordinator.handle_turn(&context).await?;
    Ok(Json(result).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ProcessDecisionRequest {
    pub decision: EngagementDecision,
    pub context: EngagementContext,
}

async fn decision_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProcessDecisionRequest>,
) -> Result<Response, ApiError> {
    // Decisions from outside go through the same normalization as oracle answers
    let mut decision = request.decision;
    decision.enforce_invariants();
    let outcome = state
        .runtime
        .scheduler
        .process_decision(&decision, &request.context)
        .await?;
    Ok(Json(json!({ "outcome": outcome })).into_response())
}

async fn cancel_schedule_handler(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<Uuid>,
) -> Json<serde_json::Value> {
    let cancelled = state.runtime.scheduler.cancel_scheduled(ScheduleId(schedule_id));
    Json(json!({ "cancelled": cancelled }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRequest {
    pub response_text: String,
    #[serde(default)]
    pub response_time_seconds: f64,
}

async fn outcome_handler(
    State(state): State<Arc<AppState>>,
    Path(engagement_id): Path<Uuid>,
    Json(request): Json<OutcomeRequest>,
) -> Result<Response, ApiError> {
    let success_score = state
        .runtime
        .learning_service
        .analyze_outcome(
            EngagementId(engagement_id),
            &request.response_text,
            request.response_time_seconds,
        )
        .await?;
    Ok(Json(json!({ "successScore": success_score })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub session_id: Option<String>,
}

async fn analytics_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> Response {
    let snapshot = state.runtime.scheduler.get_analytics(query.session_id.as_deref()).await;
    Json(snapshot).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PatternQuery {
    #[serde(rename = "type")]
    pub pattern_type: Option<String>,
}

async fn patterns_handler(
    State(state): State<Arc<AppState>>,
    Path(personality_id): Path<String>,
    Query(query): Query<PatternQuery>,
) -> Result<Response, ApiError> {
    let pattern_type = match query.pattern_type.as_deref() {
        None => None,
        Some(raw) => match PatternType::parse(raw) {
            Some(t) => Some(t),
            None => return Ok(bad_request(format!("unknown pattern type: {}", raw))),
        },
    };
    let patterns = state
        .runtime
        .learning_service
        .get_relevant_patterns(&personality_id, pattern_type)
        .await?;
    Ok(Json(patterns).into_response())
}

async fn pending_handler(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> Result<Response, ApiError> {
    let messages = state
        .runtime
        .conversation_log
        .list_undelivered(&user_id)
        .await
        .map_err(|e| EngagementError::persistence("-", None, e))?;
    Ok(Json(messages).into_response())
}
