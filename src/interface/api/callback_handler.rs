//! Callback API handlers
//!
//! The ticketing service and the agent-facing frontend drive the callback
//! flow through these endpoints: check an agent's availability, place the
//! return call, watch it, cancel it.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::application::click_to_call::{CallStatus, OriginateOutcome};
use crate::application::{AvailabilityProbe, ClickToCallInitiator};
use crate::domain::availability::Availability;
use crate::domain::callback::{CallbackTicket, TicketStatus};
use crate::domain::ports::CallControl;
use crate::domain::shared::CoreError;

use super::dto::ApiResponse;

#[derive(Clone)]
pub struct AppState {
    pub control: Arc<dyn CallControl>,
    pub probe: Arc<AvailabilityProbe>,
    pub click_to_call: Arc<ClickToCallInitiator>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub esl_connected: bool,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        esl_connected: state.control.is_connected(),
    })
}

#[derive(Debug, Deserialize)]
pub struct CheckAvailabilityRequest {
    pub tenant: String,
    pub extension: String,
}

/// Fresh availability probe, bypassing the cache.
pub async fn check_availability(
    State(state): State<AppState>,
    Json(request): Json<CheckAvailabilityRequest>,
) -> Json<ApiResponse<Availability>> {
    let availability = state
        .probe
        .check_fresh(&request.tenant, &request.extension)
        .await;
    Json(ApiResponse::success(availability))
}

/// Ticket fields the caller supplies when asking for the return call. The
/// ticketing service owns the record; this is its current view.
#[derive(Debug, Deserialize)]
pub struct OriginateCallbackRequest {
    pub ticket_id: i64,
    pub tenant: String,
    pub extension: String,
    pub number: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_ticket_status")]
    pub status: TicketStatus,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
}

fn default_ticket_status() -> TicketStatus {
    TicketStatus::ReadyToCall
}

impl OriginateCallbackRequest {
    fn into_ticket(self) -> CallbackTicket {
        let now = Utc::now();
        CallbackTicket {
            id: self.ticket_id,
            tenant: self.tenant,
            number: self.number,
            extension: self.extension,
            reason: self.reason,
            scheduled_at: self.scheduled_at.unwrap_or(now),
            expires_at: self.expires_at.unwrap_or(now + chrono::Duration::hours(4)),
            status: self.status,
            notification_count: 0,
            last_notified_at: None,
            attempts: self.attempts,
            created_at: now,
        }
    }
}

/// Place the return call for a ticket.
pub async fn originate_callback(
    State(state): State<AppState>,
    Json(request): Json<OriginateCallbackRequest>,
) -> (StatusCode, Json<ApiResponse<OriginateOutcome>>) {
    let ticket = request.into_ticket();
    info!(ticket_id = ticket.id, extension = %ticket.extension, "originate requested");

    match state.click_to_call.originate_callback(&ticket).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(CoreError::RaceCondition(message)) => {
            (StatusCode::CONFLICT, Json(ApiResponse::error(message)))
        }
        Err(e) => {
            error!(ticket_id = ticket.id, error = %e, "originate failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}

/// Status of an in-flight or finished click-to-call leg.
pub async fn call_status(
    State(state): State<AppState>,
    Path(leg_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<CallStatus>>) {
    match state.click_to_call.status(&leg_id) {
        Some(status) => (StatusCode::OK, Json(ApiResponse::success(status))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("unknown call leg {}", leg_id))),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub canceled: bool,
}

/// Cancel an in-flight click-to-call.
pub async fn cancel_call(
    State(state): State<AppState>,
    Path(leg_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<CancelResponse>>) {
    match state.click_to_call.cancel(&leg_id).await {
        Ok(canceled) => (
            StatusCode::OK,
            Json(ApiResponse::success(CancelResponse { canceled })),
        ),
        Err(e) => {
            error!(leg_id = %leg_id, error = %e, "cancel failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}
