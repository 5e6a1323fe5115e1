//! Ticketing collaborator
//!
//! The external ticketing service owns callback tickets; this client drives
//! status transitions and lifecycle reports over HTTP. An in-memory variant
//! backs tests and single-box deployments without a ticketing service.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::TicketingConfig;
use crate::domain::callback::{CallbackRequest, CallbackTicket, TicketStatus};
use crate::domain::ports::TicketGateway;
use crate::domain::shared::{CoreError, Result};

/// HTTP client for the ticketing service.
pub struct HttpTicketGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTicketGateway {
    pub fn new(config: &TicketingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::ExternalService(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        debug!(%path, "ticketing request");
        let response = self
            .request(method, path)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::ExternalService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::ExternalService(format!(
                "ticketing returned {} for {}",
                status, path
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CoreError::ExternalService(e.to_string()))
    }
}

#[derive(Deserialize)]
struct TicketListResponse {
    tickets: Vec<CallbackTicket>,
}

#[async_trait]
impl TicketGateway for HttpTicketGateway {
    async fn create_callback<'a>(
        &self,
        tenant: &str,
        call_id: &str,
        extension: &str,
        request: &CallbackRequest,
        transcript: Option<&'a str>,
        summary: Option<&'a str>,
    ) -> Result<i64> {
        let body = json!({
            "tenant": tenant,
            "call_id": call_id,
            "caller_number": request.number,
            "destination_extension": extension,
            "reason": request.reason,
            "scheduled_at": request.scheduled_at,
            "transcript": transcript,
            "summary": summary,
        });
        let value = self
            .send_json(reqwest::Method::POST, "/callbacks", body)
            .await?;
        value
            .get("ticket_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| CoreError::ExternalService("create response without ticket_id".into()))
    }

    async fn actionable_tickets(&self, tenant: &str) -> Result<Vec<CallbackTicket>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/callbacks?tenant={}&status=pending,notified", tenant),
            )
            .send()
            .await
            .map_err(|e| CoreError::ExternalService(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::ExternalService(format!(
                "ticketing returned {}",
                response.status()
            )));
        }

        let list: TicketListResponse = response
            .json()
            .await
            .map_err(|e| CoreError::ExternalService(e.to_string()))?;
        Ok(list.tickets)
    }

    async fn transition(
        &self,
        ticket_id: i64,
        from: TicketStatus,
        to: TicketStatus,
    ) -> Result<bool> {
        let body = json!({ "from": from, "to": to });
        let value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/callbacks/{}/transition", ticket_id),
                body,
            )
            .await?;
        Ok(value.get("applied").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn record_notification(&self, ticket_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/callbacks/{}/notified", ticket_id),
            json!({ "at": at }),
        )
        .await?;
        Ok(())
    }

    async fn increment_attempts(&self, ticket_id: i64) -> Result<u32> {
        let value = self
            .send_json(
                reqwest::Method::POST,
                &format!("/callbacks/{}/attempts", ticket_id),
                json!({}),
            )
            .await?;
        value
            .get("attempts")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32)
            .ok_or_else(|| CoreError::ExternalService("attempts response malformed".into()))
    }

    async fn report_connected(&self, ticket_id: i64) -> Result<()> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/callbacks/{}/connected", ticket_id),
            json!({}),
        )
        .await?;
        Ok(())
    }

    async fn report_completed(&self, ticket_id: i64, duration_secs: u64) -> Result<()> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/callbacks/{}/completed", ticket_id),
            json!({ "duration_secs": duration_secs }),
        )
        .await?;
        Ok(())
    }

    async fn report_failed(&self, ticket_id: i64, cause: &str) -> Result<()> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/callbacks/{}/failed", ticket_id),
            json!({ "cause": cause }),
        )
        .await?;
        Ok(())
    }
}

/// In-memory gateway for tests and deployments without a ticketing service.
#[derive(Default)]
pub struct InMemoryTicketGateway {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    tickets: HashMap<i64, CallbackTicket>,
    next_id: i64,
    reports: Vec<(i64, String)>,
}

impl InMemoryTicketGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ticket: CallbackTicket) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(ticket.id + 1);
        state.tickets.insert(ticket.id, ticket);
    }

    pub fn get(&self, ticket_id: i64) -> Option<CallbackTicket> {
        self.state.lock().unwrap().tickets.get(&ticket_id).cloned()
    }

    /// Lifecycle reports received, in order, as (ticket_id, kind).
    pub fn reports(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().reports.clone()
    }
}

#[async_trait]
impl TicketGateway for InMemoryTicketGateway {
    async fn create_callback<'a>(
        &self,
        tenant: &str,
        _call_id: &str,
        extension: &str,
        request: &CallbackRequest,
        _transcript: Option<&'a str>,
        _summary: Option<&'a str>,
    ) -> Result<i64> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let now = Utc::now();
        state.tickets.insert(
            id,
            CallbackTicket {
                id,
                tenant: tenant.to_string(),
                number: request.number.clone(),
                extension: extension.to_string(),
                reason: request.reason.clone(),
                scheduled_at: request.scheduled_at,
                expires_at: request.scheduled_at + chrono::Duration::hours(4),
                status: TicketStatus::Pending,
                notification_count: 0,
                last_notified_at: None,
                attempts: 0,
                created_at: now,
            },
        );
        Ok(id)
    }

    async fn actionable_tickets(&self, tenant: &str) -> Result<Vec<CallbackTicket>> {
        let state = self.state.lock().unwrap();
        let mut tickets: Vec<CallbackTicket> = state
            .tickets
            .values()
            .filter(|t| t.tenant == tenant && t.status.is_pollable())
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.created_at);
        Ok(tickets)
    }

    async fn transition(
        &self,
        ticket_id: i64,
        from: TicketStatus,
        to: TicketStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| CoreError::NotFound(format!("ticket {}", ticket_id)))?;
        if ticket.status != from {
            return Ok(false);
        }
        if !from.can_transition(to) {
            return Err(CoreError::InvalidStateTransition(format!(
                "{} -> {}",
                from.as_str(),
                to.as_str()
            )));
        }
        ticket.status = to;
        Ok(true)
    }

    async fn record_notification(&self, ticket_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| CoreError::NotFound(format!("ticket {}", ticket_id)))?;
        ticket.notification_count += 1;
        ticket.last_notified_at = Some(at);
        Ok(())
    }

    async fn increment_attempts(&self, ticket_id: i64) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| CoreError::NotFound(format!("ticket {}", ticket_id)))?;
        ticket.attempts += 1;
        Ok(ticket.attempts)
    }

    async fn report_connected(&self, ticket_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.reports.push((ticket_id, "connected".to_string()));
        Ok(())
    }

    async fn report_completed(&self, ticket_id: i64, duration_secs: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .reports
            .push((ticket_id, format!("completed:{}", duration_secs)));
        Ok(())
    }

    async fn report_failed(&self, ticket_id: i64, cause: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.reports.push((ticket_id, format!("failed:{}", cause)));
        Ok(())
    }
}
