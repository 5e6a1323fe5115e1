//! Click-to-call origination
//!
//! Places the return call for a callback ticket: agent extension first, then
//! the customer over the gateway once the agent answers. The ticket is
//! claimed with a compare-and-swap to in_progress before dialing, so the
//! scheduler and a second click cannot act on it concurrently; a failed
//! attempt releases the claim back to ready_to_call while attempts remain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClickToCallConfig;
use crate::domain::callback::{CallbackTicket, TicketStatus};
use crate::domain::event::EventKind;
use crate::domain::ports::{CallControl, OriginateSpec, TicketGateway};
use crate::domain::shared::{CoreError, Result};
use crate::domain::transfer::HangupCause;

use super::probe::AvailabilityProbe;

/// What an origination request produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OriginateOutcome {
    /// The agent leg is dialing; watch `status(leg_id)`
    Started { leg_id: String, ticket_id: i64 },
    /// Not placed now; try again after the backoff
    Retryable {
        reason: String,
        retry_after_secs: u64,
    },
}

/// Observed state of an in-flight or finished click-to-call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Dialing,
    Connected,
    Completed,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallStatus {
    pub leg_id: String,
    pub ticket_id: i64,
    pub state: CallState,
    pub detail: Option<String>,
}

struct ActiveCall {
    ticket_id: i64,
    state: CallState,
    detail: Option<String>,
}

pub struct ClickToCallInitiator {
    control: Arc<dyn CallControl>,
    gateway: Arc<dyn TicketGateway>,
    probe: Arc<AvailabilityProbe>,
    config: ClickToCallConfig,
    calls: Mutex<HashMap<String, ActiveCall>>,
}

impl ClickToCallInitiator {
    pub fn new(
        control: Arc<dyn CallControl>,
        gateway: Arc<dyn TicketGateway>,
        probe: Arc<AvailabilityProbe>,
        config: ClickToCallConfig,
    ) -> Self {
        Self {
            control,
            gateway,
            probe,
            config,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Place the return call for a ticket.
    pub async fn originate_callback(
        self: &Arc<Self>,
        ticket: &CallbackTicket,
    ) -> Result<OriginateOutcome> {
        // Double-check right before acting; the cached probe answer may be
        // seconds stale
        let availability = self
            .probe
            .check_fresh(&ticket.tenant, &ticket.extension)
            .await;
        if !availability.available {
            return Ok(OriginateOutcome::Retryable {
                reason: availability
                    .reason
                    .unwrap_or_else(|| availability.status.as_str().to_string()),
                retry_after_secs: self.config.retry_after_secs,
            });
        }

        // Claim the ticket; losing the swap means another actor owns it
        if !self
            .gateway
            .transition(ticket.id, ticket.status, TicketStatus::InProgress)
            .await?
        {
            return Err(CoreError::RaceCondition(format!(
                "ticket {} already claimed",
                ticket.id
            )));
        }

        let dial_string = format!("user/{}@{}", ticket.extension, ticket.tenant);
        let bridge_app = format!(
            "&bridge(sofia/gateway/{}/{})",
            self.config.default_gateway, ticket.number
        );
        let mut spec = OriginateSpec::new(dial_string)
            .with_app(bridge_app)
            .with_timeout(Duration::from_secs(self.config.answer_timeout_secs))
            .with_variable("origination_caller_id_number", &ticket.number)
            .with_variable("callback_ticket_id", ticket.id.to_string());
        if let Some(reason) = &ticket.reason {
            spec = spec.with_variable("callback_reason", reason);
        }
        if self.config.record {
            spec = spec.with_variable(
                "execute_on_answer",
                format!(
                    "record_session $${{recordings_dir}}/callback_{}.wav",
                    ticket.id
                ),
            );
        }

        self.control
            .subscribe(&[
                EventKind::ChannelBridge,
                EventKind::ChannelHangup,
                EventKind::BackgroundJob,
            ])
            .await?;

        let handle = match self.control.originate(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                return self.attempt_failed(ticket, &e.to_string()).await;
            }
        };

        info!(
            ticket_id = ticket.id,
            leg_id = %handle.leg_id,
            extension = %ticket.extension,
            "click-to-call dialing agent"
        );
        self.calls.lock().unwrap().insert(
            handle.leg_id.clone(),
            ActiveCall {
                ticket_id: ticket.id,
                state: CallState::Dialing,
                detail: None,
            },
        );

        let job_timeout = Duration::from_secs(self.config.answer_timeout_secs + 10);
        match self.control.wait_job(&handle.job_id, job_timeout).await? {
            Some(result) if result.trim_start().starts_with("-ERR") => {
                self.mark(&handle.leg_id, CallState::Failed, Some(result.clone()));
                self.attempt_failed(ticket, result.trim()).await
            }
            Some(_) => {
                // Agent answered; the bridge to the customer runs on answer
                let watcher = self.clone();
                let leg_id = handle.leg_id.clone();
                let ticket_id = ticket.id;
                tokio::spawn(async move {
                    watcher.watch_call(leg_id, ticket_id).await;
                });
                Ok(OriginateOutcome::Started {
                    leg_id: handle.leg_id,
                    ticket_id: ticket.id,
                })
            }
            None => {
                self.mark(
                    &handle.leg_id,
                    CallState::Failed,
                    Some("origination timed out".to_string()),
                );
                let _ = self
                    .control
                    .hangup(&handle.leg_id, HangupCause::OriginatorCancel)
                    .await;
                self.attempt_failed(ticket, "origination timed out").await
            }
        }
    }

    /// Status of a click-to-call leg, if known.
    pub fn status(&self, leg_id: &str) -> Option<CallStatus> {
        let calls = self.calls.lock().unwrap();
        calls.get(leg_id).map(|call| CallStatus {
            leg_id: leg_id.to_string(),
            ticket_id: call.ticket_id,
            state: call.state,
            detail: call.detail.clone(),
        })
    }

    /// Hang up an in-flight click-to-call and cancel its ticket.
    pub async fn cancel(&self, leg_id: &str) -> Result<bool> {
        let call = {
            let calls = self.calls.lock().unwrap();
            calls.get(leg_id).map(|c| (c.ticket_id, c.state))
        };
        let Some((ticket_id, state)) = call else {
            return Ok(false);
        };
        if !matches!(state, CallState::Dialing | CallState::Connected) {
            return Ok(false);
        }

        if let Err(e) = self
            .control
            .hangup(leg_id, HangupCause::OriginatorCancel)
            .await
        {
            warn!(leg_id, error = %e, "cancel hangup failed");
        }
        self.mark(leg_id, CallState::Canceled, None);
        self.gateway
            .transition(ticket_id, TicketStatus::InProgress, TicketStatus::Canceled)
            .await?;
        info!(ticket_id, leg_id, "click-to-call canceled");
        Ok(true)
    }

    /// Record an attempt failure: release the claim while attempts remain,
    /// otherwise fail the ticket for good.
    async fn attempt_failed(
        self: &Arc<Self>,
        ticket: &CallbackTicket,
        cause: &str,
    ) -> Result<OriginateOutcome> {
        let attempts = self.gateway.increment_attempts(ticket.id).await?;
        warn!(
            ticket_id = ticket.id,
            attempts,
            max = self.config.max_attempts,
            cause,
            "click-to-call attempt failed"
        );

        if attempts < self.config.max_attempts {
            self.gateway
                .transition(ticket.id, TicketStatus::InProgress, TicketStatus::ReadyToCall)
                .await?;
            Ok(OriginateOutcome::Retryable {
                reason: cause.to_string(),
                retry_after_secs: self.config.retry_after_secs,
            })
        } else {
            self.gateway
                .transition(ticket.id, TicketStatus::InProgress, TicketStatus::Failed)
                .await?;
            self.gateway.report_failed(ticket.id, cause).await?;
            Err(CoreError::ExternalService(format!(
                "callback ticket {} failed after {} attempts: {}",
                ticket.id, attempts, cause
            )))
        }
    }

    /// Follow an answered call to its end and report the outcome.
    async fn watch_call(self: Arc<Self>, leg_id: String, ticket_id: i64) {
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);

        let first = self
            .control
            .wait_for(
                &[EventKind::ChannelBridge, EventKind::ChannelHangup],
                Some(&leg_id),
                call_timeout,
            )
            .await;

        match first {
            Ok(Some(event)) if event.kind == EventKind::ChannelBridge => {
                info!(ticket_id, leg_id = %leg_id, "customer connected");
                self.mark(&leg_id, CallState::Connected, None);
                if let Err(e) = self.gateway.report_connected(ticket_id).await {
                    warn!(ticket_id, error = %e, "connected report failed");
                }

                let connected_at = Instant::now();
                let end = self
                    .control
                    .wait_for(&[EventKind::ChannelHangup], Some(&leg_id), call_timeout)
                    .await;
                let duration_secs = connected_at.elapsed().as_secs();

                match end {
                    Ok(Some(_)) | Ok(None) => {
                        self.mark(&leg_id, CallState::Completed, None);
                        if let Ok(true) = self
                            .gateway
                            .transition(ticket_id, TicketStatus::InProgress, TicketStatus::Completed)
                            .await
                        {
                            if let Err(e) =
                                self.gateway.report_completed(ticket_id, duration_secs).await
                            {
                                warn!(ticket_id, error = %e, "completed report failed");
                            }
                            info!(ticket_id, duration_secs, "callback completed");
                        } else {
                            // Cancel already moved the ticket
                            debug!(ticket_id, "ticket no longer in progress at hangup");
                        }
                    }
                    Err(e) => {
                        warn!(ticket_id, error = %e, "lost track of bridged call");
                        self.mark(&leg_id, CallState::Failed, Some(e.to_string()));
                    }
                }
            }
            Ok(Some(event)) => {
                // Hangup before any bridge: the customer leg never connected
                let cause = event
                    .hangup_cause()
                    .unwrap_or(HangupCause::Other("UNKNOWN".to_string()));
                warn!(ticket_id, cause = cause.as_str(), "call ended before bridge");
                self.mark(&leg_id, CallState::Failed, Some(cause.as_str().to_string()));
                if let Ok(true) = self
                    .gateway
                    .transition(ticket_id, TicketStatus::InProgress, TicketStatus::Failed)
                    .await
                {
                    if let Err(e) = self.gateway.report_failed(ticket_id, cause.as_str()).await {
                        warn!(ticket_id, error = %e, "failure report failed");
                    }
                }
            }
            Ok(None) => {
                warn!(ticket_id, "call watch timed out");
                self.mark(&leg_id, CallState::Failed, Some("watch timeout".to_string()));
                let _ = self
                    .control
                    .hangup(&leg_id, HangupCause::AllottedTimeout)
                    .await;
                let _ = self
                    .gateway
                    .transition(ticket_id, TicketStatus::InProgress, TicketStatus::Failed)
                    .await;
                let _ = self.gateway.report_failed(ticket_id, "call timeout").await;
            }
            Err(e) => {
                warn!(ticket_id, error = %e, "call watch lost the connection");
                self.mark(&leg_id, CallState::Failed, Some(e.to_string()));
            }
        }
    }

    fn mark(&self, leg_id: &str, state: CallState, detail: Option<String>) {
        let mut calls = self.calls.lock().unwrap();
        if let Some(call) = calls.get_mut(leg_id) {
            call.state = state;
            call.detail = detail;
        }
    }
}
