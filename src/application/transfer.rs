//! Transfer orchestration
//!
//! Drives one live transfer attempt from "caller asked for somebody" to a
//! terminal `TransferResult`: hold audio on, originate the candidate leg,
//! watch answer/hangup/timeout, bridge on success. The caller hanging up at
//! any point cancels the candidate and suppresses the callback offer.
//!
//! One orchestration runs per caller leg; starting a new one cancels the
//! in-flight one for the same leg.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::domain::destination::TransferDestination;
use crate::domain::event::EventKind;
use crate::domain::ports::{
    AudioChannel, CallControl, OriginateSpec, SecretarySettings, TenantConfig,
};
use crate::domain::shared::{CoreError, Result};
use crate::domain::transfer::{HangupCause, TransferResult, TransferStatus};

use super::resolver::DestinationResolver;

/// Extra wait beyond the ring timeout, covering event propagation.
const WAIT_GRACE: Duration = Duration::from_secs(5);

pub struct TransferOrchestrator {
    control: Arc<dyn CallControl>,
    resolver: Arc<DestinationResolver>,
    tenants: Arc<dyn TenantConfig>,
    config: TransferConfig,
    /// Cancellation handle per active caller leg
    active: Mutex<HashMap<String, Arc<Notify>>>,
}

impl TransferOrchestrator {
    pub fn new(
        control: Arc<dyn CallControl>,
        resolver: Arc<DestinationResolver>,
        tenants: Arc<dyn TenantConfig>,
        config: TransferConfig,
    ) -> Self {
        Self {
            control,
            resolver,
            tenants,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a spoken destination request and run the transfer.
    pub async fn transfer(
        &self,
        tenant: &str,
        secretary: &str,
        caller_leg: &str,
        spoken: &str,
    ) -> Result<TransferResult> {
        let destination = self
            .resolver
            .resolve(tenant, secretary, spoken)
            .await?
            .ok_or_else(|| CoreError::UnknownDestination(spoken.to_string()))?;
        self.transfer_to(tenant, secretary, caller_leg, destination)
            .await
    }

    /// Run the transfer state machine against an already-resolved destination.
    pub async fn transfer_to(
        &self,
        tenant: &str,
        secretary: &str,
        caller_leg: &str,
        destination: TransferDestination,
    ) -> Result<TransferResult> {
        let started = Instant::now();

        // Closed destinations never get an originate
        if let Some(reason) = self.resolver.closed_reason(&destination, Utc::now()) {
            return Ok(
                TransferResult::new(TransferStatus::Unavailable, Some(destination))
                    .with_error(reason),
            );
        }

        let settings = self
            .tenants
            .secretary_settings(tenant, secretary)
            .await
            .unwrap_or_default();

        // A new request for the same caller leg supersedes the running one
        let cancel = Arc::new(Notify::new());
        let previous = self
            .active
            .lock()
            .unwrap()
            .insert(caller_leg.to_string(), cancel.clone());
        if let Some(previous) = previous {
            previous.notify_waiters();
        }

        self.control
            .subscribe(&[
                EventKind::ChannelAnswer,
                EventKind::ChannelHangup,
                EventKind::BackgroundJob,
            ])
            .await?;

        if let Err(e) = self
            .control
            .broadcast_audio(caller_leg, &settings.moh_resource, AudioChannel::ALeg)
            .await
        {
            warn!(caller_leg, error = %e, "hold audio failed to start");
        }

        info!(
            tenant,
            caller_leg,
            destination = %destination.name,
            "transfer started"
        );

        let mut result;
        let mut attempt = 0u32;
        loop {
            result = self
                .attempt(caller_leg, &destination, &settings, &cancel)
                .await;
            result.retries = attempt;

            let retry = matches!(
                result.status,
                TransferStatus::Busy | TransferStatus::NoAnswer | TransferStatus::Failed
            ) && attempt < destination.max_retries;
            if !retry {
                break;
            }
            attempt += 1;
            debug!(
                caller_leg,
                attempt,
                status = result.status.as_str(),
                "retrying transfer"
            );
            tokio::time::sleep(Duration::from_secs(destination.retry_delay_secs as u64)).await;
        }

        // Give the caller their audio back unless they are bridged or gone
        if !matches!(
            result.status,
            TransferStatus::Success | TransferStatus::Cancelled
        ) {
            if let Err(e) = self.control.stop_audio(caller_leg).await {
                debug!(caller_leg, error = %e, "hold audio stop failed");
            }
        }

        // Only clear the slot if it still belongs to this orchestration
        {
            let mut active = self.active.lock().unwrap();
            if active
                .get(caller_leg)
                .map(|n| Arc::ptr_eq(n, &cancel))
                .unwrap_or(false)
            {
                active.remove(caller_leg);
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            tenant,
            caller_leg,
            status = result.status.as_str(),
            duration_ms = result.duration_ms,
            "transfer finished"
        );
        Ok(result)
    }

    /// Cancel the in-flight transfer for a caller leg, if any.
    pub fn cancel(&self, caller_leg: &str) -> bool {
        let active = self.active.lock().unwrap();
        match active.get(caller_leg) {
            Some(notify) => {
                notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    async fn attempt(
        &self,
        caller_leg: &str,
        destination: &TransferDestination,
        settings: &SecretarySettings,
        cancel: &Notify,
    ) -> TransferResult {
        // The caller may have dropped during a retry delay; a gone caller
        // means cancelled, never a failure that offers a callback
        if let Ok(false) = self.control.leg_exists(caller_leg).await {
            info!(caller_leg, "caller leg gone before attempt");
            return TransferResult::new(TransferStatus::Cancelled, Some(destination.clone()));
        }

        let dial_string = match destination.dial_string() {
            Ok(d) => d,
            Err(e) => {
                return TransferResult::new(TransferStatus::Failed, Some(destination.clone()))
                    .with_error(e.to_string());
            }
        };

        let ring_timeout = Duration::from_secs(destination.ring_timeout_secs.max(1) as u64);
        let mut spec = OriginateSpec::new(dial_string)
            .with_timeout(ring_timeout)
            .with_variable("origination_caller_id_name", &self.config.caller_id_name);
        if let Ok(Some(number)) = self
            .control
            .get_variable(caller_leg, "caller_id_number")
            .await
        {
            spec = spec.with_variable("origination_caller_id_number", number);
        }

        let handle = match self.control.originate(spec).await {
            Ok(h) => h,
            Err(e) => {
                return TransferResult::new(TransferStatus::Failed, Some(destination.clone()))
                    .with_error(e.to_string());
            }
        };
        let candidate = handle.leg_id.clone();
        let wait_timeout = ring_timeout + WAIT_GRACE;

        let outcome = tokio::select! {
            event = self.control.wait_for(
                &[EventKind::ChannelAnswer, EventKind::ChannelHangup],
                Some(&candidate),
                wait_timeout,
            ) => Outcome::Candidate(event),
            event = self.control.wait_for(
                &[EventKind::ChannelHangup],
                Some(caller_leg),
                wait_timeout,
            ) => Outcome::Caller(event),
            _ = cancel.notified() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Candidate(Ok(Some(event))) if event.kind == EventKind::ChannelAnswer => {
                self.complete_answered(caller_leg, &candidate, destination, settings)
                    .await
            }
            Outcome::Candidate(Ok(Some(event))) => {
                let cause = event
                    .hangup_cause()
                    .unwrap_or(HangupCause::Other("UNKNOWN".to_string()));
                // A clean hangup before answer still means nobody took the call
                let status = match cause.transfer_status() {
                    TransferStatus::Success => TransferStatus::NoAnswer,
                    status => status,
                };
                TransferResult::new(status, Some(destination.clone()))
                    .with_cause(cause)
                    .with_candidate_leg(candidate)
            }
            Outcome::Candidate(Ok(None)) | Outcome::Caller(Ok(None)) => {
                self.kill_candidate(&candidate).await;
                TransferResult::new(TransferStatus::NoAnswer, Some(destination.clone()))
                    .with_candidate_leg(candidate)
            }
            Outcome::Caller(Ok(Some(_))) => {
                info!(caller_leg, "caller hung up mid-transfer");
                self.kill_candidate(&candidate).await;
                TransferResult::new(TransferStatus::Cancelled, Some(destination.clone()))
                    .with_candidate_leg(candidate)
            }
            Outcome::Cancelled => {
                self.kill_candidate(&candidate).await;
                TransferResult::new(TransferStatus::Cancelled, Some(destination.clone()))
                    .with_candidate_leg(candidate)
            }
            Outcome::Candidate(Err(e)) | Outcome::Caller(Err(e)) => {
                self.kill_candidate(&candidate).await;
                TransferResult::new(TransferStatus::Failed, Some(destination.clone()))
                    .with_error(e.to_string())
                    .with_candidate_leg(candidate)
            }
        }
    }

    /// Candidate answered: optional announcement window, then bridge.
    async fn complete_answered(
        &self,
        caller_leg: &str,
        candidate: &str,
        destination: &TransferDestination,
        settings: &SecretarySettings,
    ) -> TransferResult {
        if settings.announce_enabled {
            if let Err(e) = self
                .control
                .broadcast_audio(candidate, &settings.announce_resource, AudioChannel::ALeg)
                .await
            {
                warn!(candidate, error = %e, "announcement failed to play");
            }
            let window = Duration::from_secs(settings.announce_accept_window_secs.max(1) as u64);
            match self
                .control
                .wait_for(&[EventKind::ChannelHangup], Some(candidate), window)
                .await
            {
                // Hanging up inside the window declines the call
                Ok(Some(event)) => {
                    let cause = event
                        .hangup_cause()
                        .unwrap_or(HangupCause::CallRejected);
                    return TransferResult::new(
                        TransferStatus::Rejected,
                        Some(destination.clone()),
                    )
                    .with_cause(cause)
                    .with_candidate_leg(candidate.to_string());
                }
                Ok(None) => {}
                Err(e) => {
                    return TransferResult::new(TransferStatus::Failed, Some(destination.clone()))
                        .with_error(e.to_string())
                        .with_candidate_leg(candidate.to_string());
                }
            }
        }

        if let Err(e) = self.control.stop_audio(caller_leg).await {
            debug!(caller_leg, error = %e, "hold audio stop failed");
        }
        // The caller should drop when the agent eventually hangs up
        if let Err(e) = self
            .control
            .set_variable(caller_leg, "hangup_after_bridge", "true")
            .await
        {
            warn!(caller_leg, error = %e, "hangup_after_bridge not set");
        }

        match self.control.bridge(caller_leg, candidate).await {
            Ok(()) => TransferResult::new(TransferStatus::Success, Some(destination.clone()))
                .with_candidate_leg(candidate.to_string()),
            Err(e) => {
                self.kill_candidate(candidate).await;
                TransferResult::new(TransferStatus::Failed, Some(destination.clone()))
                    .with_error(e.to_string())
                    .with_candidate_leg(candidate.to_string())
            }
        }
    }

    async fn kill_candidate(&self, candidate: &str) {
        if let Err(e) = self
            .control
            .hangup(candidate, HangupCause::OriginatorCancel)
            .await
        {
            debug!(candidate, error = %e, "candidate hangup failed");
        }
    }
}

enum Outcome {
    Candidate(Result<Option<crate::domain::event::ProtocolEvent>>),
    Caller(Result<Option<crate::domain::event::ProtocolEvent>>),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::domain::destination::{HoursRange, Routing, WorkingHours};
    use crate::domain::event::ProtocolEvent;
    use crate::domain::ports::OriginateHandle;
    use crate::infrastructure::directory::{StaticDestinationSource, StaticTenantConfig};

    const CALLER: &str = "caller-leg";
    const CANDIDATE: &str = "candidate-leg";

    /// One scripted answer to a wait_for call, delivered after a delay.
    /// Tests run under paused time, so the shortest delay deterministically
    /// wins the orchestrator's select.
    enum Step {
        Event(ProtocolEvent, u64),
        Timeout(u64),
        Never,
    }

    #[derive(Default)]
    struct FakeControl {
        candidate_steps: StdMutex<VecDeque<Step>>,
        caller_steps: StdMutex<VecDeque<Step>>,
        /// Scripted leg_exists answers for the caller leg; empty means present
        caller_present: StdMutex<VecDeque<bool>>,
        ops: StdMutex<Vec<String>>,
    }

    impl FakeControl {
        fn op(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CallControl for FakeControl {
        fn is_connected(&self) -> bool {
            true
        }

        async fn execute(&self, _command: &str) -> Result<String> {
            Ok("+OK".to_string())
        }

        async fn execute_background(&self, _command: &str) -> Result<String> {
            Ok("job-1".to_string())
        }

        async fn subscribe(&self, _kinds: &[EventKind]) -> Result<()> {
            Ok(())
        }

        async fn unsubscribe(&self, _kinds: &[EventKind]) -> Result<()> {
            Ok(())
        }

        async fn wait_for<'a>(
            &self,
            _kinds: &[EventKind],
            leg: Option<&'a str>,
            _timeout: Duration,
        ) -> Result<Option<ProtocolEvent>> {
            let step = {
                let queue = if leg == Some(CALLER) {
                    &self.caller_steps
                } else {
                    &self.candidate_steps
                };
                queue.lock().unwrap().pop_front()
            };
            match step {
                Some(Step::Event(event, delay_ms)) => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Ok(Some(event))
                }
                Some(Step::Timeout(delay_ms)) => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Ok(None)
                }
                Some(Step::Never) | None => {
                    tokio::time::sleep(Duration::from_secs(86_400)).await;
                    Ok(None)
                }
            }
        }

        async fn wait_job(&self, _job_id: &str, _timeout: Duration) -> Result<Option<String>> {
            Ok(Some("+OK".to_string()))
        }

        async fn originate(&self, spec: OriginateSpec) -> Result<OriginateHandle> {
            self.op(format!("originate {}", spec.dial_string));
            Ok(OriginateHandle {
                leg_id: CANDIDATE.to_string(),
                job_id: "job-1".to_string(),
            })
        }

        async fn broadcast_audio(
            &self,
            leg: &str,
            resource: &str,
            _channel: AudioChannel,
        ) -> Result<()> {
            self.op(format!("broadcast {} {}", leg, resource));
            Ok(())
        }

        async fn stop_audio(&self, leg: &str) -> Result<()> {
            self.op(format!("stop_audio {}", leg));
            Ok(())
        }

        async fn bridge(&self, leg_a: &str, leg_b: &str) -> Result<()> {
            self.op(format!("bridge {} {}", leg_a, leg_b));
            Ok(())
        }

        async fn hangup(&self, leg: &str, cause: HangupCause) -> Result<()> {
            self.op(format!("hangup {} {}", leg, cause.as_str()));
            Ok(())
        }

        async fn leg_exists(&self, leg: &str) -> Result<bool> {
            if leg == CALLER {
                let next = self.caller_present.lock().unwrap().pop_front();
                return Ok(next.unwrap_or(true));
            }
            Ok(true)
        }

        async fn set_variable(&self, leg: &str, name: &str, value: &str) -> Result<()> {
            self.op(format!("setvar {} {}={}", leg, name, value));
            Ok(())
        }

        async fn get_variable(&self, _leg: &str, _name: &str) -> Result<Option<String>> {
            Ok(Some("+5511999990000".to_string()))
        }

        async fn is_registered(&self, _extension: &str, _context: &str) -> Result<bool> {
            Ok(true)
        }

        async fn active_channels(&self) -> Result<String> {
            Ok("0 total.".to_string())
        }
    }

    fn dest(name: &str) -> TransferDestination {
        let mut d = TransferDestination::new(
            name,
            Routing::Extension {
                number: "1001".to_string(),
                context: "acme".to_string(),
            },
        );
        d.max_retries = 0;
        d
    }

    fn orchestrator(control: Arc<FakeControl>) -> TransferOrchestrator {
        orchestrator_with(control, SecretarySettings::default())
    }

    fn orchestrator_with(
        control: Arc<FakeControl>,
        settings: SecretarySettings,
    ) -> TransferOrchestrator {
        let tenants = StaticTenantConfig::new();
        tenants.set_settings("acme", "front", settings);
        TransferOrchestrator::new(
            control,
            Arc::new(DestinationResolver::new(Arc::new(
                StaticDestinationSource::new(),
            ))),
            Arc::new(tenants),
            TransferConfig {
                moh_resource: "local_stream://moh".to_string(),
                default_ring_timeout_secs: 30,
                caller_id_name: "Virtual Attendant".to_string(),
            },
        )
    }

    fn answer_event() -> ProtocolEvent {
        ProtocolEvent::new(EventKind::ChannelAnswer, Some(CANDIDATE.to_string()))
    }

    fn hangup_event(leg: &str, cause: &str) -> ProtocolEvent {
        ProtocolEvent::new(EventKind::ChannelHangup, Some(leg.to_string()))
            .with_header("Hangup-Cause", cause)
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_transfer_bridges() {
        let control = Arc::new(FakeControl::default());
        control
            .candidate_steps
            .lock()
            .unwrap()
            .push_back(Step::Event(answer_event(), 10));
        control.caller_steps.lock().unwrap().push_back(Step::Never);

        let result = orchestrator(control.clone())
            .transfer_to("acme", "front", CALLER, dest("Jeni"))
            .await
            .unwrap();

        assert_eq!(result.status, TransferStatus::Success);
        assert_eq!(result.candidate_leg.as_deref(), Some(CANDIDATE));
        let ops = control.ops();
        assert!(ops.contains(&format!("bridge {} {}", CALLER, CANDIDATE)));
        assert!(ops.contains(&format!("setvar {} hangup_after_bridge=true", CALLER)));
        // Hold audio started before the originate and stopped before the bridge
        assert!(ops[0].starts_with("broadcast caller-leg"));
        let stop = ops.iter().position(|o| o == "stop_audio caller-leg").unwrap();
        let bridge = ops.iter().position(|o| o.starts_with("bridge")).unwrap();
        assert!(stop < bridge);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_candidate_maps_cause() {
        let control = Arc::new(FakeControl::default());
        control
            .candidate_steps
            .lock()
            .unwrap()
            .push_back(Step::Event(hangup_event(CANDIDATE, "USER_BUSY"), 10));
        control.caller_steps.lock().unwrap().push_back(Step::Never);

        let result = orchestrator(control)
            .transfer_to("acme", "front", CALLER, dest("Jeni"))
            .await
            .unwrap();

        assert_eq!(result.status, TransferStatus::Busy);
        assert_eq!(result.hangup_cause, Some(HangupCause::UserBusy));
        assert!(result.should_offer_callback());
        assert!(result.message().contains("Jeni"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ring_timeout_kills_candidate() {
        let control = Arc::new(FakeControl::default());
        control
            .candidate_steps
            .lock()
            .unwrap()
            .push_back(Step::Timeout(10));
        control.caller_steps.lock().unwrap().push_back(Step::Never);

        let result = orchestrator(control.clone())
            .transfer_to("acme", "front", CALLER, dest("Jeni"))
            .await
            .unwrap();

        assert_eq!(result.status, TransferStatus::NoAnswer);
        assert!(control
            .ops()
            .contains(&format!("hangup {} ORIGINATOR_CANCEL", CANDIDATE)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_hangup_cancels_and_suppresses_callback() {
        let control = Arc::new(FakeControl::default());
        control.candidate_steps.lock().unwrap().push_back(Step::Never);
        control
            .caller_steps
            .lock()
            .unwrap()
            .push_back(Step::Event(hangup_event(CALLER, "NORMAL_CLEARING"), 10));

        let result = orchestrator(control.clone())
            .transfer_to("acme", "front", CALLER, dest("Jeni"))
            .await
            .unwrap();

        assert_eq!(result.status, TransferStatus::Cancelled);
        assert!(!result.should_offer_callback());
        assert!(control
            .ops()
            .contains(&format!("hangup {} ORIGINATOR_CANCEL", CANDIDATE)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_busy_then_success() {
        let control = Arc::new(FakeControl::default());
        {
            let mut steps = control.candidate_steps.lock().unwrap();
            steps.push_back(Step::Event(hangup_event(CANDIDATE, "USER_BUSY"), 10));
            steps.push_back(Step::Event(answer_event(), 10));
        }
        {
            let mut steps = control.caller_steps.lock().unwrap();
            steps.push_back(Step::Never);
            steps.push_back(Step::Never);
        }

        let mut d = dest("Jeni");
        d.max_retries = 1;
        d.retry_delay_secs = 1;

        let result = orchestrator(control.clone())
            .transfer_to("acme", "front", CALLER, d)
            .await
            .unwrap();

        assert_eq!(result.status, TransferStatus::Success);
        assert_eq!(result.retries, 1);
        let originates = control
            .ops()
            .iter()
            .filter(|o| o.starts_with("originate"))
            .count();
        assert_eq!(originates, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_gone_during_retry_delay_cancels() {
        let control = Arc::new(FakeControl::default());
        control
            .candidate_steps
            .lock()
            .unwrap()
            .push_back(Step::Event(hangup_event(CANDIDATE, "USER_BUSY"), 10));
        control.caller_steps.lock().unwrap().push_back(Step::Never);
        {
            // Present for the first attempt, gone when the retry starts
            let mut present = control.caller_present.lock().unwrap();
            present.push_back(true);
            present.push_back(false);
        }

        let mut d = dest("Jeni");
        d.max_retries = 1;
        d.retry_delay_secs = 1;

        let result = orchestrator(control.clone())
            .transfer_to("acme", "front", CALLER, d)
            .await
            .unwrap();

        assert_eq!(result.status, TransferStatus::Cancelled);
        assert!(!result.should_offer_callback());
        let originates = control
            .ops()
            .iter()
            .filter(|o| o.starts_with("originate"))
            .count();
        assert_eq!(originates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_announced_transfer_rejection() {
        let control = Arc::new(FakeControl::default());
        {
            let mut steps = control.candidate_steps.lock().unwrap();
            // Answer, then the agent hangs up inside the accept window
            steps.push_back(Step::Event(answer_event(), 10));
            steps.push_back(Step::Event(hangup_event(CANDIDATE, "NORMAL_CLEARING"), 10));
        }
        control.caller_steps.lock().unwrap().push_back(Step::Never);

        let settings = SecretarySettings {
            announce_enabled: true,
            ..SecretarySettings::default()
        };
        let result = orchestrator_with(control.clone(), settings)
            .transfer_to("acme", "front", CALLER, dest("Jeni"))
            .await
            .unwrap();

        assert_eq!(result.status, TransferStatus::Rejected);
        assert!(!control.ops().iter().any(|o| o.starts_with("bridge")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_hours_short_circuit() {
        let control = Arc::new(FakeControl::default());

        let mut d = dest("Finance");
        // A one-minute window two hours from now, so the schedule is closed
        let now = Utc::now();
        let start = now.time().overflowing_add_signed(chrono::Duration::hours(2)).0;
        let end = start.overflowing_add_signed(chrono::Duration::minutes(1)).0;
        d.working_hours = WorkingHours {
            ranges: vec![HoursRange::new(vec![], start, end)],
        };
        assert!(!d.working_hours.is_open_at(now));

        let result = orchestrator(control.clone())
            .transfer_to("acme", "front", CALLER, d)
            .await
            .unwrap();

        assert_eq!(result.status, TransferStatus::Unavailable);
        assert!(result.error.is_some());
        assert!(result.should_offer_callback());
        // Closed destinations cause zero platform traffic
        assert!(control.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_destination() {
        let control = Arc::new(FakeControl::default());
        let err = orchestrator(control)
            .transfer("acme", "front", CALLER, "engineering")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownDestination(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_cancel() {
        let control = Arc::new(FakeControl::default());
        control.candidate_steps.lock().unwrap().push_back(Step::Never);
        control.caller_steps.lock().unwrap().push_back(Step::Never);

        let orchestrator = Arc::new(orchestrator(control.clone()));
        let task = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .transfer_to("acme", "front", CALLER, dest("Jeni"))
                    .await
            })
        };

        // Let the orchestration reach its wait, then cancel it
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(orchestrator.cancel(CALLER));

        let result = task.await.unwrap().unwrap();
        assert_eq!(result.status, TransferStatus::Cancelled);
        assert!(!orchestrator.cancel(CALLER));
    }
}
