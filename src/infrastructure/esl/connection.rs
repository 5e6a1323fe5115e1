//! Event-socket client
//!
//! One persistent connection per tenant, shared by every orchestrator and
//! initiator. A single reader task owns the wire: it resolves command
//! replies against a FIFO correlation queue and fans events out to
//! registered handlers and one-shot waiters. Nothing caller-visible ever
//! blocks the reader; on disconnection every pending wait resolves with an
//! error instead of hanging.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EslConfig;
use crate::domain::event::{EventKind, ProtocolEvent};
use crate::domain::ports::{AudioChannel, CallControl, OriginateHandle, OriginateSpec};
use crate::domain::shared::Result as CoreResult;
use crate::domain::transfer::HangupCause;

use super::error::EslError;
use super::frame::{extract_error_cause, parse_event, read_frame, Frame};

/// Synchronous event callback registered with `on_event`.
pub type EventCallback = Arc<dyn Fn(&ProtocolEvent) + Send + Sync>;

struct Waiter {
    id: u64,
    kinds: Vec<EventKind>,
    leg: Option<String>,
    tx: oneshot::Sender<ProtocolEvent>,
}

struct Handler {
    id: u64,
    kinds: Vec<EventKind>,
    leg: Option<String>,
    callback: EventCallback,
}

enum JobSlot {
    Waiting(oneshot::Sender<String>),
    Done(String),
}

struct IoState {
    writer: Option<OwnedWriteHalf>,
    /// Reply correlation: replies arrive in command order
    pending: VecDeque<oneshot::Sender<Frame>>,
}

struct Shared {
    connected: AtomicBool,
    io: Mutex<IoState>,
    waiters: StdMutex<Vec<Waiter>>,
    handlers: StdMutex<Vec<Handler>>,
    jobs: StdMutex<HashMap<String, JobSlot>>,
    /// Origination job -> pre-assigned leg, for synthesizing hangups
    originate_legs: StdMutex<HashMap<String, String>>,
    subscriptions: StdMutex<HashSet<EventKind>>,
    next_id: AtomicU64,
}

/// Persistent client for the call-control event socket.
pub struct EslConnection {
    config: EslConfig,
    shared: Arc<Shared>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    reconnecting: AtomicBool,
}

impl EslConnection {
    pub fn new(config: EslConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                io: Mutex::new(IoState {
                    writer: None,
                    pending: VecDeque::new(),
                }),
                waiters: StdMutex::new(Vec::new()),
                handlers: StdMutex::new(Vec::new()),
                jobs: StdMutex::new(HashMap::new()),
                originate_legs: StdMutex::new(HashMap::new()),
                subscriptions: StdMutex::new(HashSet::new()),
                next_id: AtomicU64::new(1),
            }),
            reader_task: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
        }
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Connect and authenticate, then start the reader task.
    pub async fn connect(&self) -> Result<(), EslError> {
        if self.connected() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| EslError::Timeout(self.config.connect_timeout()))??;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Banner, then auth, handled inline before the reader task exists
        let banner = read_frame(&mut reader).await?;
        if banner.content_type() != Some("auth/request") {
            return Err(EslError::Protocol(format!(
                "expected auth request, got {:?}",
                banner.content_type()
            )));
        }

        write_half
            .write_all(format!("auth {}\n\n", self.config.password).as_bytes())
            .await?;
        write_half.flush().await?;

        let reply = read_frame(&mut reader).await?;
        match reply.reply_text() {
            Some(text) if text.starts_with("+OK") => {}
            other => {
                return Err(EslError::Auth(other.unwrap_or("no reply").to_string()));
            }
        }

        {
            let mut io = self.shared.io.lock().await;
            io.writer = Some(write_half);
            io.pending.clear();
        }
        self.shared.connected.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            reader_loop(shared, reader).await;
        });
        *self.reader_task.lock().await = Some(handle);

        info!(host = %self.config.host, port = self.config.port, "connected to event socket");

        // Re-apply subscriptions after a reconnect
        let kinds: Vec<EventKind> = {
            let subs = self.shared.subscriptions.lock().unwrap();
            subs.iter().cloned().collect()
        };
        if !kinds.is_empty() {
            self.send_subscribe(&kinds).await?;
        }

        Ok(())
    }

    pub async fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        teardown(&self.shared).await;
        info!("disconnected from event socket");
    }

    /// Reconnect with bounded exponential backoff and jitter.
    pub async fn reconnect(&self) -> Result<(), EslError> {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return Err(EslError::NotConnected);
        }

        let result = self.reconnect_inner().await;
        self.reconnecting.store(false, Ordering::SeqCst);
        result
    }

    async fn reconnect_inner(&self) -> Result<(), EslError> {
        for attempt in 0..self.config.reconnect_max_attempts {
            self.disconnect().await;

            let base = self.config.reconnect_base_delay_ms.saturating_mul(1 << attempt);
            let capped = base.min(self.config.reconnect_max_delay_ms);
            // ±20% jitter so reconnecting tenants do not stampede
            let jitter = rand::thread_rng().gen_range(0.8..1.2);
            let delay = Duration::from_millis((capped as f64 * jitter) as u64);
            tokio::time::sleep(delay).await;

            info!(
                attempt = attempt + 1,
                max = self.config.reconnect_max_attempts,
                "reconnecting to event socket"
            );
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "reconnect attempt failed"),
            }
        }
        Err(EslError::NotConnected)
    }

    /// Send a raw command and await its correlated reply frame.
    async fn send_command(&self, raw: &str) -> Result<Frame, EslError> {
        if !self.connected() {
            return Err(EslError::NotConnected);
        }

        let rx = {
            let mut io = self.shared.io.lock().await;
            let writer = io.writer.as_mut().ok_or(EslError::NotConnected)?;
            writer.write_all(format!("{}\n\n", raw).as_bytes()).await?;
            writer.flush().await?;
            let (tx, rx) = oneshot::channel();
            io.pending.push_back(tx);
            rx
        };

        let timeout = self.config.command_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(EslError::Disconnected),
            Err(_) => {
                // A missing reply leaves the correlation queue ambiguous;
                // the only safe recovery is to drop the connection.
                warn!(command = raw, "command reply timed out, closing connection");
                self.disconnect().await;
                Err(EslError::Timeout(timeout))
            }
        }
    }

    /// Run an api command, returning its raw result text.
    pub async fn execute_api(&self, command: &str) -> Result<String, EslError> {
        let frame = self.send_command(&format!("api {}", command)).await?;
        Ok(frame.result_text())
    }

    /// Run a command in the background, returning the job id.
    pub async fn execute_bgapi(&self, command: &str) -> Result<String, EslError> {
        let frame = self.send_command(&format!("bgapi {}", command)).await?;
        if let Some(job_id) = frame.header("Job-UUID") {
            return Ok(job_id.to_string());
        }
        // Older platforms put it in the reply text: "+OK Job-UUID: <id>"
        if let Some(text) = frame.reply_text() {
            if let Some(id) = text.split("Job-UUID:").nth(1) {
                return Ok(id.trim().to_string());
            }
        }
        Err(EslError::Protocol("bgapi reply without job id".to_string()))
    }

    async fn send_subscribe(&self, kinds: &[EventKind]) -> Result<(), EslError> {
        let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        let frame = self
            .send_command(&format!("event plain {}", names.join(" ")))
            .await?;
        match frame.reply_text() {
            Some(text) if text.starts_with("+OK") => Ok(()),
            other => Err(EslError::Command(other.unwrap_or("no reply").to_string())),
        }
    }

    pub async fn subscribe_events(&self, kinds: &[EventKind]) -> Result<(), EslError> {
        let missing: Vec<EventKind> = {
            let subs = self.shared.subscriptions.lock().unwrap();
            kinds.iter().filter(|k| !subs.contains(k)).cloned().collect()
        };
        if missing.is_empty() {
            return Ok(());
        }
        self.send_subscribe(&missing).await?;
        let mut subs = self.shared.subscriptions.lock().unwrap();
        subs.extend(missing);
        Ok(())
    }

    pub async fn unsubscribe_events(&self, kinds: &[EventKind]) -> Result<(), EslError> {
        let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        self.send_command(&format!("nixevent {}", names.join(" ")))
            .await?;
        let mut subs = self.shared.subscriptions.lock().unwrap();
        for kind in kinds {
            subs.remove(kind);
        }
        Ok(())
    }

    /// Register a persistent event handler. Returns a handle for `off_event`.
    pub fn on_event(
        &self,
        kinds: Vec<EventKind>,
        leg: Option<String>,
        callback: EventCallback,
    ) -> u64 {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.handlers.lock().unwrap().push(Handler {
            id,
            kinds,
            leg,
            callback,
        });
        id
    }

    pub fn off_event(&self, handler_id: u64) {
        self.shared
            .handlers
            .lock()
            .unwrap()
            .retain(|h| h.id != handler_id);
    }

    /// Wait for the first event matching (kinds, leg). `None` on timeout.
    pub async fn wait_for_event(
        &self,
        kinds: &[EventKind],
        leg: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<ProtocolEvent>, EslError> {
        if !self.connected() {
            return Err(EslError::NotConnected);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.waiters.lock().unwrap().push(Waiter {
            id,
            kinds: kinds.to_vec(),
            leg: leg.map(|s| s.to_string()),
            tx,
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => Ok(Some(event)),
            // Sender dropped: the connection went down under us
            Ok(Err(_)) => Err(EslError::Disconnected),
            Err(_) => {
                self.shared.waiters.lock().unwrap().retain(|w| w.id != id);
                Ok(None)
            }
        }
    }

    /// Wait for a background job result. `None` on timeout.
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<String>, EslError> {
        let rx = {
            let mut jobs = self.shared.jobs.lock().unwrap();
            match jobs.remove(job_id) {
                Some(JobSlot::Done(result)) => return Ok(Some(result)),
                Some(JobSlot::Waiting(_)) | None => {
                    let (tx, rx) = oneshot::channel();
                    jobs.insert(job_id.to_string(), JobSlot::Waiting(tx));
                    rx
                }
            }
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(Some(result)),
            Ok(Err(_)) => Err(EslError::Disconnected),
            Err(_) => {
                self.shared.jobs.lock().unwrap().remove(job_id);
                Ok(None)
            }
        }
    }

    /// Originate a new leg with a pre-assigned id so channel events can be
    /// watched before the job completes. A failed job is re-delivered as a
    /// synthetic hangup on the leg, carrying the extracted cause.
    pub async fn originate_leg(&self, spec: OriginateSpec) -> Result<OriginateHandle, EslError> {
        let leg_id = Uuid::new_v4().to_string();
        let timeout_secs = spec.timeout.as_secs().max(1);

        let mut variables: Vec<(String, String)> = vec![
            ("origination_uuid".to_string(), leg_id.clone()),
            ("originate_timeout".to_string(), timeout_secs.to_string()),
            ("call_timeout".to_string(), timeout_secs.to_string()),
        ];
        variables.extend(spec.variables.iter().cloned());

        let var_string = variables
            .iter()
            .map(|(k, v)| format!("{}={}", k, sanitize_variable(k, v)))
            .collect::<Vec<_>>()
            .join(",");

        // [] scopes the variables to this leg; no space before the dial string
        let command = format!("originate [{}]{} {}", var_string, spec.dial_string, spec.app);
        debug!(command = %command, "originating leg");

        let job_id = self.execute_bgapi(&command).await?;
        self.shared
            .originate_legs
            .lock()
            .unwrap()
            .insert(job_id.clone(), leg_id.clone());

        Ok(OriginateHandle { leg_id, job_id })
    }
}

/// Caller-id values must not carry spaces or separators into the command.
fn sanitize_variable(key: &str, value: &str) -> String {
    if matches!(
        key,
        "origination_caller_id_name"
            | "effective_caller_id_name"
            | "caller_id_name"
            | "origination_callee_id_name"
    ) {
        value.replace(' ', "_").replace(['\'', ','], "")
    } else {
        value.to_string()
    }
}

async fn reader_loop(shared: Arc<Shared>, mut reader: BufReader<OwnedReadHalf>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => {
                if frame.is_disconnect_notice() {
                    info!("event socket sent disconnect notice");
                    break;
                }
                if frame.is_event() {
                    if let Some(event) = parse_event(&frame) {
                        handle_event(&shared, event);
                    }
                } else if frame.is_reply() {
                    let sender = {
                        let mut io = shared.io.lock().await;
                        io.pending.pop_front()
                    };
                    match sender {
                        Some(tx) => {
                            let _ = tx.send(frame);
                        }
                        None => warn!("reply frame with no pending command"),
                    }
                } else {
                    debug!(content_type = ?frame.content_type(), "ignoring frame");
                }
            }
            Err(e) => {
                if shared.connected.load(Ordering::SeqCst) {
                    warn!(error = %e, "event socket read failed");
                }
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    teardown(&shared).await;
}

fn handle_event(shared: &Arc<Shared>, event: ProtocolEvent) {
    if event.kind == EventKind::BackgroundJob {
        if let Some(job_id) = event.job_id().map(|s| s.to_string()) {
            let result = event.body.clone().unwrap_or_default();

            // A failed origination never produced channel events for its
            // pre-assigned leg, so deliver the outcome as a hangup.
            let leg = shared.originate_legs.lock().unwrap().remove(&job_id);
            if let Some(leg) = leg {
                if result.trim_start().starts_with("-ERR") {
                    let cause = extract_error_cause(&result)
                        .unwrap_or(HangupCause::Other("UNKNOWN".to_string()));
                    let synthetic = ProtocolEvent::new(EventKind::ChannelHangup, Some(leg))
                        .with_header("Hangup-Cause", cause.as_str().to_string())
                        .with_header("Synthetic", "true");
                    dispatch(shared, &synthetic);
                }
            }

            let mut jobs = shared.jobs.lock().unwrap();
            match jobs.remove(&job_id) {
                Some(JobSlot::Waiting(tx)) => {
                    let _ = tx.send(result);
                }
                _ => {
                    jobs.insert(job_id, JobSlot::Done(result));
                }
            }
        }
    }

    dispatch(shared, &event);
}

fn dispatch(shared: &Arc<Shared>, event: &ProtocolEvent) {
    // One-shot waiters: each matching waiter resolves exactly once
    let mut matched = Vec::new();
    {
        let mut waiters = shared.waiters.lock().unwrap();
        let mut i = 0;
        while i < waiters.len() {
            if event.matches(&waiters[i].kinds, waiters[i].leg.as_deref()) {
                matched.push(waiters.swap_remove(i));
            } else {
                i += 1;
            }
        }
    }
    for waiter in matched {
        let _ = waiter.tx.send(event.clone());
    }

    let handlers = shared.handlers.lock().unwrap();
    for handler in handlers.iter() {
        if event.matches(&handler.kinds, handler.leg.as_deref()) {
            (handler.callback)(event);
        }
    }
}

/// Fail every pending wait instead of leaving it to hang.
async fn teardown(shared: &Arc<Shared>) {
    {
        let mut io = shared.io.lock().await;
        io.writer = None;
        // Dropping the senders resolves each execute() with Disconnected
        io.pending.clear();
    }
    shared.waiters.lock().unwrap().clear();
    shared.jobs.lock().unwrap().clear();
    shared.originate_legs.lock().unwrap().clear();
}

#[async_trait]
impl CallControl for EslConnection {
    fn is_connected(&self) -> bool {
        self.connected()
    }

    async fn execute(&self, command: &str) -> CoreResult<String> {
        Ok(self.execute_api(command).await?)
    }

    async fn execute_background(&self, command: &str) -> CoreResult<String> {
        Ok(self.execute_bgapi(command).await?)
    }

    async fn subscribe(&self, kinds: &[EventKind]) -> CoreResult<()> {
        Ok(self.subscribe_events(kinds).await?)
    }

    async fn unsubscribe(&self, kinds: &[EventKind]) -> CoreResult<()> {
        Ok(self.unsubscribe_events(kinds).await?)
    }

    async fn wait_for<'a>(
        &self,
        kinds: &[EventKind],
        leg: Option<&'a str>,
        timeout: Duration,
    ) -> CoreResult<Option<ProtocolEvent>> {
        Ok(self.wait_for_event(kinds, leg, timeout).await?)
    }

    async fn wait_job(&self, job_id: &str, timeout: Duration) -> CoreResult<Option<String>> {
        Ok(self.wait_for_job(job_id, timeout).await?)
    }

    async fn originate(&self, spec: OriginateSpec) -> CoreResult<OriginateHandle> {
        Ok(self.originate_leg(spec).await?)
    }

    async fn broadcast_audio(
        &self,
        leg: &str,
        resource: &str,
        channel: AudioChannel,
    ) -> CoreResult<()> {
        let result = self
            .execute_api(&format!("uuid_broadcast {} {} {}", leg, resource, channel.as_str()))
            .await?;
        ok_or_command(result)
    }

    async fn stop_audio(&self, leg: &str) -> CoreResult<()> {
        let result = self.execute_api(&format!("uuid_break {} all", leg)).await?;
        ok_or_command(result)
    }

    async fn bridge(&self, leg_a: &str, leg_b: &str) -> CoreResult<()> {
        let result = self
            .execute_api(&format!("uuid_bridge {} {}", leg_a, leg_b))
            .await?;
        ok_or_command(result)
    }

    async fn hangup(&self, leg: &str, cause: HangupCause) -> CoreResult<()> {
        let result = self
            .execute_api(&format!("uuid_kill {} {}", leg, cause.as_str()))
            .await?;
        ok_or_command(result)
    }

    async fn leg_exists(&self, leg: &str) -> CoreResult<bool> {
        let result = self.execute_api(&format!("uuid_exists {}", leg)).await?;
        Ok(result.trim().eq_ignore_ascii_case("true"))
    }

    async fn set_variable(&self, leg: &str, name: &str, value: &str) -> CoreResult<()> {
        let result = self
            .execute_api(&format!("uuid_setvar {} {} {}", leg, name, value))
            .await?;
        ok_or_command(result)
    }

    async fn get_variable(&self, leg: &str, name: &str) -> CoreResult<Option<String>> {
        let result = self
            .execute_api(&format!("uuid_getvar {} {}", leg, name))
            .await?;
        let trimmed = result.trim();
        if trimmed.is_empty() || trimmed == "_undef_" || trimmed.starts_with("-ERR") {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }

    async fn is_registered(&self, extension: &str, context: &str) -> CoreResult<bool> {
        let result = self
            .execute_api(&format!(
                "sofia status profile internal reg {}",
                registration_query(extension, context)
            ))
            .await?;
        Ok(result.to_uppercase().contains("REGISTERED"))
    }

    async fn active_channels(&self) -> CoreResult<String> {
        Ok(self.execute_api("show channels").await?)
    }
}

/// Registration lookups are scoped to the tenant domain when one is known;
/// the same extension number can exist in several tenants.
fn registration_query(extension: &str, context: &str) -> String {
    if context.is_empty() {
        extension.to_string()
    } else {
        format!("{}@{}", extension, context)
    }
}

fn ok_or_command(result: String) -> CoreResult<()> {
    if result.contains("+OK") {
        Ok(())
    } else {
        Err(EslError::Command(result.trim().to_string()).into())
    }
}
