//! The DAP Client: the single path by which any part of this crate emits a
//! Debug Adapter Protocol request. See the module invariants enforced
//! here: exactly one in-flight write at a time, every request registered
//! in the pending table before its bytes hit the wire, and event handlers
//! that never themselves issue requests.

use super::transport::DapTransport;
use super::transport_trait::DapTransportTrait;
use super::types::*;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, trace, warn};

type PendingSender = oneshot::Sender<Result<Response>>;
type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;
type InterestSlot = Arc<Mutex<Option<oneshot::Sender<Event>>>>;

/// Governs `send_request`'s retry behavior. Only transport-class failures
/// are retried; a DAP-level `success=false` is a protocol-level failure
/// and is never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + self.jitter * (fastrand_like(attempt) - 0.5) * 2.0;
        Duration::from_secs_f64((base * jitter_factor).max(0.0))
    }
}

/// Cheap deterministic pseudo-jitter so retry backoff isn't perfectly
/// uniform without pulling in a RNG crate for one call site.
fn fastrand_like(seed: u32) -> f64 {
    let x = seed.wrapping_mul(2654435761).wrapping_add(1);
    (x % 1000) as f64 / 1000.0
}

/// Outcome a reverse-request handler returns; the client turns it into a
/// DAP response frame sent back to the adapter.
pub enum ReverseRequestOutcome {
    Accept(Option<Value>),
    Reject(String),
}

type ReverseRequestHandler = Arc<dyn Fn(Option<Value>) -> ReverseRequestOutcome + Send + Sync>;

/// Minimal execution-relevant state the client itself tracks, independent
/// of the richer state machine a Session layers on top.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub ready_for_configuration: bool,
    pub running: bool,
    pub paused_thread_id: Option<i64>,
    pub terminated: bool,
    pub exit_code: Option<i64>,
}

pub struct DapClient {
    transport: Arc<Mutex<Box<dyn DapTransportTrait>>>,
    seq_counter: Arc<AtomicI64>,
    subscription_counter: Arc<AtomicU64>,
    pending_requests: Arc<RwLock<HashMap<i64, PendingSender>>>,
    event_interests: Arc<RwLock<HashMap<String, Vec<InterestSlot>>>>,
    event_callbacks: Arc<RwLock<HashMap<String, Vec<(u64, EventCallback)>>>>,
    reverse_handlers: Arc<RwLock<HashMap<String, ReverseRequestHandler>>>,
    state: Arc<RwLock<ClientState>>,
    write_tx: mpsc::UnboundedSender<Message>,
    disconnected: Arc<std::sync::atomic::AtomicBool>,
}

/// A request sent with `send_request_no_wait`: the pending slot is
/// registered but not yet awaited, and must be reaped by the caller.
pub struct PendingHandle {
    seq: i64,
    rx: oneshot::Receiver<Result<Response>>,
}

impl PendingHandle {
    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub async fn reap(self, timeout: Duration) -> Result<Response> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::RequestCancelled),
            Err(_) => Err(Error::Timeout),
        }
    }
}

impl DapClient {
    /// Connect to an adapter already listening on `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let transport = DapTransport::connect(host, port).await?;
        Self::new_with_transport(Box::new(transport)).await
    }

    /// Build a client over an arbitrary transport (production TCP
    /// transport, or a mock in tests).
    pub async fn new_with_transport(transport: Box<dyn DapTransportTrait>) -> Result<Self> {
        let transport = Arc::new(Mutex::new(transport));
        let pending_requests: Arc<RwLock<HashMap<i64, PendingSender>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let event_interests: Arc<RwLock<HashMap<String, Vec<InterestSlot>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let event_callbacks: Arc<RwLock<HashMap<String, Vec<(u64, EventCallback)>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let reverse_handlers: Arc<RwLock<HashMap<String, ReverseRequestHandler>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let state = Arc::new(RwLock::new(ClientState::default()));
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let disconnected = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let client = Self {
            transport: transport.clone(),
            seq_counter: Arc::new(AtomicI64::new(1)),
            subscription_counter: Arc::new(AtomicU64::new(1)),
            pending_requests: pending_requests.clone(),
            event_interests: event_interests.clone(),
            event_callbacks: event_callbacks.clone(),
            reverse_handlers: reverse_handlers.clone(),
            state: state.clone(),
            write_tx: write_tx.clone(),
            disconnected: disconnected.clone(),
        };

        tokio::spawn(Self::message_reader(
            transport.clone(),
            pending_requests,
            event_interests,
            event_callbacks,
            reverse_handlers,
            state,
            write_tx,
            disconnected,
        ));
        tokio::spawn(Self::message_writer(transport, write_rx));

        Ok(client)
    }

    fn next_seq(&self) -> i64 {
        self.seq_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Current snapshot of the client-tracked execution state.
    pub async fn state(&self) -> ClientState {
        self.state.read().await.clone()
    }

    async fn message_reader(
        transport: Arc<Mutex<Box<dyn DapTransportTrait>>>,
        pending_requests: Arc<RwLock<HashMap<i64, PendingSender>>>,
        event_interests: Arc<RwLock<HashMap<String, Vec<InterestSlot>>>>,
        event_callbacks: Arc<RwLock<HashMap<String, Vec<(u64, EventCallback)>>>>,
        reverse_handlers: Arc<RwLock<HashMap<String, ReverseRequestHandler>>>,
        state: Arc<RwLock<ClientState>>,
        write_tx: mpsc::UnboundedSender<Message>,
        disconnected: Arc<std::sync::atomic::AtomicBool>,
    ) {
        loop {
            let msg_result = {
                let mut transport = transport.lock().await;
                let read_future = transport.receive_message();
                tokio::select! {
                    result = read_future => Some(result),
                    _ = tokio::time::sleep(Duration::from_millis(50)) => None,
                }
            };

            let msg = match msg_result {
                None => {
                    tokio::time::sleep(Duration::from_micros(100)).await;
                    continue;
                }
                Some(Ok(msg)) => msg,
                Some(Err(Error::TransportClosed)) => {
                    debug!("transport closed, ending receiver loop");
                    Self::fail_all_pending(&pending_requests, Error::TransportClosed).await;
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "failed to read DAP message");
                    break;
                }
            };

            match msg {
                Message::Response(resp) => {
                    trace!(request_seq = resp.request_seq, "received response");
                    let mut pending = pending_requests.write().await;
                    if let Some(sender) = pending.remove(&resp.request_seq) {
                        let _ = sender.send(Ok(resp));
                    } else {
                        warn!(seq = resp.request_seq, "response for unknown or reaped request");
                    }
                }
                Message::Event(event) => {
                    Self::dispatch_event(&event_interests, &event_callbacks, &state, &event).await;
                }
                Message::Request(req) => {
                    Self::dispatch_reverse_request(&reverse_handlers, &write_tx, req).await;
                }
            }

            if disconnected.load(Ordering::Acquire) {
                Self::fail_all_pending(&pending_requests, Error::SessionTerminated).await;
                break;
            }
        }
    }

    async fn dispatch_event(
        event_interests: &Arc<RwLock<HashMap<String, Vec<InterestSlot>>>>,
        event_callbacks: &Arc<RwLock<HashMap<String, Vec<(u64, EventCallback)>>>>,
        state: &Arc<RwLock<ClientState>>,
        event: &Event,
    ) {
        // Fixed internal state updates from the event dispatch table.
        {
            let mut state = state.write().await;
            match event.event.as_str() {
                "initialized" => state.ready_for_configuration = true,
                "stopped" => {
                    state.running = false;
                    state.paused_thread_id = event
                        .body
                        .as_ref()
                        .and_then(|b| b.get("threadId"))
                        .and_then(|v| v.as_i64());
                }
                "continued" => {
                    state.running = true;
                    state.paused_thread_id = None;
                }
                "terminated" => state.terminated = true,
                "exited" => {
                    state.exit_code = event
                        .body
                        .as_ref()
                        .and_then(|b| b.get("exitCode"))
                        .and_then(|v| v.as_i64());
                }
                _ => {}
            }
        }

        // One-shot interests (execution-aware pre-registration, wait_for_event).
        let slots = {
            let mut interests = event_interests.write().await;
            interests.remove(&event.event).unwrap_or_default()
        };
        for slot in slots {
            if let Some(sender) = slot.lock().await.take() {
                let _ = sender.send(event.clone());
            }
        }

        // Persistent external subscribers may legally issue new requests,
        // so they're scheduled on their own tasks rather than run inline
        // on the receiver.
        let callbacks = {
            let callbacks = event_callbacks.read().await;
            callbacks.get(&event.event).cloned().unwrap_or_default()
        };
        for (_, callback) in callbacks {
            let event = event.clone();
            tokio::spawn(async move {
                callback(event);
            });
        }
    }

    async fn dispatch_reverse_request(
        reverse_handlers: &Arc<RwLock<HashMap<String, ReverseRequestHandler>>>,
        write_tx: &mpsc::UnboundedSender<Message>,
        req: Request,
    ) {
        let handler = reverse_handlers.read().await.get(&req.command).cloned();

        let outcome = match handler {
            Some(handler) => handler(req.arguments.clone()),
            None => {
                warn!(command = %req.command, "no handler for reverse request, accepting with empty body");
                ReverseRequestOutcome::Accept(None)
            }
        };

        let response = match outcome {
            ReverseRequestOutcome::Accept(body) => Response {
                seq: 0,
                request_seq: req.seq,
                command: req.command,
                success: true,
                message: None,
                body,
            },
            ReverseRequestOutcome::Reject(reason) => Response {
                seq: 0,
                request_seq: req.seq,
                command: req.command,
                success: false,
                message: Some(reason),
                body: None,
            },
        };

        let _ = write_tx.send(Message::Response(response));
    }

    async fn fail_all_pending(pending_requests: &Arc<RwLock<HashMap<i64, PendingSender>>>, err: Error) {
        let mut pending = pending_requests.write().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(match &err {
                Error::TransportClosed => Error::TransportClosed,
                _ => Error::SessionTerminated,
            }));
        }
    }

    async fn message_writer(
        transport: Arc<Mutex<Box<dyn DapTransportTrait>>>,
        mut write_rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(message) = write_rx.recv().await {
            let mut transport = transport.lock().await;
            if let Err(e) = transport.send_message(&message).await {
                warn!(error = %e, "failed to write DAP message, stopping writer");
                break;
            }
        }
    }

    /// Register a one-shot interest in the next occurrence of any of
    /// `event_names`. Whichever fires first resolves the receiver; the
    /// others are left dangling and garbage-collected on their own
    /// dispatch pass.
    pub async fn register_interest(&self, event_names: &[&str]) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        let slot: InterestSlot = Arc::new(Mutex::new(Some(tx)));
        let mut interests = self.event_interests.write().await;
        for name in event_names {
            interests
                .entry((*name).to_string())
                .or_default()
                .push(slot.clone());
        }
        rx
    }

    /// One-shot await of the next matching event.
    pub async fn wait_for_event(&self, event_name: &str, timeout: Duration) -> Result<Event> {
        let rx = self.register_interest(&[event_name]).await;
        tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::RequestCancelled)
    }

    /// Register a persistent listener. Handlers run on their own task
    /// after each dispatch pass and may safely call `send_request`.
    pub async fn subscribe_event<F>(&self, event_name: &str, handler: F) -> u64
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let id = self.subscription_counter.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = self.event_callbacks.write().await;
        callbacks
            .entry(event_name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub async fn unsubscribe_event(&self, event_name: &str, subscription_id: u64) {
        let mut callbacks = self.event_callbacks.write().await;
        if let Some(handlers) = callbacks.get_mut(event_name) {
            handlers.retain(|(id, _)| *id != subscription_id);
        }
    }

    /// Register a handler for reverse requests named `command` (e.g.
    /// `startDebugging`, `runInTerminal`). The handler must not issue new
    /// DAP requests; it only computes the response body.
    pub async fn on_reverse_request<F>(&self, command: &str, handler: F)
    where
        F: Fn(Option<Value>) -> ReverseRequestOutcome + Send + Sync + 'static,
    {
        let mut handlers = self.reverse_handlers.write().await;
        handlers.insert(command.to_string(), Arc::new(handler));
    }

    /// Fire-and-forget send. The pending slot is registered before the
    /// bytes go out but must be reaped by the caller via
    /// `PendingHandle::reap`.
    pub async fn send_request_no_wait(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<PendingHandle> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(Error::SessionTerminated);
        }

        let seq = self.next_seq();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_requests.write().await;
            pending.insert(seq, tx);
        }

        let request = Request {
            seq,
            command: command.to_string(),
            arguments,
        };
        self.write_tx
            .send(Message::Request(request))
            .map_err(|_| Error::TransportClosed)?;

        Ok(PendingHandle { seq, rx })
    }

    /// The only path by which this crate emits a DAP request: allocate a
    /// sequence number, register the pending slot, write the frame, await
    /// the response (retrying transport-class failures per `policy`).
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let result = self
                .send_request_once(command, arguments.clone(), timeout)
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_request_once(
        &self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Response> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(Error::SessionTerminated);
        }

        let handle = self.send_request_no_wait(command, arguments).await?;
        let response = handle.reap(timeout).await?;

        if !response.success {
            return Err(Error::AdapterError {
                command: command.to_string(),
                message: response.message.clone().unwrap_or_default(),
            });
        }

        Ok(response)
    }

    pub async fn initialize(&self, adapter_id: &str, timeout: Duration) -> Result<Capabilities> {
        let args = InitializeRequestArguments {
            client_id: Some("aidb".to_string()),
            client_name: Some("aidb".to_string()),
            adapter_id: adapter_id.to_string(),
            locale: Some("en-US".to_string()),
            lines_start_at1: Some(true),
            columns_start_at1: Some(true),
            path_format: Some("path".to_string()),
            supports_variable_type: Some(true),
            supports_run_in_terminal_request: Some(true),
            supports_start_debugging_request: Some(true),
        };

        let response = self
            .send_request(
                "initialize",
                Some(serde_json::to_value(args)?),
                timeout,
                &RetryPolicy::none(),
            )
            .await?;

        let body = response
            .body
            .ok_or_else(|| Error::ProtocolError("initialize response missing capabilities".into()))?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn configuration_done(&self, timeout: Duration) -> Result<()> {
        self.send_request("configurationDone", None, timeout, &RetryPolicy::none())
            .await?;
        Ok(())
    }

    pub async fn launch(&self, args: Value, timeout: Duration) -> Result<()> {
        self.send_request("launch", Some(args), timeout, &RetryPolicy::none())
            .await?;
        Ok(())
    }

    pub async fn attach(&self, args: Value, timeout: Duration) -> Result<()> {
        self.send_request("attach", Some(args), timeout, &RetryPolicy::none())
            .await?;
        Ok(())
    }

    pub async fn set_breakpoints(
        &self,
        source: Source,
        breakpoints: Vec<SourceBreakpoint>,
        timeout: Duration,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source,
            breakpoints: Some(breakpoints),
            source_modified: Some(false),
        };
        let response = self
            .send_request(
                "setBreakpoints",
                Some(serde_json::to_value(args)?),
                timeout,
                &RetryPolicy::none(),
            )
            .await?;

        #[derive(serde::Deserialize)]
        struct SetBreakpointsResponseBody {
            breakpoints: Vec<Breakpoint>,
        }
        let body: SetBreakpointsResponseBody = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::ProtocolError("setBreakpoints response missing body".into()))?,
        )?;
        Ok(body.breakpoints)
    }

    pub async fn set_exception_breakpoints(
        &self,
        filters: Vec<String>,
        timeout: Duration,
    ) -> Result<()> {
        let args = SetExceptionBreakpointsArguments {
            filters,
            filter_options: None,
        };
        self.send_request(
            "setExceptionBreakpoints",
            Some(serde_json::to_value(args)?),
            timeout,
            &RetryPolicy::none(),
        )
        .await?;
        Ok(())
    }

    /// Continue execution. Pre-registers interest in Stopped/Terminated
    /// before sending, closing the race where the event beats the
    /// response.
    pub async fn continue_execution(
        &self,
        thread_id: i64,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Event>> {
        let interest = self.register_interest(&["stopped", "terminated"]).await;
        let args = ContinueArguments { thread_id };
        self.send_request(
            "continue",
            Some(serde_json::to_value(args)?),
            timeout,
            &RetryPolicy::none(),
        )
        .await?;
        Ok(interest)
    }

    pub async fn next(&self, thread_id: i64, timeout: Duration) -> Result<oneshot::Receiver<Event>> {
        let interest = self.register_interest(&["stopped", "terminated"]).await;
        let args = NextArguments { thread_id };
        self.send_request("next", Some(serde_json::to_value(args)?), timeout, &RetryPolicy::none())
            .await?;
        Ok(interest)
    }

    pub async fn step_in(&self, thread_id: i64, timeout: Duration) -> Result<oneshot::Receiver<Event>> {
        let interest = self.register_interest(&["stopped", "terminated"]).await;
        let args = StepInArguments { thread_id };
        self.send_request("stepIn", Some(serde_json::to_value(args)?), timeout, &RetryPolicy::none())
            .await?;
        Ok(interest)
    }

    pub async fn step_out(&self, thread_id: i64, timeout: Duration) -> Result<oneshot::Receiver<Event>> {
        let interest = self.register_interest(&["stopped", "terminated"]).await;
        let args = StepOutArguments { thread_id };
        self.send_request("stepOut", Some(serde_json::to_value(args)?), timeout, &RetryPolicy::none())
            .await?;
        Ok(interest)
    }

    pub async fn pause(&self, thread_id: i64, timeout: Duration) -> Result<()> {
        let args = PauseArguments { thread_id };
        self.send_request("pause", Some(serde_json::to_value(args)?), timeout, &RetryPolicy::none())
            .await?;
        Ok(())
    }

    pub async fn threads(&self, timeout: Duration) -> Result<Vec<Thread>> {
        let response = self
            .send_request("threads", None, timeout, &RetryPolicy::none())
            .await?;

        #[derive(serde::Deserialize)]
        struct ThreadsResponseBody {
            threads: Vec<Thread>,
        }
        let body: ThreadsResponseBody = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::ProtocolError("threads response missing body".into()))?,
        )?;
        Ok(body.threads)
    }

    pub async fn stack_trace(&self, thread_id: i64, timeout: Duration) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: None,
            levels: None,
        };
        let response = self
            .send_request(
                "stackTrace",
                Some(serde_json::to_value(args)?),
                timeout,
                &RetryPolicy::none(),
            )
            .await?;

        #[derive(serde::Deserialize)]
        struct StackTraceResponseBody {
            #[serde(rename = "stackFrames")]
            stack_frames: Vec<StackFrame>,
        }
        let body: StackTraceResponseBody = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::ProtocolError("stackTrace response missing body".into()))?,
        )?;
        Ok(body.stack_frames)
    }

    pub async fn scopes(&self, frame_id: i64, timeout: Duration) -> Result<Vec<Scope>> {
        let args = ScopesArguments { frame_id };
        let response = self
            .send_request("scopes", Some(serde_json::to_value(args)?), timeout, &RetryPolicy::none())
            .await?;

        #[derive(serde::Deserialize)]
        struct ScopesResponseBody {
            scopes: Vec<Scope>,
        }
        let body: ScopesResponseBody = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::ProtocolError("scopes response missing body".into()))?,
        )?;
        Ok(body.scopes)
    }

    pub async fn variables(
        &self,
        variables_reference: i64,
        start: Option<i64>,
        count: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Variable>> {
        let args = VariablesArguments {
            variables_reference,
            filter: None,
            start,
            count,
        };
        let response = self
            .send_request(
                "variables",
                Some(serde_json::to_value(args)?),
                timeout,
                &RetryPolicy::none(),
            )
            .await?;

        #[derive(serde::Deserialize)]
        struct VariablesResponseBody {
            variables: Vec<Variable>,
        }
        let body: VariablesResponseBody = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::ProtocolError("variables response missing body".into()))?,
        )?;
        Ok(body.variables)
    }

    pub async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<SetVariableResponseBody> {
        let args = SetVariableArguments {
            variables_reference,
            name: name.to_string(),
            value: value.to_string(),
        };
        let response = self
            .send_request(
                "setVariable",
                Some(serde_json::to_value(args)?),
                timeout,
                &RetryPolicy::none(),
            )
            .await?;
        Ok(serde_json::from_value(response.body.ok_or_else(|| {
            Error::ProtocolError("setVariable response missing body".into())
        })?)?)
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
        timeout: Duration,
    ) -> Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some(context.to_string()),
        };
        let response = self
            .send_request(
                "evaluate",
                Some(serde_json::to_value(args)?),
                timeout,
                &RetryPolicy::none(),
            )
            .await?;
        Ok(serde_json::from_value(response.body.ok_or_else(|| {
            Error::ProtocolError("evaluate response missing body".into())
        })?)?)
    }

    pub async fn restart(&self, timeout: Duration) -> Result<()> {
        self.send_request("restart", None, timeout, &RetryPolicy::none())
            .await?;
        Ok(())
    }

    /// Always sends Disconnect before closing the transport, unless the
    /// transport is already dead. Idempotent.
    pub async fn disconnect(&self, timeout: Duration) -> Result<()> {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let args = DisconnectArguments {
            restart: Some(false),
            terminate_debuggee: Some(true),
        };
        let result = self
            .send_request(
                "disconnect",
                Some(serde_json::to_value(args)?),
                timeout,
                &RetryPolicy::none(),
            )
            .await;
        if let Err(e) = result {
            warn!(error = %e, "disconnect request failed, closing transport anyway");
        }

        Self::fail_all_pending(&self.pending_requests, Error::SessionTerminated).await;

        let mut transport = self.transport.lock().await;
        transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub TestTransport {}

        #[async_trait::async_trait]
        impl DapTransportTrait for TestTransport {
            async fn receive_message(&mut self) -> Result<Message>;
            async fn send_message(&mut self, msg: &Message) -> Result<()>;
            async fn close(&mut self) -> Result<()>;
        }
    }

    fn create_mock_with_response(response: Response) -> MockTestTransport {
        let mut mock = MockTestTransport::new();
        mock.expect_send_message().times(1).returning(|_| Ok(()));
        mock.expect_receive_message()
            .times(1)
            .return_once(move || Ok(Message::Response(response)));
        mock.expect_receive_message()
            .returning(|| Err(Error::TransportClosed));
        mock
    }

    #[tokio::test]
    async fn initialize_parses_capabilities() {
        let mut mock_transport = MockTestTransport::new();
        mock_transport.expect_send_message().times(1).returning(|_| Ok(()));
        mock_transport.expect_receive_message().times(1).returning(|| {
            Ok(Message::Response(Response {
                seq: 1,
                request_seq: 1,
                command: "initialize".to_string(),
                success: true,
                message: None,
                body: Some(json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsFunctionBreakpoints": false,
                    "supportsConditionalBreakpoints": true,
                })),
            }))
        });
        mock_transport
            .expect_receive_message()
            .returning(|| Err(Error::TransportClosed));

        let client = DapClient::new_with_transport(Box::new(mock_transport))
            .await
            .unwrap();

        let caps = client
            .initialize("test-adapter", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(caps.supports_configuration_done_request.unwrap_or(false));
        assert!(!caps.supports_function_breakpoints.unwrap_or(true));
    }

    #[tokio::test]
    async fn launch_failure_surfaces_adapter_error() {
        let mock_transport = create_mock_with_response(Response {
            seq: 1,
            request_seq: 1,
            command: "launch".to_string(),
            success: false,
            message: Some("Failed to start program".to_string()),
            body: None,
        });

        let client = DapClient::new_with_transport(Box::new(mock_transport))
            .await
            .unwrap();

        let result = client
            .launch(json!({"program": "test.py"}), Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(Error::AdapterError { .. })));
    }

    #[tokio::test]
    async fn set_breakpoints_returns_verified_list() {
        let mock_transport = create_mock_with_response(Response {
            seq: 1,
            request_seq: 1,
            command: "setBreakpoints".to_string(),
            success: true,
            message: None,
            body: Some(json!({"breakpoints": [{"id": 1, "verified": true, "line": 10}]})),
        });

        let client = DapClient::new_with_transport(Box::new(mock_transport))
            .await
            .unwrap();

        let source = Source {
            name: Some("test.py".to_string()),
            path: Some("/path/to/test.py".to_string()),
            source_reference: None,
        };
        let breakpoints = vec![SourceBreakpoint {
            line: 10,
            column: None,
            condition: None,
            hit_condition: None,
            log_message: None,
        }];

        let result = client
            .set_breakpoints(source, breakpoints, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert!(result[0].verified);
    }

    #[tokio::test]
    async fn evaluate_returns_result_string() {
        let mock_transport = create_mock_with_response(Response {
            seq: 1,
            request_seq: 1,
            command: "evaluate".to_string(),
            success: true,
            message: None,
            body: Some(json!({"result": "42", "variablesReference": 0})),
        });

        let client = DapClient::new_with_transport(Box::new(mock_transport))
            .await
            .unwrap();

        let result = client
            .evaluate("x + y", Some(1), "repl", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(result.result, "42");
    }

    #[tokio::test]
    async fn send_request_times_out_when_no_response_arrives() {
        let mut mock_transport = MockTestTransport::new();
        mock_transport.expect_send_message().times(1).returning(|_| Ok(()));
        mock_transport
            .expect_receive_message()
            .returning(|| Err(Error::TransportClosed));

        let client = DapClient::new_with_transport(Box::new(mock_transport))
            .await
            .unwrap();

        let result = client
            .send_request("threads", None, Duration::from_millis(50), &RetryPolicy::none())
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_blocks_further_requests() {
        let mut mock_transport = MockTestTransport::new();
        mock_transport.expect_send_message().times(1).returning(|_| Ok(()));
        mock_transport.expect_receive_message().times(1).return_once(|| {
            Ok(Message::Response(Response {
                seq: 1,
                request_seq: 1,
                command: "disconnect".to_string(),
                success: true,
                message: None,
                body: None,
            }))
        });
        mock_transport
            .expect_receive_message()
            .returning(|| Err(Error::TransportClosed));
        mock_transport.expect_close().returning(|| Ok(()));

        let client = DapClient::new_with_transport(Box::new(mock_transport))
            .await
            .unwrap();

        client.disconnect(Duration::from_secs(1)).await.unwrap();
        client.disconnect(Duration::from_secs(1)).await.unwrap();

        let result = client
            .send_request("threads", None, Duration::from_millis(50), &RetryPolicy::none())
            .await;
        assert!(matches!(result, Err(Error::SessionTerminated)));
    }

    #[tokio::test]
    async fn stopped_event_updates_client_state_and_fulfills_interest() {
        let mut mock_transport = MockTestTransport::new();
        mock_transport.expect_receive_message().times(1).return_once(|| {
            Ok(Message::Event(Event {
                seq: 1,
                event: "stopped".to_string(),
                body: Some(json!({"reason": "breakpoint", "threadId": 7})),
            }))
        });
        mock_transport
            .expect_receive_message()
            .returning(|| Err(Error::TransportClosed));

        let client = DapClient::new_with_transport(Box::new(mock_transport))
            .await
            .unwrap();

        let interest = client.register_interest(&["stopped"]).await;
        let event = tokio::time::timeout(Duration::from_secs(1), interest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event, "stopped");

        let state = client.state().await;
        assert_eq!(state.paused_thread_id, Some(7));
    }
}
