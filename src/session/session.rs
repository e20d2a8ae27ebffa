//! The Session state machine: ties one [`AdapterInstance`] to one
//! [`DapClient`] (two, for JavaScript's parent/child model) and runs the
//! strict initialization protocol before handing out execution
//! operations.
//!
//! # Single-client languages (Python, Java)
//!
//! One [`DapClient`] drives the whole session; `active_client()` always
//! returns it.
//!
//! # Multi-session JavaScript
//!
//! vscode-js-debug's parent connection never runs user code — it exists
//! to receive a `startDebugging` reverse request carrying a
//! `__pendingTargetId` and hand off to a child connection dialed back to
//! the *same* adapter port (the adapter is the TCP server here, the same
//! as the parent connection established by [`AdapterInstance::spawn`]).
//! `active_client()` returns the child once it has attached, and falls
//! back to the parent only for the brief window before that happens.
//!
//! # Pause epochs
//!
//! Frame ids and variablesReferences only mean what they meant at the
//! pause that produced them. `stack`/`scopes`/`variables` stamp every id
//! they hand out with the issuing pause's epoch (see `encode_ref`), and
//! reject one stamped with any other epoch — a caller who holds onto a
//! frame id across a `continue` gets `InvalidFrameReference`/
//! `InvalidVariableReference` instead of a new pause's data.

use super::state::{Breakpoint, BreakpointMap, BreakpointSpec, SessionState};
use crate::adapters::{AdapterInstance, LaunchOptions, LaunchWaitStrategy, Target};
use crate::config::AidbConfig;
use crate::dap::client::{DapClient, ReverseRequestOutcome};
use crate::dap::transport::DapTransport;
use crate::dap::types::{
    Capabilities, EvaluateResponseBody, Scope, SetVariableResponseBody, Source, SourceBreakpoint,
    StackFrame, Thread, Variable,
};
use crate::{Error, Result};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Caller-expressed intent for when a breakpoint is being added, per the
/// initialization protocol's breakpoint timing rule: breakpoints declared
/// up front are folded into the handshake (step 5); breakpoints added
/// afterward are only safe while paused, or against a target the caller
/// asserts is long-running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointTiming {
    Initial,
    Live,
}

#[derive(Debug, Clone)]
pub enum ClearBreakpointsFilter {
    All,
    ByFile(String),
    ById(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGranularity {
    Into,
    Over,
    Out,
}

/// Stamp a raw DAP id with the epoch of the pause it was issued from, so
/// a caller holding it past the next resume gets a typed rejection
/// instead of whatever the adapter now associates with that raw id. `0`
/// is DAP's own "no children"/absent-reference sentinel and passes
/// through unstamped.
fn encode_ref(epoch: u64, raw: i64) -> i64 {
    if raw == 0 {
        return 0;
    }
    ((epoch as i64) << 32) | (raw & 0xFFFF_FFFF)
}

/// Inverse of [`encode_ref`]. `0` decodes to `(0, 0)` regardless of the
/// epoch it's checked against, by design.
fn decode_ref(encoded: i64) -> (u64, i64) {
    if encoded == 0 {
        return (0, 0);
    }
    ((encoded >> 32) as u64, encoded & 0xFFFF_FFFF)
}

struct SessionInit {
    language: String,
    target: Target,
    options: LaunchOptions,
    exception_filters: Vec<String>,
    request_timeout: Duration,
    max_frame_size: usize,
    long_running: bool,
}

pub struct Session {
    pub id: String,
    pub language: String,
    adapter: Mutex<AdapterInstance>,
    client: Arc<DapClient>,
    child_client: RwLock<Option<Arc<DapClient>>>,
    state: Arc<RwLock<SessionState>>,
    pause_epoch: Arc<AtomicU64>,
    breakpoints: Mutex<BreakpointMap>,
    capabilities: RwLock<Option<Capabilities>>,
    op_lock: Mutex<()>,
    request_timeout: Duration,
    max_frame_size: usize,
    long_running: bool,
    target: Target,
    options: LaunchOptions,
    exception_filters: Vec<String>,
}

impl Session {
    /// Run the full 8-step initialization protocol against a freshly
    /// spawned adapter and return a session in `Running`.
    pub async fn launch(
        language: &str,
        target: Target,
        options: LaunchOptions,
        initial_breakpoints: Vec<(String, Vec<BreakpointSpec>)>,
        exception_filters: Vec<String>,
        long_running: bool,
        config: &AidbConfig,
    ) -> Result<Arc<Self>> {
        if let Target::File { path, .. } = &target {
            crate::adapters::source_path::validate_source_path(path, None)?;
        }
        if let Some(cwd) = &options.cwd {
            crate::adapters::source_path::validate_directory_path(cwd)?;
        }

        let adapter_caps = crate::adapters::for_language(language)?;
        let mut adapter = AdapterInstance::new(adapter_caps);
        let stream = adapter.spawn(&target).await?;

        let init = SessionInit {
            language: language.to_string(),
            target,
            options,
            exception_filters,
            request_timeout: config.request_timeout,
            max_frame_size: config.max_frame_size,
            long_running,
        };

        Self::initialize_and_launch(adapter, stream, initial_breakpoints, init, false).await
    }

    /// Same protocol, but against a caller-provided `host:port` instead of
    /// a spawned process (DAP Attach rather than Launch).
    pub async fn attach(
        language: &str,
        host: &str,
        port: u16,
        options: LaunchOptions,
        initial_breakpoints: Vec<(String, Vec<BreakpointSpec>)>,
        exception_filters: Vec<String>,
        long_running: bool,
        config: &AidbConfig,
    ) -> Result<Arc<Self>> {
        let adapter_caps = crate::adapters::for_language(language)?;
        let mut adapter = AdapterInstance::new(adapter_caps);
        let stream = adapter.attach(host, port).await?;

        let init = SessionInit {
            language: language.to_string(),
            target: Target::Remote {
                host: host.to_string(),
                port,
            },
            options,
            exception_filters,
            request_timeout: config.request_timeout,
            max_frame_size: config.max_frame_size,
            long_running,
        };

        Self::initialize_and_launch(adapter, stream, initial_breakpoints, init, true).await
    }

    async fn initialize_and_launch(
        adapter: AdapterInstance,
        stream: tokio::net::TcpStream,
        initial_breakpoints: Vec<(String, Vec<BreakpointSpec>)>,
        init: SessionInit,
        is_attach: bool,
    ) -> Result<Arc<Self>> {
        let id = Uuid::new_v4().to_string();
        let timeout = init.request_timeout;
        let state = Arc::new(RwLock::new(SessionState::Connecting));

        let transport = DapTransport::with_max_frame_size(stream, init.max_frame_size);
        let client = Arc::new(DapClient::new_with_transport(Box::new(transport)).await?);

        // Step 3+4: Initialize, racing the Initialized event against the
        // response so a fast adapter can't fire it before we're listening.
        *state.write().await = SessionState::Initializing;
        let initialized_rx = client.register_interest(&["initialized"]).await;
        let capabilities = match client.initialize(adapter.adapter_id(), timeout).await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                adapter.log_init_error(&e);
                return Err(e);
            }
        };
        if let Err(e) = tokio::time::timeout(timeout, initialized_rx)
            .await
            .map_err(|_| Error::InitializationTimeout)
            .and_then(|inner| inner.map_err(|_| Error::InitializationTimeout))
        {
            adapter.log_init_error(&e);
            return Err(e);
        }

        // Step 5: breakpoints per file, then exception filters.
        *state.write().await = SessionState::Configuring;
        let mut breakpoints = BreakpointMap::new();
        for (path, specs) in initial_breakpoints {
            let resolved = Self::apply_breakpoints(&client, &path, specs, timeout).await?;
            breakpoints.replace_file(&path, resolved);
        }
        if !init.exception_filters.is_empty() {
            client
                .set_exception_breakpoints(init.exception_filters.clone(), timeout)
                .await?;
        }

        // Step 6: ConfigurationDone, unless unsupported.
        if capabilities.supports_configuration_done_request.unwrap_or(false) {
            client.configuration_done(timeout).await?;
        }

        let session = Arc::new(Self {
            id,
            language: init.language.clone(),
            adapter: Mutex::new(adapter),
            client: client.clone(),
            child_client: RwLock::new(None),
            state: state.clone(),
            pause_epoch: Arc::new(AtomicU64::new(0)),
            breakpoints: Mutex::new(breakpoints),
            capabilities: RwLock::new(Some(capabilities.clone())),
            op_lock: Mutex::new(()),
            request_timeout: timeout,
            max_frame_size: init.max_frame_size,
            long_running: init.long_running,
            target: init.target.clone(),
            options: init.options.clone(),
            exception_filters: init.exception_filters.clone(),
        });

        session.wire_execution_events(&client).await;

        // Step 7: Launch or Attach.
        let (wait_strategy, launch_config) = {
            let adapter = session.adapter.lock().await;
            (
                adapter.launch_wait_strategy(),
                adapter.launch_configuration(&init.target, &init.options),
            )
        };

        let stopped_or_terminated = client.register_interest(&["stopped", "terminated"]).await;
        if is_attach {
            client.attach(launch_config, Duration::from_secs(60)).await?;
        } else {
            client.launch(launch_config, Duration::from_secs(60)).await?;
        }

        if wait_strategy == LaunchWaitStrategy::WaitForStoppedOrResponse {
            let _ = tokio::time::timeout(Duration::from_secs(5), stopped_or_terminated).await;
        }

        // Step 8: ready. The concrete Running/Paused split is settled by
        // whichever event (or lack of one, for stopOnEntry=false targets
        // that race past this point) lands on the wire next.
        {
            let mut state = session.state.write().await;
            if matches!(*state, SessionState::Configuring) {
                *state = SessionState::Running;
            }
        }

        Ok(session)
    }

    /// Register the event handlers that translate DAP events into
    /// `SessionState` transitions, and (for JavaScript) the
    /// `startDebugging` handoff to a child connection.
    async fn wire_execution_events(self: &Arc<Self>, client: &Arc<DapClient>) {
        let state = self.state.clone();
        let pause_epoch = self.pause_epoch.clone();
        client
            .subscribe_event("stopped", move |event| {
                let state = state.clone();
                let pause_epoch = pause_epoch.clone();
                tokio::spawn(async move {
                    let thread_id = event
                        .body
                        .as_ref()
                        .and_then(|b| b.get("threadId"))
                        .and_then(|v| v.as_i64())
                        .unwrap_or(1);
                    let reason = event
                        .body
                        .as_ref()
                        .and_then(|b| b.get("reason"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    // Every new pause gets its own epoch so frame ids and
                    // variablesReferences issued during the previous one
                    // stop resolving the moment this event lands.
                    let epoch = pause_epoch.fetch_add(1, Ordering::SeqCst) + 1;
                    *state.write().await = SessionState::Paused {
                        thread_id,
                        reason,
                        location: None,
                        epoch,
                    };
                });
            })
            .await;

        let state = self.state.clone();
        client
            .subscribe_event("continued", move |_event| {
                let state = state.clone();
                tokio::spawn(async move {
                    *state.write().await = SessionState::Running;
                });
            })
            .await;

        let state = self.state.clone();
        client
            .subscribe_event("terminated", move |_event| {
                let state = state.clone();
                tokio::spawn(async move {
                    *state.write().await = SessionState::Terminated {
                        reason: "adapter sent terminated event".to_string(),
                    };
                });
            })
            .await;

        let state = self.state.clone();
        client
            .subscribe_event("exited", move |event| {
                let state = state.clone();
                tokio::spawn(async move {
                    let code = event
                        .body
                        .as_ref()
                        .and_then(|b| b.get("exitCode"))
                        .and_then(|v| v.as_i64());
                    *state.write().await = SessionState::Terminated {
                        reason: match code {
                            Some(code) => format!("process exited with code {code}"),
                            None => "process exited".to_string(),
                        },
                    };
                });
            })
            .await;

        if self.language == "javascript" {
            self.wire_multi_session_handoff(client).await;
        }
    }

    /// vscode-js-debug's parent never runs user code: it sends a
    /// `startDebugging` reverse request carrying `__pendingTargetId`, and
    /// the real debugging happens on a *new* connection dialed back to the
    /// same adapter port. A reverse-request handler can't itself await, so
    /// it only extracts the target id and a spawned task does the
    /// connect/initialize/launch dance.
    async fn wire_multi_session_handoff(self: &Arc<Self>, client: &Arc<DapClient>) {
        let port = match self.adapter.lock().await.port {
            Some(port) => port,
            None => return,
        };
        let session = self.clone();
        client
            .on_reverse_request("startDebugging", move |args| {
                let target_id = args
                    .as_ref()
                    .and_then(|v| v.get("__pendingTargetId"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                if let Some(target_id) = target_id {
                    let session = session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.spawn_child(target_id, port).await {
                            warn!(error = %e, "failed to spawn child debug session");
                        }
                    });
                }
                ReverseRequestOutcome::Accept(None)
            })
            .await;
    }

    /// Dial a fresh `DapClient` back to the adapter's own port, tag it
    /// with `__pendingTargetId` so the adapter matches it to the pending
    /// target, and make it the session's active client.
    // Boxed (rather than a plain `async fn`) to break the recursive opaque-type
    // cycle formed by spawn_child -> wire_execution_events ->
    // wire_multi_session_handoff -> (spawned task) -> spawn_child, which
    // otherwise leaves the compiler unable to prove the future is `Send`.
    fn spawn_child(
        self: &Arc<Self>,
        target_id: String,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let socket = tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .map_err(|e| Error::ConnectFailed(format!("127.0.0.1:{port}: {e}")))?;
            let transport = DapTransport::with_max_frame_size(socket, self.max_frame_size);
            let child = Arc::new(DapClient::new_with_transport(Box::new(transport)).await?);

            child
                .initialize(&format!("javascript-child-{target_id}"), self.request_timeout)
                .await?;
            // vscode-js-debug does not respond to a child's launch request: the
            // __pendingTargetId alone is what matches this connection to the
            // target it already committed to running.
            child
                .send_request_no_wait(
                    "launch",
                    Some(json!({"type": "pwa-node", "request": "launch", "__pendingTargetId": target_id})),
                )
                .await?;

            self.wire_execution_events(&child).await;

            let files: Vec<String> = self.breakpoints.lock().await.files().cloned().collect();
            for path in files {
                let specs = self.breakpoints.lock().await.specs_for(&path);
                let source_breakpoints: Vec<SourceBreakpoint> = specs
                    .iter()
                    .map(|s| SourceBreakpoint {
                        line: s.line,
                        column: s.column,
                        condition: s.condition.clone(),
                        hit_condition: s.hit_condition.clone(),
                        log_message: s.log_message.clone(),
                    })
                    .collect();
                let source = Source {
                    name: None,
                    path: Some(path),
                    source_reference: None,
                };
                let _ = child.set_breakpoints(source, source_breakpoints, self.request_timeout).await;
            }

            let _ = child.configuration_done(self.request_timeout).await;

            *self.child_client.write().await = Some(child);
            info!(target_id = %target_id, "child debug session attached");
            Ok(())
        })
    }

    async fn apply_breakpoints(
        client: &DapClient,
        path: &str,
        specs: Vec<BreakpointSpec>,
        timeout: Duration,
    ) -> Result<Vec<Breakpoint>> {
        let source_breakpoints: Vec<SourceBreakpoint> = specs
            .iter()
            .map(|s| SourceBreakpoint {
                line: s.line,
                column: s.column,
                condition: s.condition.clone(),
                hit_condition: s.hit_condition.clone(),
                log_message: s.log_message.clone(),
            })
            .collect();
        let source = Source {
            name: None,
            path: Some(path.to_string()),
            source_reference: None,
        };
        let reported = client.set_breakpoints(source, source_breakpoints, timeout).await?;
        Ok(specs
            .into_iter()
            .zip(reported)
            .map(|(spec, bp)| Breakpoint {
                spec,
                id: bp.id,
                verified: bp.verified,
                actual_line: bp.line,
                message: bp.message,
            })
            .collect())
    }

    pub async fn active_client(&self) -> Arc<DapClient> {
        if let Some(child) = self.child_client.read().await.as_ref() {
            return child.clone();
        }
        self.client.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities.read().await.clone()
    }

    /// The OS pid of this session's adapter process, used by the registry
    /// to distinguish owned processes from orphans during cleanup.
    pub async fn adapter_pid(&self) -> Option<u32> {
        self.adapter.lock().await.pid()
    }

    fn invalid_state(&self, current: &SessionState, attempted: &str) -> Error {
        Error::InvalidSessionState {
            session_id: self.id.clone(),
            current: current.label().to_string(),
            attempted: attempted.to_string(),
        }
    }

    /// Per-file replacement, matching the DAP `setBreakpoints` semantics
    /// the breakpoint map mirrors.
    pub async fn set_breakpoints(
        &self,
        source_path: &str,
        specs: Vec<BreakpointSpec>,
        when: BreakpointTiming,
    ) -> Result<Vec<Breakpoint>> {
        let current = self.state().await;
        let handshake_in_progress = matches!(
            current,
            SessionState::Configuring | SessionState::Connecting | SessionState::Initializing
        );
        if when == BreakpointTiming::Live
            && !current.is_paused()
            && !self.long_running
            && !handshake_in_progress
        {
            return Err(self.invalid_state(&current, "set_breakpoints(when=live)"));
        }

        let client = self.active_client().await;
        let resolved = Self::apply_breakpoints(&client, source_path, specs, self.request_timeout).await?;
        self.breakpoints.lock().await.replace_file(source_path, resolved.clone());
        Ok(resolved)
    }

    pub async fn clear_breakpoints(&self, filter: ClearBreakpointsFilter) -> Result<Vec<Breakpoint>> {
        let client = self.active_client().await;

        match filter {
            ClearBreakpointsFilter::All => {
                let files: Vec<String> = self.breakpoints.lock().await.files().cloned().collect();
                for file in files {
                    client
                        .set_breakpoints(
                            Source { name: None, path: Some(file.clone()), source_reference: None },
                            vec![],
                            self.request_timeout,
                        )
                        .await?;
                    self.breakpoints.lock().await.replace_file(&file, vec![]);
                }
            }
            ClearBreakpointsFilter::ByFile(path) => {
                client
                    .set_breakpoints(
                        Source { name: None, path: Some(path.clone()), source_reference: None },
                        vec![],
                        self.request_timeout,
                    )
                    .await?;
                self.breakpoints.lock().await.replace_file(&path, vec![]);
            }
            ClearBreakpointsFilter::ById(id) => {
                let target = self.breakpoints.lock().await.by_id(id).cloned();
                if let Some(bp) = target {
                    let path = bp.spec.source_path.clone();
                    let remaining: Vec<BreakpointSpec> = self
                        .breakpoints
                        .lock()
                        .await
                        .specs_for(&path)
                        .into_iter()
                        .filter(|s| s.line != bp.spec.line || s.column != bp.spec.column)
                        .collect();
                    let resolved = Self::apply_breakpoints(&client, &path, remaining, self.request_timeout).await?;
                    self.breakpoints.lock().await.replace_file(&path, resolved);
                }
            }
        }
        Ok(self.breakpoints.lock().await.all().cloned().collect())
    }

    pub async fn continue_execution(&self, thread_id: Option<i64>) -> Result<SessionState> {
        let _guard = self.op_lock.lock().await;
        let current = self.state().await;
        if !current.is_paused() {
            return Err(Error::NotPaused);
        }
        let thread_id = match (&current, thread_id) {
            (SessionState::Paused { thread_id: t, .. }, None) => *t,
            (_, Some(t)) => t,
            (other, None) => return Err(self.invalid_state(other, "continue")),
        };

        let client = self.active_client().await;
        let interest = client.continue_execution(thread_id, self.request_timeout).await?;
        let _ = tokio::time::timeout(self.request_timeout, interest).await;
        Ok(self.state().await)
    }

    pub async fn step(&self, granularity: StepGranularity, thread_id: Option<i64>) -> Result<SessionState> {
        let _guard = self.op_lock.lock().await;
        let current = self.state().await;
        if !current.is_paused() {
            return Err(Error::NotPaused);
        }
        let thread_id = match (&current, thread_id) {
            (SessionState::Paused { thread_id: t, .. }, None) => *t,
            (_, Some(t)) => t,
            (other, None) => return Err(self.invalid_state(other, "step")),
        };

        let client = self.active_client().await;
        let interest = match granularity {
            StepGranularity::Over => client.next(thread_id, self.request_timeout).await?,
            StepGranularity::Into => client.step_in(thread_id, self.request_timeout).await?,
            StepGranularity::Out => client.step_out(thread_id, self.request_timeout).await?,
        };
        let _ = tokio::time::timeout(self.request_timeout, interest).await;
        Ok(self.state().await)
    }

    pub async fn pause(&self, thread_id: Option<i64>) -> Result<()> {
        let caps = self.capabilities().await;
        if !caps.and_then(|c| c.supports_pause).unwrap_or(true) {
            return Err(Error::NotSupported("pause".to_string()));
        }
        let thread_id = thread_id.unwrap_or(1);
        self.active_client().await.pause(thread_id, self.request_timeout).await
    }

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        self.active_client().await.threads(self.request_timeout).await
    }

    /// The current pause's epoch, or `Err(NotPaused)` if the session
    /// isn't paused right now.
    async fn current_pause_epoch(&self) -> Result<u64> {
        match self.state().await {
            SessionState::Paused { epoch, .. } => Ok(epoch),
            _ => Err(Error::NotPaused),
        }
    }

    pub async fn stack(&self, thread_id: i64) -> Result<Vec<StackFrame>> {
        let _guard = self.op_lock.lock().await;
        let epoch = self.current_pause_epoch().await?;
        let mut frames = self.active_client().await.stack_trace(thread_id, self.request_timeout).await?;
        for frame in &mut frames {
            frame.id = encode_ref(epoch, frame.id);
        }
        Ok(frames)
    }

    pub async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let _guard = self.op_lock.lock().await;
        let epoch = self.current_pause_epoch().await?;
        let (frame_epoch, raw_frame_id) = decode_ref(frame_id);
        if frame_id != 0 && frame_epoch != epoch {
            return Err(Error::InvalidFrameReference(frame_id));
        }
        let mut scopes = self.active_client().await.scopes(raw_frame_id, self.request_timeout).await?;
        for scope in &mut scopes {
            scope.variables_reference = encode_ref(epoch, scope.variables_reference);
        }
        Ok(scopes)
    }

    pub async fn variables(
        &self,
        variables_reference: i64,
        start: Option<i64>,
        count: Option<i64>,
    ) -> Result<Vec<Variable>> {
        let _guard = self.op_lock.lock().await;
        let epoch = self.current_pause_epoch().await?;
        let (ref_epoch, raw_reference) = decode_ref(variables_reference);
        if variables_reference != 0 && ref_epoch != epoch {
            return Err(Error::InvalidVariableReference(variables_reference));
        }
        let mut variables = self
            .active_client()
            .await
            .variables(raw_reference, start, count, self.request_timeout)
            .await?;
        for variable in &mut variables {
            variable.variables_reference = encode_ref(epoch, variable.variables_reference);
        }
        Ok(variables)
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        self.active_client()
            .await
            .evaluate(expression, frame_id, context, self.request_timeout)
            .await
    }

    pub async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> Result<SetVariableResponseBody> {
        self.active_client()
            .await
            .set_variable(variables_reference, name, value, self.request_timeout)
            .await
    }

    /// Native Restart if advertised, else emulated as disconnect + a
    /// fresh handshake against the same target.
    pub async fn restart(&self, keep_breakpoints: bool) -> Result<()> {
        let supports_native = self
            .capabilities()
            .await
            .and_then(|c| c.supports_restart_request)
            .unwrap_or(false);

        if supports_native {
            self.active_client().await.restart(self.request_timeout).await?;
            return Ok(());
        }

        warn!("adapter does not support native restart, emulating with disconnect + relaunch");
        let breakpoints = if keep_breakpoints {
            self.breakpoints.lock().await.clone()
        } else {
            BreakpointMap::new()
        };

        let _ = self.active_client().await.disconnect(Duration::from_secs(2)).await;
        *self.child_client.write().await = None;

        let mut adapter = self.adapter.lock().await;
        adapter.release().await;

        let stream = adapter.spawn(&self.target).await?;
        let transport = DapTransport::with_max_frame_size(stream, self.max_frame_size);
        let new_client = Arc::new(DapClient::new_with_transport(Box::new(transport)).await?);

        let initialized_rx = new_client.register_interest(&["initialized"]).await;
        let capabilities = new_client.initialize(adapter.adapter_id(), self.request_timeout).await?;
        tokio::time::timeout(self.request_timeout, initialized_rx)
            .await
            .map_err(|_| Error::InitializationTimeout)?
            .map_err(|_| Error::InitializationTimeout)?;

        for path in breakpoints.files().cloned().collect::<Vec<_>>() {
            let specs = breakpoints.specs_for(&path);
            let resolved = Self::apply_breakpoints(&new_client, &path, specs, self.request_timeout).await?;
            self.breakpoints.lock().await.replace_file(&path, resolved);
        }
        if !self.exception_filters.is_empty() {
            new_client
                .set_exception_breakpoints(self.exception_filters.clone(), self.request_timeout)
                .await?;
        }
        if capabilities.supports_configuration_done_request.unwrap_or(false) {
            new_client.configuration_done(self.request_timeout).await?;
        }

        let launch_config = adapter.launch_configuration(&self.target, &self.options);
        new_client.launch(launch_config, Duration::from_secs(60)).await?;

        *self.capabilities.write().await = Some(capabilities);
        *self.state.write().await = SessionState::Running;

        Ok(())
    }

    /// Clean shutdown: Disconnect with a short timeout, then release the
    /// adapter process and port unconditionally, regardless of whether
    /// Disconnect succeeded.
    pub async fn stop(&self) -> Result<()> {
        *self.state.write().await = SessionState::Terminating;

        let client = self.active_client().await;
        if let Err(e) = client.disconnect(Duration::from_secs(2)).await {
            warn!(error = %e, "disconnect failed or timed out, proceeding with teardown");
        }
        if let Some(child) = self.child_client.read().await.as_ref() {
            let _ = child.disconnect(Duration::from_secs(2)).await;
        }

        self.adapter.lock().await.release().await;

        *self.state.write().await = SessionState::Terminated {
            reason: "stopped by caller".to_string(),
        };
        Ok(())
    }
}
