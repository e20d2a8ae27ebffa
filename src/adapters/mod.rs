//! Per-language plugins. An [`Adapter`] is a small, closed capability set
//! (`build_launch_command`, `adapter_env`, `process_name_pattern`,
//! `launch_configuration`, `lifecycle_hooks`) rather than an open
//! inheritance hierarchy — new languages are added by implementing the
//! trait, never by subclassing an existing one.
//!
//! [`AdapterInstance`] is the mutable, per-session object bound to one
//! [`Adapter`]: it owns the spawned process handle, the allocated port,
//! and the hook table, and is responsible for releasing both on every
//! exit path.

pub mod java;
pub mod javascript;
pub mod logging;
pub mod python;
pub mod source_path;

use crate::dap::socket_helper;
use crate::{Error, Result};
use logging::DebugAdapterLogger;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::time::Duration;
use tracing::{info, warn};

/// A logical debug target, independent of how the caller described it.
#[derive(Debug, Clone)]
pub enum Target {
    File { path: String, args: Vec<String> },
    Module { name: String, args: Vec<String> },
    TestInvocation { command: String, args: Vec<String> },
    Pid(u32),
    Remote { host: String, port: u16 },
}

/// A concrete, spawnable process description.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
}

/// Extra per-launch options a caller may set regardless of language.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub stop_on_entry: bool,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

/// How a Launch/Attach request's completion should be judged. Some
/// adapters (vscode-js-debug's parent session) never send a meaningful
/// Launch response; the program is considered running once a Stopped or
/// a child `startDebugging` reverse request has been observed instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchWaitStrategy {
    WaitForResponse,
    WaitForStoppedOrResponse,
}

/// Where an adapter-reported source path resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePathResolution {
    Local(String),
    ArchiveMember { archive: String, member: String },
    Opaque(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    PreLaunch,
    PostLaunch,
    PreDisconnect,
    PostDisconnect,
}

type HookFn = Arc<dyn Fn(&mut AdapterInstance) -> Result<()> + Send + Sync>;

/// Hooks are grouped by phase and run in ascending priority order; a hook
/// that returns `Err` aborts the rest of that phase.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    hooks: HashMap<LifecyclePhase, Vec<(i32, HookFn)>>,
}

impl LifecycleHooks {
    pub fn register<F>(&mut self, phase: LifecyclePhase, priority: i32, hook: F)
    where
        F: Fn(&mut AdapterInstance) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks
            .entry(phase)
            .or_default()
            .push((priority, Arc::new(hook)));
        self.hooks
            .get_mut(&phase)
            .unwrap()
            .sort_by_key(|(priority, _)| *priority);
    }

    fn run(&self, phase: LifecyclePhase, instance: &mut AdapterInstance) -> Result<()> {
        let Some(hooks) = self.hooks.get(&phase) else {
            return Ok(());
        };
        for (_, hook) in hooks.clone() {
            hook(instance)?;
        }
        Ok(())
    }
}

/// The capability set every language plugs into. Stateless: all mutable,
/// per-session data lives in [`AdapterInstance`].
pub trait Adapter: Send + Sync + DebugAdapterLogger {
    fn language(&self) -> &'static str;
    fn adapter_id(&self) -> &'static str;

    /// Resolve `target` plus the port the DAP server should listen on
    /// into a concrete, spawnable process.
    fn build_launch_command(&self, target: &Target, port: u16) -> Result<ProcessCommand>;

    fn adapter_env(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// A substring matched against process command lines to find and
    /// reap orphaned adapter processes left behind by a crashed session.
    fn process_name_pattern(&self) -> &'static str;

    /// The JSON body sent as DAP `launch`/`attach` arguments.
    fn launch_configuration(&self, target: &Target, options: &LaunchOptions) -> Value;

    fn lifecycle_hooks(&self) -> LifecycleHooks {
        LifecycleHooks::default()
    }

    fn launch_wait_strategy(&self) -> LaunchWaitStrategy {
        LaunchWaitStrategy::WaitForResponse
    }

    /// Map a path reported by the adapter back to something a caller can
    /// open locally, or say it's opaque if that's not possible.
    fn resolve_source_path(&self, reported: &str) -> SourcePathResolution {
        source_path::resolve_generic(reported)
    }

    fn default_dap_port(&self) -> Option<u16> {
        None
    }

    fn fallback_port_range(&self) -> RangeInclusive<u16> {
        9000..=9999
    }
}

/// The mutable, per-session object: one spawned process, one port,
/// exclusively owned by its Session.
pub struct AdapterInstance {
    capabilities: Box<dyn Adapter>,
    hooks: LifecycleHooks,
    pub port: Option<u16>,
    process: Option<Child>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
}

impl AdapterInstance {
    pub fn new(capabilities: Box<dyn Adapter>) -> Self {
        let hooks = capabilities.lifecycle_hooks();
        Self {
            capabilities,
            hooks,
            port: None,
            process: None,
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn language(&self) -> &'static str {
        self.capabilities.language()
    }

    pub fn adapter_id(&self) -> &'static str {
        Adapter::adapter_id(&*self.capabilities)
    }

    /// Log a DAP initialization-handshake failure in this adapter's
    /// language-specific voice.
    pub fn log_init_error(&self, error: &Error) {
        self.capabilities.log_init_error(error);
    }

    /// The OS pid of the spawned adapter process, if any (attach targets
    /// and processes that have already exited report `None`).
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|c| c.id())
    }

    pub fn launch_wait_strategy(&self) -> LaunchWaitStrategy {
        self.capabilities.launch_wait_strategy()
    }

    pub fn resolve_source_path(&self, reported: &str) -> SourcePathResolution {
        self.capabilities.resolve_source_path(reported)
    }

    /// Allocate a port, spawn the adapter process, and connect to it.
    /// Runs `pre_launch`/`post_launch` hooks around the spawn.
    pub async fn spawn(&mut self, target: &Target) -> Result<tokio::net::TcpStream> {
        self.capabilities.log_selection();
        let hooks = self.hooks.clone();
        hooks.run(LifecyclePhase::PreLaunch, self)?;

        let port = self.allocate_port()?;
        let process_command = self.capabilities.build_launch_command(target, port)?;

        info!(
            language = self.capabilities.language(),
            port, command = %process_command.command, "spawning adapter process"
        );
        self.capabilities.log_spawn_attempt();

        let mut command = Command::new(&process_command.command);
        command.args(&process_command.args);
        for (key, value) in self.capabilities.adapter_env() {
            command.env(key, value);
        }
        for (key, value) in &process_command.env {
            command.env(key, value);
        }
        if let Some(cwd) = &process_command.cwd {
            command.current_dir(cwd);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let error = Error::SpawnFailed(format!("{}: {e}", process_command.command));
                self.capabilities.log_spawn_error(&error);
                return Err(error);
            }
        };

        self.process = Some(child);
        self.port = Some(port);

        let stream = match socket_helper::connect_with_retry(port, Duration::from_secs(5)).await {
            Ok(stream) => stream,
            Err(e) => {
                self.capabilities.log_connection_error(&e);
                return Err(e);
            }
        };
        self.capabilities.log_connection_success();

        let hooks = self.hooks.clone();
        hooks.run(LifecyclePhase::PostLaunch, self)?;

        Ok(stream)
    }

    /// Attach mode: skip spawning, connect directly to a caller-provided
    /// endpoint.
    pub async fn attach(&mut self, host: &str, port: u16) -> Result<tokio::net::TcpStream> {
        self.capabilities.log_selection();
        let hooks = self.hooks.clone();
        hooks.run(LifecyclePhase::PreLaunch, self)?;
        let tcp = match tokio::net::TcpStream::connect((host, port)).await {
            Ok(tcp) => tcp,
            Err(e) => {
                let error = Error::ConnectFailed(format!("{host}:{port}: {e}"));
                self.capabilities.log_connection_error(&error);
                return Err(error);
            }
        };
        self.capabilities.log_connection_success();
        self.port = Some(port);
        let hooks = self.hooks.clone();
        hooks.run(LifecyclePhase::PostLaunch, self)?;
        Ok(tcp)
    }

    /// Send SIGTERM and give the process a grace period to exit on its
    /// own before escalating to SIGKILL (`start_kill`). A process with no
    /// pid (already reaped, or the platform doesn't expose one) only
    /// gets the `start_kill` fallback.
    async fn terminate_then_kill(process: &mut Child) {
        if let Some(pid) = process.id() {
            if let Err(e) = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            ) {
                warn!(error = %e, "failed to send SIGTERM to adapter process");
            }
        }

        let exited = tokio::time::timeout(Duration::from_secs(3), process.wait()).await;
        if exited.is_ok() {
            return;
        }

        warn!("adapter process did not exit after SIGTERM, sending SIGKILL");
        if let Err(e) = process.start_kill() {
            warn!(error = %e, "failed to SIGKILL adapter process");
        }
        let killed = tokio::time::timeout(Duration::from_secs(3), process.wait()).await;
        if killed.is_err() {
            warn!("adapter process did not exit within grace period after SIGKILL");
        }
    }

    fn allocate_port(&self) -> Result<u16> {
        match self.capabilities.default_dap_port() {
            Some(preferred) => socket_helper::find_free_port_in_range(
                self.capabilities.fallback_port_range(),
                Some(preferred),
            ),
            None => socket_helper::find_free_port(),
        }
    }

    pub fn launch_configuration(&self, target: &Target, options: &LaunchOptions) -> Value {
        self.capabilities.launch_configuration(target, options)
    }

    /// Runs `pre_disconnect`/`post_disconnect` hooks, then signals the
    /// process (terminate, then kill after a grace period), then releases
    /// the port. Idempotent; safe to call more than once.
    pub async fn release(&mut self) {
        self.capabilities.log_shutdown();
        let hooks = self.hooks.clone();
        if let Err(e) = hooks.run(LifecyclePhase::PreDisconnect, self) {
            warn!(error = %e, "pre_disconnect hook failed");
        }

        if let Some(mut process) = self.process.take() {
            Self::terminate_then_kill(&mut process).await;
        }
        self.port = None;

        let hooks = self.hooks.clone();
        if let Err(e) = hooks.run(LifecyclePhase::PostDisconnect, self) {
            warn!(error = %e, "post_disconnect hook failed");
        }
    }
}

impl Drop for AdapterInstance {
    /// Last-resort cleanup for a session dropped without going through
    /// `release()`. `Drop` can't await a grace period, so this skips
    /// straight to SIGKILL rather than attempting the two-phase sequence
    /// `release()` uses.
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            let _ = process.start_kill();
        }
    }
}

/// Construct the capability set for a supported language identifier.
pub fn for_language(language: &str) -> Result<Box<dyn Adapter>> {
    match language {
        "python" => Ok(Box::new(python::PythonAdapter::new())),
        "javascript" | "node" | "nodejs" => Ok(Box::new(javascript::JavaScriptAdapter::new())),
        "java" => Ok(Box::new(java::JavaAdapter::new())),
        other => Err(Error::TargetInvalid(format!("unsupported language: {other}"))),
    }
}
