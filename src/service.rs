//! The Debug Service: a stable, adapter-agnostic operation surface over
//! the Session Registry. Every method resolves a session (explicit id or
//! the registry's default), forwards to it, and adds session/command
//! context to errors that bubble up from lower layers.
//!
//! This is the boundary a façade (CLI, agent protocol) is expected to
//! sit behind; it is deliberately thin; nearly all the actual semantics
//! live on [`Session`] itself, grounded in the initialization protocol
//! and per-session serialization rules documented there.

use crate::adapters::{LaunchOptions, Target};
use crate::config::AidbConfig;
use crate::dap::types::{EvaluateResponseBody, Scope, SetVariableResponseBody, StackFrame, Thread, Variable};
use crate::registry::SessionRegistry;
use crate::session::{
    Breakpoint, BreakpointSpec, BreakpointTiming, ClearBreakpointsFilter, Session, SessionState,
    StepGranularity,
};
use crate::Result;
use std::sync::Arc;
use tracing::instrument;

pub struct DebugService {
    registry: Arc<SessionRegistry>,
    config: AidbConfig,
}

impl DebugService {
    pub fn new(registry: Arc<SessionRegistry>, config: AidbConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Spawn (or attach) and run the initialization handshake, then
    /// register the resulting session and return its id.
    #[instrument(skip(self, options, initial_breakpoints))]
    pub async fn start(
        &self,
        language: &str,
        target: Target,
        options: LaunchOptions,
        initial_breakpoints: Vec<(String, Vec<BreakpointSpec>)>,
        exception_filters: Vec<String>,
        long_running: bool,
    ) -> Result<String> {
        let session = Session::launch(
            language,
            target,
            options,
            initial_breakpoints,
            exception_filters,
            long_running,
            &self.config,
        )
        .await?;
        let id = session.id.clone();
        self.registry.register(session).await;
        Ok(id)
    }

    #[instrument(skip(self, options, initial_breakpoints))]
    pub async fn attach(
        &self,
        language: &str,
        host: &str,
        port: u16,
        options: LaunchOptions,
        initial_breakpoints: Vec<(String, Vec<BreakpointSpec>)>,
        exception_filters: Vec<String>,
        long_running: bool,
    ) -> Result<String> {
        let session = Session::attach(
            language,
            host,
            port,
            options,
            initial_breakpoints,
            exception_filters,
            long_running,
            &self.config,
        )
        .await?;
        let id = session.id.clone();
        self.registry.register(session).await;
        Ok(id)
    }

    async fn resolve(&self, session_id: Option<&str>) -> Result<Arc<Session>> {
        self.registry.resolve(session_id).await
    }

    pub async fn state(&self, session_id: Option<&str>) -> Result<SessionState> {
        Ok(self.resolve(session_id).await?.state().await)
    }

    #[instrument(skip(self, specs))]
    pub async fn set_breakpoints(
        &self,
        session_id: Option<&str>,
        source_path: &str,
        specs: Vec<BreakpointSpec>,
        when: BreakpointTiming,
    ) -> Result<Vec<Breakpoint>> {
        self.resolve(session_id)
            .await?
            .set_breakpoints(source_path, specs, when)
            .await
    }

    pub async fn clear_breakpoints(
        &self,
        session_id: Option<&str>,
        filter: ClearBreakpointsFilter,
    ) -> Result<Vec<Breakpoint>> {
        self.resolve(session_id).await?.clear_breakpoints(filter).await
    }

    pub async fn continue_execution(
        &self,
        session_id: Option<&str>,
        thread_id: Option<i64>,
    ) -> Result<SessionState> {
        self.resolve(session_id).await?.continue_execution(thread_id).await
    }

    pub async fn step(
        &self,
        session_id: Option<&str>,
        granularity: StepGranularity,
        thread_id: Option<i64>,
    ) -> Result<SessionState> {
        self.resolve(session_id).await?.step(granularity, thread_id).await
    }

    pub async fn pause(&self, session_id: Option<&str>, thread_id: Option<i64>) -> Result<()> {
        self.resolve(session_id).await?.pause(thread_id).await
    }

    pub async fn threads(&self, session_id: Option<&str>) -> Result<Vec<Thread>> {
        self.resolve(session_id).await?.threads().await
    }

    pub async fn stack(&self, session_id: Option<&str>, thread_id: i64) -> Result<Vec<StackFrame>> {
        self.resolve(session_id).await?.stack(thread_id).await
    }

    pub async fn scopes(&self, session_id: Option<&str>, frame_id: i64) -> Result<Vec<Scope>> {
        self.resolve(session_id).await?.scopes(frame_id).await
    }

    pub async fn variables(
        &self,
        session_id: Option<&str>,
        variables_reference: i64,
        start: Option<i64>,
        count: Option<i64>,
    ) -> Result<Vec<Variable>> {
        self.resolve(session_id)
            .await?
            .variables(variables_reference, start, count)
            .await
    }

    pub async fn evaluate(
        &self,
        session_id: Option<&str>,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        self.resolve(session_id)
            .await?
            .evaluate(expression, frame_id, context)
            .await
    }

    pub async fn set_variable(
        &self,
        session_id: Option<&str>,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> Result<SetVariableResponseBody> {
        self.resolve(session_id)
            .await?
            .set_variable(variables_reference, name, value)
            .await
    }

    pub async fn restart(&self, session_id: Option<&str>, keep_breakpoints: bool) -> Result<()> {
        self.resolve(session_id).await?.restart(keep_breakpoints).await
    }

    /// Stop and deregister the session.
    pub async fn stop(&self, session_id: Option<&str>) -> Result<()> {
        let session = self.resolve(session_id).await?;
        self.registry.remove(&session.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_fails_cleanly_with_no_sessions() {
        let service = DebugService::new(Arc::new(SessionRegistry::new()), AidbConfig::default());
        let result = service.state(None).await;
        assert!(result.is_err());
    }
}
