//! Process-wide directory of live [`Session`]s.
//!
//! One [`SessionRegistry`] is constructed at process start and handed to
//! every façade; its lifetime is the process's. It owns no DAP state
//! itself — that lives on each `Session` — it only tracks which sessions
//! exist, which one is the caller's default, and the static per-language
//! descriptors used to validate a `create` request before spending a
//! port or a process on it.

use crate::session::Session;
use crate::{Error, Result};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use sysinfo::System;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Immutable per-language descriptor, built once at registry
/// construction and never mutated afterward.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub language: &'static str,
    pub adapter_id: &'static str,
    pub file_extensions: &'static [&'static str],
    pub binary_identifier: &'static str,
    pub default_port_range: RangeInclusive<u16>,
    pub process_name_pattern: &'static str,
}

fn known_adapters() -> Vec<AdapterConfig> {
    vec![
        AdapterConfig {
            language: "python",
            adapter_id: "debugpy",
            file_extensions: &["py"],
            binary_identifier: "python",
            default_port_range: 9000..=9999,
            process_name_pattern: "debugpy.adapter",
        },
        AdapterConfig {
            language: "javascript",
            adapter_id: "vscode-js-debug",
            file_extensions: &["js", "mjs", "cjs", "ts"],
            binary_identifier: "node",
            default_port_range: 9000..=9999,
            process_name_pattern: "dapDebugServer.js",
        },
        AdapterConfig {
            language: "java",
            adapter_id: "java-debug-server",
            file_extensions: &["java"],
            binary_identifier: "java",
            default_port_range: 9000..=9999,
            process_name_pattern: "com.microsoft.java.debug.plugin.internal.DebugProxy",
        },
    ]
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    default_session: RwLock<Option<String>>,
    adapters: Vec<AdapterConfig>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_session: RwLock::new(None),
            adapters: known_adapters(),
        }
    }

    pub fn adapter_config(&self, language: &str) -> Option<&AdapterConfig> {
        self.adapters.iter().find(|a| a.language == language)
    }

    pub fn adapters(&self) -> &[AdapterConfig] {
        &self.adapters
    }

    /// Register a session that has already completed its handshake. The
    /// first registered session becomes the default.
    pub async fn register(&self, session: Arc<Session>) {
        let id = session.id.clone();
        let mut sessions = self.sessions.write().await;
        sessions.insert(id.clone(), session);

        let mut default = self.default_session.write().await;
        if default.is_none() {
            *default = Some(id);
        }
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Resolve an explicit id, or fall back to the default session.
    pub async fn resolve(&self, session_id: Option<&str>) -> Result<Arc<Session>> {
        match session_id {
            Some(id) => self.get(id).await,
            None => {
                let default = self.default_session.read().await.clone();
                match default {
                    Some(id) => self.get(&id).await,
                    None => Err(Error::SessionNotFound("no default session".to_string())),
                }
            }
        }
    }

    pub async fn list(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn set_default(&self, session_id: &str) -> Result<()> {
        if !self.sessions.read().await.contains_key(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        *self.default_session.write().await = Some(session_id.to_string());
        Ok(())
    }

    /// Stop and drop a session. Stopping is best-effort: removal proceeds
    /// even if the session's own `stop()` failed partway through.
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let session = self.get(session_id).await?;
        if let Err(e) = session.stop().await {
            warn!(session_id, error = %e, "session stop failed during removal, removing anyway");
        }

        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);

        let mut default = self.default_session.write().await;
        if default.as_deref() == Some(session_id) {
            *default = sessions.keys().next().cloned();
        }

        Ok(())
    }

    /// Stop every session in parallel, best-effort, for process shutdown.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        info!(count = sessions.len(), "shutting down all sessions");

        let handles: Vec<_> = sessions
            .into_iter()
            .map(|session| {
                tokio::spawn(async move {
                    if let Err(e) = session.stop().await {
                        warn!(session_id = %session.id, error = %e, "session stop failed during shutdown");
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.sessions.write().await.clear();
        *self.default_session.write().await = None;
    }

    /// Find adapter processes matching a known language's process name
    /// pattern and kill any that aren't the process backing a live
    /// Session — leftovers from a session whose owning process crashed
    /// before it could call `stop()`.
    pub async fn cleanup_orphans(&self) -> usize {
        let owned_pids = self.owned_pids().await;

        let mut system = System::new_all();
        system.refresh_all();

        let mut killed = 0;
        for (pid, process) in system.processes() {
            let cmd = process.cmd().join(std::ffi::OsString::from(" ").as_os_str());
            let cmd = cmd.to_string_lossy();
            let is_known_adapter = self
                .adapters
                .iter()
                .any(|a| cmd.contains(a.process_name_pattern));

            if is_known_adapter && !owned_pids.contains(&pid.as_u32()) {
                warn!(pid = pid.as_u32(), command = %cmd, "killing orphaned adapter process");
                if process.kill() {
                    killed += 1;
                }
            }
        }
        killed
    }

    async fn owned_pids(&self) -> std::collections::HashSet<u32> {
        let sessions = self.sessions.read().await;
        let mut pids = std::collections::HashSet::new();
        for session in sessions.values() {
            if let Some(pid) = session.adapter_pid().await {
                pids.insert(pid);
            }
        }
        pids
    }
}
