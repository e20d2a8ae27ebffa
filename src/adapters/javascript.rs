//! vscode-js-debug adapter.
//!
//! Unlike Python and Java, the process we spawn isn't the debuggee's
//! adapter directly: it's a DAP server (`dapDebugServer.js`) that accepts
//! a *parent* session, and which spawns and drives the actual Node.js
//! process as a *child* session connecting back to the same port
//! (`startDebugging` reverse request carrying `__pendingTargetId`; see
//! `Session::spawn_child`). The parent session here never gets a
//! meaningful Stopped event of its own, which is why
//! [`Adapter::launch_wait_strategy`] returns `WaitForStoppedOrResponse`.

use super::logging::DebugAdapterLogger;
use super::{Adapter, LaunchOptions, LaunchWaitStrategy, ProcessCommand, Target};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::error;

pub struct JavaScriptAdapter;

impl JavaScriptAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Locate `dapDebugServer.js`, checking the locations a vscode-js-debug
    /// release tarball or container image typically lands in.
    pub fn dap_server_path() -> Result<String> {
        let locations = [
            "/usr/local/lib/vscode-js-debug/src/dapDebugServer.js",
            "/usr/local/lib/js-debug/src/dapDebugServer.js",
            "~/.vscode-js-debug/src/dapDebugServer.js",
        ];

        for location in locations {
            let expanded = shellexpand::tilde(location);
            if std::path::Path::new(expanded.as_ref()).exists() {
                return Ok(expanded.to_string());
            }
        }

        Err(Error::AdapterNotInstalled(
            "vscode-js-debug (dapDebugServer.js not found in any known install location)".to_string(),
        ))
    }
}

impl Default for JavaScriptAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for JavaScriptAdapter {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn adapter_id(&self) -> &'static str {
        "vscode-js-debug"
    }

    fn build_launch_command(&self, target: &Target, port: u16) -> Result<ProcessCommand> {
        if matches!(target, Target::Remote { .. }) {
            return Err(Error::TargetInvalid(
                "vscode-js-debug is spawned as a DAP server even for attach; use Adapter::attach instead".into(),
            ));
        }

        let dap_server_path = Self::dap_server_path()?;
        Ok(ProcessCommand {
            command: "node".to_string(),
            // Explicit 127.0.0.1: vscode-js-debug defaults to IPv6 (::1),
            // which this crate's loopback dialing does not assume.
            args: vec![dap_server_path, port.to_string(), "127.0.0.1".to_string()],
            env: HashMap::new(),
            cwd: None,
        })
    }

    fn process_name_pattern(&self) -> &'static str {
        "dapDebugServer.js"
    }

    fn launch_configuration(&self, target: &Target, options: &LaunchOptions) -> Value {
        let (program, args) = match target {
            Target::File { path, args } => (path.clone(), args.clone()),
            Target::TestInvocation { command, args } => (command.clone(), args.clone()),
            Target::Module { name, args } => (name.clone(), args.clone()),
            Target::Pid(_) | Target::Remote { .. } => (String::new(), Vec::new()),
        };

        let mut launch = json!({
            "type": "pwa-node",
            "request": "launch",
            "program": program,
            "args": args,
            "stopOnEntry": options.stop_on_entry,
            "console": "internalConsole",
        });

        if let Some(cwd) = &options.cwd {
            launch["cwd"] = json!(cwd);
        }
        if !options.env.is_empty() {
            launch["env"] = json!(options.env);
        }

        launch
    }

    fn launch_wait_strategy(&self) -> LaunchWaitStrategy {
        LaunchWaitStrategy::WaitForStoppedOrResponse
    }
}

impl DebugAdapterLogger for JavaScriptAdapter {
    fn language_name(&self) -> &str {
        "JavaScript"
    }

    fn transport_type(&self) -> &str {
        "TCP Socket (multi-session)"
    }

    fn adapter_id(&self) -> &str {
        "vscode-js-debug"
    }

    fn command_line(&self) -> String {
        "node <dapDebugServer.js> <PORT> 127.0.0.1".to_string()
    }

    fn requires_workaround(&self) -> bool {
        true
    }

    fn workaround_reason(&self) -> Option<&str> {
        Some("vscode-js-debug's parent session doesn't emit Stopped; the child session does")
    }

    fn log_spawn_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "vscode-js-debug", %error, "failed to spawn dapDebugServer.js");
        error!("possible causes: vscode-js-debug not installed, or node not on PATH");
    }

    fn log_connection_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "vscode-js-debug", %error, "failed to connect to dapDebugServer.js");
    }

    fn log_init_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "vscode-js-debug", %error, "DAP initialization handshake failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_launch_command_rejects_attach_targets() {
        let adapter = JavaScriptAdapter::new();
        let target = Target::Remote {
            host: "127.0.0.1".to_string(),
            port: 9229,
        };
        let result = adapter.build_launch_command(&target, 8123);
        assert!(matches!(result, Err(Error::TargetInvalid(_))));
    }

    #[test]
    fn launch_configuration_sets_pwa_node_type() {
        let adapter = JavaScriptAdapter::new();
        let target = Target::File {
            path: "/workspace/fizzbuzz.js".to_string(),
            args: vec!["100".to_string()],
        };
        let config = adapter.launch_configuration(&target, &LaunchOptions::default());

        assert_eq!(config["type"], "pwa-node");
        assert_eq!(config["request"], "launch");
        assert_eq!(config["program"], "/workspace/fizzbuzz.js");
        assert_eq!(config["console"], "internalConsole");
    }

    #[test]
    fn launch_wait_strategy_waits_for_stopped_not_just_response() {
        let adapter = JavaScriptAdapter::new();
        assert_eq!(
            adapter.launch_wait_strategy(),
            LaunchWaitStrategy::WaitForStoppedOrResponse
        );
    }
}
