//! `debugpy` adapter: spawned as `python -m debugpy.adapter --port <port>`
//! and driven over the TCP port it listens on.

use super::logging::DebugAdapterLogger;
use super::{Adapter, LaunchOptions, ProcessCommand, Target};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::error;

pub struct PythonAdapter;

impl PythonAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for PythonAdapter {
    fn language(&self) -> &'static str {
        "python"
    }

    fn adapter_id(&self) -> &'static str {
        "debugpy"
    }

    fn build_launch_command(&self, target: &Target, port: u16) -> Result<ProcessCommand> {
        let args = vec![
            "-m".to_string(),
            "debugpy.adapter".to_string(),
            "--port".to_string(),
            port.to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
        ];

        match target {
            Target::File { .. } | Target::Module { .. } | Target::TestInvocation { .. } => {}
            Target::Pid(_) | Target::Remote { .. } => {
                return Err(Error::TargetInvalid(
                    "debugpy adapter process is only spawned for launch targets; attach connects directly".into(),
                ));
            }
        }

        Ok(ProcessCommand {
            command: "python".to_string(),
            args,
            env: HashMap::new(),
            cwd: None,
        })
    }

    fn process_name_pattern(&self) -> &'static str {
        "debugpy.adapter"
    }

    fn launch_configuration(&self, target: &Target, options: &LaunchOptions) -> Value {
        let (program, module, args) = match target {
            Target::File { path, args } => (Some(path.clone()), None, args.clone()),
            Target::Module { name, args } => (None, Some(name.clone()), args.clone()),
            Target::TestInvocation { command, args } => (Some(command.clone()), None, args.clone()),
            Target::Pid(_) | Target::Remote { .. } => (None, None, Vec::new()),
        };

        let mut launch = json!({
            "request": "launch",
            "type": "python",
            "args": args,
            "console": "internalConsole",
            "stopOnEntry": options.stop_on_entry,
            "justMyCode": true,
        });

        if let Some(program) = program {
            launch["program"] = json!(program);
        }
        if let Some(module) = module {
            launch["module"] = json!(module);
        }
        if let Some(cwd) = &options.cwd {
            launch["cwd"] = json!(cwd);
        }
        if !options.env.is_empty() {
            launch["env"] = json!(options.env);
        }

        launch
    }
}

impl DebugAdapterLogger for PythonAdapter {
    fn language_name(&self) -> &str {
        "Python"
    }

    fn transport_type(&self) -> &str {
        "TCP Socket"
    }

    fn adapter_id(&self) -> &str {
        "debugpy"
    }

    fn command_line(&self) -> String {
        "python -m debugpy.adapter --port <PORT> --host 127.0.0.1".to_string()
    }

    fn log_spawn_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "debugpy", %error, "failed to spawn debugpy adapter");
        error!("possible causes: debugpy not installed (pip install debugpy), or python not on PATH");
    }

    fn log_connection_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "debugpy", %error, "failed to connect to debugpy adapter");
    }

    fn log_init_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "debugpy", %error, "DAP initialization handshake failed");
    }
}
