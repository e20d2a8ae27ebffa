//! `java-debug-server` adapter.
//!
//! Decision recorded in DESIGN.md: one `java-debug-server` process per
//! Session, no pooling, even though the upstream server is commonly run
//! as a long-lived language-server component. The capability set here
//! doesn't preclude a pooled implementation later (a pooled `JavaAdapter`
//! would simply skip the spawn step in `build_launch_command` in favor of
//! checking out a connection from a pool), it's just not what this crate
//! does today.

use super::logging::DebugAdapterLogger;
use super::{Adapter, LaunchOptions, ProcessCommand, SourcePathResolution, Target};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::error;

pub struct JavaAdapter;

impl JavaAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Locate the java-debug-server plugin jar, checking the locations a
    /// manual install or container image typically uses.
    pub fn server_jar_path() -> Result<String> {
        let locations = [
            "/usr/local/lib/java-debug/com.microsoft.java.debug.plugin.jar",
            "~/.java-debug/com.microsoft.java.debug.plugin.jar",
        ];

        for location in locations {
            let expanded = shellexpand::tilde(location);
            if std::path::Path::new(expanded.as_ref()).exists() {
                return Ok(expanded.to_string());
            }
        }

        Err(Error::AdapterNotInstalled(
            "java-debug-server (com.microsoft.java.debug.plugin.jar not found)".to_string(),
        ))
    }
}

impl Default for JavaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for JavaAdapter {
    fn language(&self) -> &'static str {
        "java"
    }

    fn adapter_id(&self) -> &'static str {
        "java-debug-server"
    }

    fn build_launch_command(&self, target: &Target, port: u16) -> Result<ProcessCommand> {
        if matches!(target, Target::Remote { .. }) {
            return Err(Error::TargetInvalid(
                "java-debug-server is spawned even for attach targets; use Adapter::attach instead".into(),
            ));
        }

        let server_jar = Self::server_jar_path()?;
        Ok(ProcessCommand {
            command: "java".to_string(),
            args: vec![
                "-cp".to_string(),
                server_jar,
                "com.microsoft.java.debug.plugin.internal.DebugProxy".to_string(),
                port.to_string(),
            ],
            env: HashMap::new(),
            cwd: None,
        })
    }

    fn process_name_pattern(&self) -> &'static str {
        "com.microsoft.java.debug.plugin.internal.DebugProxy"
    }

    fn launch_configuration(&self, target: &Target, options: &LaunchOptions) -> Value {
        let main_class = match target {
            Target::File { path, .. } | Target::TestInvocation { command: path, .. } => {
                infer_main_class(path)
            }
            Target::Module { name, .. } => name.clone(),
            Target::Pid(_) | Target::Remote { .. } => String::new(),
        };

        let mut launch = json!({
            "type": "java",
            "request": "launch",
            "mainClass": main_class,
            "args": "",
            "stopOnEntry": options.stop_on_entry,
            "console": "internalConsole",
        });

        if let Some(cwd) = &options.cwd {
            launch["cwd"] = json!(cwd);
            launch["projectName"] = json!(cwd);
        }
        if !options.env.is_empty() {
            launch["env"] = json!(options.env);
        }

        launch
    }

    fn resolve_source_path(&self, reported: &str) -> SourcePathResolution {
        super::source_path::resolve_generic(reported)
    }
}

/// java-debug-server wants a fully qualified class name, not a file path;
/// this is a best-effort guess from a `.java` source file's path, good
/// enough for the common `src/main/java/<package>/<Class>.java` layout.
fn infer_main_class(source_path: &str) -> String {
    let path = std::path::Path::new(source_path);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    let package = path
        .to_str()
        .and_then(|p| p.split("src/main/java/").nth(1))
        .map(|rest| rest.trim_end_matches(&format!("/{stem}.java")).replace('/', "."));

    match package {
        Some(package) if !package.is_empty() => format!("{package}.{stem}"),
        _ => stem.to_string(),
    }
}

impl DebugAdapterLogger for JavaAdapter {
    fn language_name(&self) -> &str {
        "Java"
    }

    fn transport_type(&self) -> &str {
        "TCP Socket"
    }

    fn adapter_id(&self) -> &str {
        "java-debug-server"
    }

    fn command_line(&self) -> String {
        "java -cp <plugin.jar> com.microsoft.java.debug.plugin.internal.DebugProxy <PORT>".to_string()
    }

    fn log_spawn_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "java-debug-server", %error, "failed to spawn java-debug-server");
        error!("possible causes: java-debug-server plugin jar not installed, or java not on PATH");
    }

    fn log_connection_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "java-debug-server", %error, "failed to connect to java-debug-server");
    }

    fn log_init_error(&self, error: &dyn std::error::Error) {
        error!(adapter = "java-debug-server", %error, "DAP initialization handshake failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_launch_command_rejects_attach_targets() {
        let adapter = JavaAdapter::new();
        let target = Target::Remote {
            host: "127.0.0.1".to_string(),
            port: 5005,
        };
        let result = adapter.build_launch_command(&target, 8000);
        assert!(matches!(result, Err(Error::TargetInvalid(_))));
    }

    #[test]
    fn infer_main_class_from_maven_layout() {
        let main_class = infer_main_class("/repo/src/main/java/com/example/app/Main.java");
        assert_eq!(main_class, "com.example.app.Main");
    }

    #[test]
    fn infer_main_class_falls_back_to_bare_stem() {
        let main_class = infer_main_class("/tmp/Scratch.java");
        assert_eq!(main_class, "Scratch");
    }

    #[test]
    fn launch_configuration_sets_main_class() {
        let adapter = JavaAdapter::new();
        let target = Target::File {
            path: "/repo/src/main/java/com/example/Main.java".to_string(),
            args: vec![],
        };
        let config = adapter.launch_configuration(&target, &LaunchOptions::default());
        assert_eq!(config["type"], "java");
        assert_eq!(config["mainClass"], "com.example.Main");
    }

    #[test]
    fn resolve_source_path_recognizes_jar_members() {
        let adapter = JavaAdapter::new();
        let resolution = adapter.resolve_source_path("/libs/app.jar!/com/example/Helper.java");
        assert_eq!(
            resolution,
            SourcePathResolution::ArchiveMember {
                archive: "/libs/app.jar".to_string(),
                member: "com/example/Helper.java".to_string(),
            }
        );
    }
}
