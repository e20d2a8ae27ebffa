//! Consistent lifecycle and error logging across every language adapter.
//!
//! Two tiers: the trait methods here decide *what* and *when* to log;
//! each adapter's metadata methods supply the language-specific *how*.
//! Every adapter logs selection, transport init, spawn, connection, and
//! shutdown in the same order, so the emitted trace reads the same
//! regardless of which language is being debugged.

use std::error::Error;
use tracing::{debug, info};

pub trait DebugAdapterLogger {
    fn language_name(&self) -> &str;
    fn transport_type(&self) -> &str;
    fn adapter_id(&self) -> &str;
    fn command_line(&self) -> String;

    fn requires_workaround(&self) -> bool {
        false
    }

    fn workaround_reason(&self) -> Option<&str> {
        None
    }

    fn log_selection(&self) {
        info!(
            language = self.language_name(),
            adapter = self.adapter_id(),
            transport = self.transport_type(),
            command = %self.command_line(),
            "adapter selected"
        );
        if self.requires_workaround() {
            info!(
                language = self.language_name(),
                reason = self.workaround_reason().unwrap_or("required"),
                "workaround active"
            );
        }
    }

    fn log_spawn_attempt(&self) {
        info!(language = self.language_name(), "spawning adapter process");
        debug!(language = self.language_name(), command = %self.command_line(), "spawn command");
    }

    fn log_connection_success(&self) {
        info!(language = self.language_name(), "adapter connected and ready");
    }

    fn log_shutdown(&self) {
        info!(language = self.language_name(), "shutting down adapter");
    }

    fn log_spawn_error(&self, error: &dyn Error);
    fn log_connection_error(&self, error: &dyn Error);
    fn log_init_error(&self, error: &dyn Error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::error;

    struct MockAdapter;

    impl DebugAdapterLogger for MockAdapter {
        fn language_name(&self) -> &str {
            "Test"
        }
        fn transport_type(&self) -> &str {
            "TCP"
        }
        fn adapter_id(&self) -> &str {
            "mock-adapter"
        }
        fn command_line(&self) -> String {
            "mock-command arg1 arg2".to_string()
        }
        fn log_spawn_error(&self, _error: &dyn Error) {
            error!("mock spawn error");
        }
        fn log_connection_error(&self, _error: &dyn Error) {
            error!("mock connection error");
        }
        fn log_init_error(&self, _error: &dyn Error) {
            error!("mock init error");
        }
    }

    #[test]
    fn metadata_methods_report_configured_values() {
        let adapter = MockAdapter;
        assert_eq!(adapter.language_name(), "Test");
        assert_eq!(adapter.transport_type(), "TCP");
        assert_eq!(adapter.adapter_id(), "mock-adapter");
    }

    #[test]
    fn default_requires_no_workaround() {
        let adapter = MockAdapter;
        assert!(!adapter.requires_workaround());
        assert!(adapter.workaround_reason().is_none());
    }

    #[test]
    fn lifecycle_methods_do_not_panic() {
        let adapter = MockAdapter;
        adapter.log_selection();
        adapter.log_spawn_attempt();
        adapter.log_connection_success();
        adapter.log_shutdown();
    }
}
