//! Process-environment configuration, centralized so the rest of the crate
//! never calls `std::env::var` ad hoc and tests can build a config without
//! touching the real environment.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT_RANGE_START: u16 = 9229;
const DEFAULT_PORT_RANGE_END: u16 = 9300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Runtime configuration read from the environment variables documented
/// in the adapter wire-protocol section: `AIDB_LOG_LEVEL`,
/// `AIDB_ADAPTER_TRACE`, `AIDB_PORT_RANGE_START`/`_END`,
/// `AIDB_DAP_REQUEST_WAIT_TIMEOUT`, `AIDB_MAX_FRAME_SIZE`,
/// `AIDB_<LANG>_ADAPTER_PATH`.
#[derive(Debug, Clone)]
pub struct AidbConfig {
    pub log_level: String,
    pub adapter_trace: bool,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub request_timeout: Duration,
    /// Upper bound on a single frame's `Content-Length`, in bytes. A
    /// frame whose declared length exceeds this is rejected with
    /// `Error::ProtocolError` before the body is read, so a misbehaving
    /// or adversarial adapter can't make the client allocate an
    /// unbounded buffer.
    pub max_frame_size: usize,
    adapter_path_overrides: Vec<(String, PathBuf)>,
}

impl Default for AidbConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            adapter_trace: false,
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            adapter_path_overrides: Vec::new(),
        }
    }
}

impl AidbConfig {
    /// Build configuration from the process environment. Unset or
    /// unparseable variables fall back to documented defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("AIDB_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(trace) = std::env::var("AIDB_ADAPTER_TRACE") {
            config.adapter_trace = trace == "1";
        }

        if let Ok(start) = std::env::var("AIDB_PORT_RANGE_START") {
            if let Ok(start) = start.parse() {
                config.port_range_start = start;
            }
        }

        if let Ok(end) = std::env::var("AIDB_PORT_RANGE_END") {
            if let Ok(end) = end.parse() {
                config.port_range_end = end;
            }
        }

        if let Ok(secs) = std::env::var("AIDB_DAP_REQUEST_WAIT_TIMEOUT") {
            if let Ok(secs) = secs.parse() {
                config.request_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(max_frame_size) = std::env::var("AIDB_MAX_FRAME_SIZE") {
            if let Ok(max_frame_size) = max_frame_size.parse() {
                config.max_frame_size = max_frame_size;
            }
        }

        for (key, value) in std::env::vars() {
            if let Some(lang) = key
                .strip_prefix("AIDB_")
                .and_then(|rest| rest.strip_suffix("_ADAPTER_PATH"))
            {
                config
                    .adapter_path_overrides
                    .push((lang.to_lowercase(), PathBuf::from(value)));
            }
        }

        config
    }

    pub fn port_range(&self) -> std::ops::RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }

    /// Explicit override path for a language's adapter binary, e.g. from
    /// `AIDB_PYTHON_ADAPTER_PATH`, overriding the default install
    /// location under `adapter_install_dir`.
    pub fn adapter_path_override(&self, language: &str) -> Option<&PathBuf> {
        self.adapter_path_overrides
            .iter()
            .find(|(lang, _)| lang == language)
            .map(|(_, path)| path)
    }

    /// `$HOME/.aidb/adapters/<language>/`, expanded with `shellexpand`
    /// the way the rest of the crate resolves user-relative paths.
    pub fn adapter_install_dir(&self, language: &str) -> PathBuf {
        let raw = format!("~/.aidb/adapters/{language}");
        let expanded = shellexpand::tilde(&raw);
        PathBuf::from(expanded.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AidbConfig::default();
        assert_eq!(config.port_range_start, DEFAULT_PORT_RANGE_START);
        assert!(config.port_range_end > config.port_range_start);
        assert!(!config.adapter_trace);
    }

    #[test]
    fn adapter_install_dir_expands_home() {
        let config = AidbConfig::default();
        let dir = config.adapter_install_dir("python");
        assert!(dir.ends_with(".aidb/adapters/python"));
        assert!(!dir.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn default_max_frame_size_is_generous_but_bounded() {
        let config = AidbConfig::default();
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.max_frame_size > 0);
    }

    #[test]
    fn port_range_is_inclusive() {
        let config = AidbConfig::default();
        let range = config.port_range();
        assert_eq!(*range.start(), config.port_range_start);
        assert_eq!(*range.end(), config.port_range_end);
    }
}
