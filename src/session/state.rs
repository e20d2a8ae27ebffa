//! The Session state machine's data shapes: the discriminated union from
//! the initialization protocol, and the per-file breakpoint bookkeeping
//! that backs the "SetBreakpoints is a full replacement" invariant.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseLocation {
    pub source_path: Option<String>,
    pub line: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    New,
    Connecting,
    Initializing,
    Configuring,
    Running,
    Paused {
        thread_id: i64,
        reason: String,
        location: Option<PauseLocation>,
        /// Which pause this is, counting from 1. Every frame id and
        /// variablesReference `Session` hands out is stamped with the
        /// epoch of the pause that produced it, so a reference held past
        /// the next resume can be told apart from a fresh one even when
        /// the adapter happens to reuse the same raw id.
        epoch: u64,
    },
    Terminating,
    Terminated {
        reason: String,
    },
}

impl SessionState {
    pub fn is_paused(&self) -> bool {
        matches!(self, SessionState::Paused { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::New => "new",
            SessionState::Connecting => "connecting",
            SessionState::Initializing => "initializing",
            SessionState::Configuring => "configuring",
            SessionState::Running => "running",
            SessionState::Paused { .. } => "paused",
            SessionState::Terminating => "terminating",
            SessionState::Terminated { .. } => "terminated",
        }
    }
}

/// A caller-submitted breakpoint request: compared structurally for
/// identity when a file's breakpoint list is rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointSpec {
    pub source_path: String,
    pub line: i64,
    pub column: Option<i64>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

/// A resolved breakpoint: the spec plus what the adapter reported back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub spec: BreakpointSpec,
    pub id: Option<i64>,
    pub verified: bool,
    pub actual_line: Option<i64>,
    pub message: Option<String>,
}

/// Per-session map from absolute source path to the ordered breakpoint
/// list currently in force for that file. The DAP `setBreakpoints`
/// request is a full replacement, so this map *is* the adapter's view
/// once a successful exchange completes.
#[derive(Debug, Clone, Default)]
pub struct BreakpointMap {
    by_file: HashMap<String, Vec<Breakpoint>>,
}

impl BreakpointMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn specs_for(&self, path: &str) -> Vec<BreakpointSpec> {
        self.by_file
            .get(path)
            .map(|bps| bps.iter().map(|b| b.spec.clone()).collect())
            .unwrap_or_default()
    }

    pub fn replace_file(&mut self, path: &str, breakpoints: Vec<Breakpoint>) {
        if breakpoints.is_empty() {
            self.by_file.remove(path);
        } else {
            self.by_file.insert(path.to_string(), breakpoints);
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_file.values().flatten()
    }

    pub fn by_id(&self, id: i64) -> Option<&Breakpoint> {
        self.all().find(|b| b.id == Some(id))
    }

    pub fn files(&self) -> impl Iterator<Item = &String> {
        self.by_file.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_state_is_new() {
        assert_eq!(SessionState::New.label(), "new");
        assert!(!SessionState::New.is_paused());
    }

    #[test]
    fn paused_state_reports_is_paused() {
        let state = SessionState::Paused {
            thread_id: 1,
            reason: "breakpoint".to_string(),
            location: None,
            epoch: 1,
        };
        assert!(state.is_paused());
        assert!(!state.is_terminal());
    }

    #[test]
    fn terminated_state_is_terminal() {
        let state = SessionState::Terminated {
            reason: "normal exit".to_string(),
        };
        assert!(state.is_terminal());
    }

    #[test]
    fn breakpoint_map_replaces_file_list_wholesale() {
        let mut map = BreakpointMap::new();
        let spec = BreakpointSpec {
            source_path: "test.py".to_string(),
            line: 10,
            column: None,
            condition: None,
            hit_condition: None,
            log_message: None,
        };
        map.replace_file(
            "test.py",
            vec![Breakpoint {
                spec: spec.clone(),
                id: Some(1),
                verified: true,
                actual_line: Some(10),
                message: None,
            }],
        );
        assert_eq!(map.specs_for("test.py"), vec![spec]);

        map.replace_file("test.py", vec![]);
        assert!(map.specs_for("test.py").is_empty());
    }

    #[test]
    fn breakpoint_map_looks_up_by_id() {
        let mut map = BreakpointMap::new();
        map.replace_file(
            "test.py",
            vec![Breakpoint {
                spec: BreakpointSpec {
                    source_path: "test.py".to_string(),
                    line: 5,
                    column: None,
                    condition: None,
                    hit_condition: None,
                    log_message: None,
                },
                id: Some(42),
                verified: true,
                actual_line: Some(5),
                message: None,
            }],
        );
        assert!(map.by_id(42).is_some());
        assert!(map.by_id(99).is_none());
    }
}
