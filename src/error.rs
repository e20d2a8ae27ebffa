use std::fmt;
use thiserror::Error;

/// Closed error taxonomy for the debugging runtime.
///
/// Grouped the way callers reason about them: arguments they got wrong,
/// the adapter disagreeing, the process lifecycle falling over, or the
/// wire underneath timing out. A JSON-RPC-style numeric mapping is a
/// façade concern and deliberately does not live here.
#[derive(Debug, Error)]
pub enum Error {
    // --- Caller errors ---
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session {session_id} is in state {current}, cannot {attempted}")]
    InvalidSessionState {
        session_id: String,
        current: String,
        attempted: String,
    },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is not paused")]
    NotPaused,

    #[error("invalid frame reference: {0}")]
    InvalidFrameReference(i64),

    #[error("invalid variable reference: {0}")]
    InvalidVariableReference(i64),

    #[error("capability not supported: {0}")]
    NotSupported(String),

    // --- Adapter / DAP errors ---
    #[error("adapter rejected {command}: {message}")]
    AdapterError { command: String, message: String },

    #[error("unsupported DAP command: {0}")]
    UnsupportedCommand(String),

    #[error("breakpoint not verified: {0}")]
    BreakpointNotVerified(String),

    // --- Lifecycle errors ---
    #[error("adapter not installed: {0}")]
    AdapterNotInstalled(String),

    #[error("failed to spawn adapter process: {0}")]
    SpawnFailed(String),

    #[error("no free port in configured range")]
    PortExhausted,

    #[error("failed to connect to adapter: {0}")]
    ConnectFailed(String),

    #[error("initialization handshake timed out")]
    InitializationTimeout,

    #[error("session terminated")]
    SessionTerminated,

    #[error("target invalid: {0}")]
    TargetInvalid(String),

    // --- Transport / timing errors ---
    #[error("request timed out")]
    Timeout,

    #[error("transport closed")]
    TransportClosed,

    #[error("request cancelled")]
    RequestCancelled,

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse category, useful for façades that want to bucket errors without
/// matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Caller,
    Adapter,
    Lifecycle,
    Transport,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Caller => "caller",
            ErrorCategory::Adapter => "adapter",
            ErrorCategory::Lifecycle => "lifecycle",
            ErrorCategory::Transport => "transport",
        };
        write!(f, "{s}")
    }
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        use Error::*;
        match self {
            InvalidArgument(_)
            | InvalidSessionState { .. }
            | SessionNotFound(_)
            | NotPaused
            | InvalidFrameReference(_)
            | InvalidVariableReference(_)
            | NotSupported(_) => ErrorCategory::Caller,

            AdapterError { .. } | UnsupportedCommand(_) | BreakpointNotVerified(_) => {
                ErrorCategory::Adapter
            }

            AdapterNotInstalled(_)
            | SpawnFailed(_)
            | PortExhausted
            | ConnectFailed(_)
            | InitializationTimeout
            | SessionTerminated
            | TargetInvalid(_) => ErrorCategory::Lifecycle,

            Timeout | TransportClosed | RequestCancelled | ProtocolError(_) | Io(_) | Json(_) => {
                ErrorCategory::Transport
            }
        }
    }

    /// Whether a `send_request` retry loop may retry this failure.
    /// DAP-level `success=false` surfaces as `AdapterError` and is never
    /// retryable; only transport-class failures are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransportClosed | Error::ConnectFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
