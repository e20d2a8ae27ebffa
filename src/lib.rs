//! A programmatic debugging runtime: drives language debug adapters over
//! the Debug Adapter Protocol and exposes a session-oriented API for
//! launching, breaking, stepping, and inspecting a debuggee.
//!
//! The core is embedded and has no network-facing server of its own. A
//! caller constructs an [`AidbConfig`] and a [`SessionRegistry`], wraps
//! them in a [`DebugService`], and drives sessions through it (or
//! through [`Session`] directly for finer control).

pub mod adapters;
pub mod config;
pub mod dap;
pub mod error;
pub mod registry;
pub mod service;
pub mod session;

pub use config::AidbConfig;
pub use error::{Error, ErrorCategory};
pub use registry::{AdapterConfig, SessionRegistry};
pub use service::DebugService;
pub use session::{Session, SessionState};

pub type Result<T> = std::result::Result<T, Error>;
