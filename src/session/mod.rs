//! Session lifecycle: the state machine tying an adapter process to a DAP
//! client connection, and the data shapes backing it.

pub mod session;
pub mod state;

pub use session::{BreakpointTiming, ClearBreakpointsFilter, Session, StepGranularity};
pub use state::{Breakpoint, BreakpointMap, BreakpointSpec, PauseLocation, SessionState};
