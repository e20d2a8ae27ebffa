pub mod client;
pub mod socket_helper;
pub mod transport;
pub mod transport_trait;
pub mod types;

pub use client::{ClientState, DapClient, PendingHandle, ReverseRequestOutcome, RetryPolicy};
pub use socket_helper::{connect_with_retry, find_free_port, find_free_port_in_range};
pub use transport::DapTransport;
pub use transport_trait::DapTransportTrait;
