//! Network subsystem: TCP streaming sessions and UDP discovery

pub mod discovery;
pub mod handshake;
pub mod registry;
pub mod server;
pub mod session;

pub use discovery::DiscoveryBroadcaster;
pub use handshake::{perform_handshake, Authorization, HandshakeOutcome};
pub use registry::{Registration, SessionInfo, SessionRegistry};
pub use server::AudioServer;
pub use session::{CloseReason, Session, SessionContext, SessionState, SessionSummary};
