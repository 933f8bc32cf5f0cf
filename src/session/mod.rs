//! Peer sessions
//!
//! A [`ConnectionSession`] tracks one browser peer from offer to teardown;
//! the [`SessionRegistry`] holds every live one.

pub mod command;
pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod state;

pub use command::ControlCommand;
pub use connection::{ConnectionSession, SessionContext, SessionInfo};
pub use registry::{SessionRegistry, StopOutcome};
pub use state::SessionState;
