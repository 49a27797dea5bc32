//! Blocking connection manager over the event-driven central adapter.

mod connection;
mod pending;
mod state;

pub use connection::ConnectionManager;
pub use state::{ConnectionState, OperationKind};
