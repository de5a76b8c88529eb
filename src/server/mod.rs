//! TCP side of the service: the accept loop and per-device connections.

pub mod connection;
pub mod listener;

pub use connection::{handle_connection, ConnectionSettings};
pub use listener::{Listener, ServerHandle};

/// Written back once for every record that decodes.
pub const ACK: u8 = 0x06;
