//! Transport layer: framed duplex links over TCP, with optional TLS, and
//! the connection manager that owns the listener, dialer and active-link
//! registry (spec §4.5, §4.6).

pub mod connection;
pub mod manager;
pub mod tls;

pub use connection::{PeerConnection, Stream};
pub use manager::ConnectionManager;
