//! The duplex channel: wire protocol, lifecycle, and WebSocket transport.

pub mod endpoint;
pub mod lifecycle;
pub mod protocol;
pub mod transport;

pub use lifecycle::{ChannelState, CloseReason};
pub use transport::{Transport, TransportCommand, TransportEvent, TransportPeer};
