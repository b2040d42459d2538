//! Session wiring: outbound capture, inbound dispatch, and the event loop.

pub mod capture;
pub mod messages;
pub mod session;
