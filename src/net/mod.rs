//! Wire format, UDP sessions and the client transport

pub mod client;
pub mod packet;
pub mod protocol;
pub mod session;

pub use client::{ClientError, ClientEvent, NetworkClient};
pub use packet::Packet;
pub use protocol::{DecodeError, InputSample, PositionUpdate, StateSnapshot, WireMessage};
pub use session::{SessionManager, SessionSettings};
