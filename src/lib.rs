//! Axiom Sync - authoritative movement synchronisation over UDP
//!
//! - `game`: shared movement integration, the server authority and client prediction
//! - `net`: wire codec, session manager and the client transport
//! - `http`: operator endpoints

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod net;
pub mod util;
