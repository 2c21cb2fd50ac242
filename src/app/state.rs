//! Application state shared across the UDP session and HTTP routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::authority::MovementAuthority;
use crate::net::session::{SessionManager, SessionSettings};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authority: Arc<MovementAuthority>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let authority = Arc::new(MovementAuthority::new(config.movement));
        let sessions = Arc::new(SessionManager::new(
            SessionSettings::from_config(&config),
            authority.clone(),
        ));

        Self {
            config,
            authority,
            sessions,
        }
    }
}
