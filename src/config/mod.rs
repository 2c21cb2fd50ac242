//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::movement::Arena;

/// Movement tuning shared by the client prediction and the server authority.
///
/// Both sides must be built from the same values or prediction will drift
/// from the server's judgment even on a perfect link.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MovementConfig {
    /// Units per second before the class speed modifier is applied
    pub base_speed: f32,
    /// Playable area and floor
    pub arena: Arena,
    /// Multiplier on the nominal distance before a move counts as implausible
    pub anti_cheat_tolerance: f32,
    /// Largest tick duration that produces motion, on both client and server
    pub max_input_dt: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            base_speed: 5.0,
            arena: Arena::default(),
            anti_cheat_tolerance: 1.5,
            max_input_dt: 0.25,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// UDP game traffic binding address
    pub game_addr: SocketAddr,
    /// Operator HTTP binding address (None disables the HTTP surface)
    pub http_addr: Option<SocketAddr>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Simulation and broadcast rate in Hz
    pub tick_rate: u32,
    /// Silence after which a connection and its actor are evicted
    pub heartbeat_timeout: Duration,
    /// Connection table capacity
    pub max_clients: usize,
    /// Datagrams per second accepted from a single connection
    pub input_rate_limit: u32,

    pub movement: MovementConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            game_addr: SocketAddr::from(([0, 0, 0, 0], 7777)),
            http_addr: Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
            log_level: "info".to_string(),
            tick_rate: 60,
            heartbeat_timeout: Duration::from_secs(30),
            max_clients: 64,
            input_rate_limit: 120,
            movement: MovementConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Hosted deployments hand us a bare port in GamePort
        let game_addr = if let Ok(port) = env::var("GamePort") {
            format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress("GamePort"))?
        } else {
            match env::var("GAME_ADDR") {
                Ok(addr) => addr
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddress("GAME_ADDR"))?,
                Err(_) => defaults.game_addr,
            }
        };

        let http_addr = match env::var("HTTP_ADDR") {
            Ok(addr) if addr.trim().is_empty() => None,
            Ok(addr) => Some(
                addr.parse()
                    .map_err(|_| ConfigError::InvalidAddress("HTTP_ADDR"))?,
            ),
            Err(_) => defaults.http_addr,
        };

        let movement = MovementConfig {
            base_speed: parse_var("BASE_SPEED", defaults.movement.base_speed)?,
            arena: Arena::square(parse_var("ARENA_SIZE", defaults.movement.arena.size)?),
            anti_cheat_tolerance: parse_var(
                "ANTI_CHEAT_TOLERANCE",
                defaults.movement.anti_cheat_tolerance,
            )?,
            max_input_dt: parse_var("MAX_INPUT_DT", defaults.movement.max_input_dt)?,
        };

        let config = Self {
            game_addr,
            http_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            tick_rate: parse_var("TICK_RATE", defaults.tick_rate)?,
            heartbeat_timeout: Duration::from_secs(parse_var(
                "HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout.as_secs(),
            )?),
            max_clients: parse_var("MAX_CLIENTS", defaults.max_clients)?,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", defaults.input_rate_limit)?,
            movement,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::Invalid("HEARTBEAT_TIMEOUT_SECS"));
        }
        if !(self.movement.base_speed.is_finite() && self.movement.base_speed > 0.0) {
            return Err(ConfigError::Invalid("BASE_SPEED"));
        }
        if !(self.movement.anti_cheat_tolerance.is_finite()
            && self.movement.anti_cheat_tolerance >= 1.0)
        {
            return Err(ConfigError::Invalid("ANTI_CHEAT_TOLERANCE"));
        }
        if !(self.movement.max_input_dt.is_finite() && self.movement.max_input_dt > 0.0) {
            return Err(ConfigError::Invalid("MAX_INPUT_DT"));
        }
        if !(self.movement.arena.size.is_finite()
            && self.movement.arena.size > 2.0 * self.movement.arena.actor_radius)
        {
            return Err(ConfigError::Invalid("ARENA_SIZE"));
        }
        Ok(())
    }

    /// Duration of one simulation tick
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid address format in {0}")]
    InvalidAddress(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_period(), Duration::from_secs_f64(1.0 / 60.0));
    }

    #[test]
    fn tolerance_below_one_is_rejected() {
        let mut config = Config::default();
        config.movement.anti_cheat_tolerance = 0.9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("ANTI_CHEAT_TOLERANCE"))
        ));
    }

    #[test]
    fn zero_tick_rate_is_rejected() {
        let config = Config {
            tick_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
