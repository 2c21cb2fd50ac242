//! Datagram classification
//!
//! A datagram is either a plain-text control sentinel (`CONNECT:<id>`,
//! `HEARTBEAT`, ...) or a JSON envelope handled by [`protocol`](super::protocol).
//! Each datagram is self-delimiting and decodes without transport framing.

use bytes::Bytes;

use crate::game::movement::CharacterClass;

use super::protocol::{self, DecodeError, Decoded, EncodeError, WireMessage};

pub const CONNECT_PREFIX: &str = "CONNECT:";
pub const CONNECT_ACK: &str = "CONNECT_ACK:SUCCESS";
pub const CONNECT_DENIED_PREFIX: &str = "CONNECT_DENIED:";
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const HEARTBEAT_ACK: &str = "HEARTBEAT_ACK";
pub const DISCONNECT: &str = "DISCONNECT";

/// Longest identity accepted in a connect sentinel
pub const MAX_IDENTITY_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect {
        identity: String,
        class: Option<CharacterClass>,
    },
    ConnectAck,
    ConnectDenied {
        reason: String,
    },
    Heartbeat,
    HeartbeatAck,
    Disconnect {
        detail: Option<String>,
    },
    Message(WireMessage),
    /// Recognisable framing with a type this build does not handle
    Unknown {
        kind: String,
    },
}

impl Packet {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(data).map_err(|_| DecodeError::NotText)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(DecodeError::Empty);
        }

        if text.starts_with('{') {
            return match protocol::decode(text.as_bytes())? {
                Decoded::Message(message) => Ok(Packet::Message(message)),
                Decoded::Unknown { message_type } => Ok(Packet::Unknown { kind: message_type }),
            };
        }

        parse_control(text)
    }

    pub fn to_bytes(&self) -> Result<Bytes, EncodeError> {
        let text = match self {
            Packet::Connect {
                identity,
                class: Some(class),
            } => format!("{CONNECT_PREFIX}{identity}:{class}"),
            Packet::Connect {
                identity,
                class: None,
            } => format!("{CONNECT_PREFIX}{identity}"),
            Packet::ConnectAck => CONNECT_ACK.to_string(),
            Packet::ConnectDenied { reason } => format!("{CONNECT_DENIED_PREFIX}{reason}"),
            Packet::Heartbeat => HEARTBEAT.to_string(),
            Packet::HeartbeatAck => HEARTBEAT_ACK.to_string(),
            Packet::Disconnect { detail: Some(detail) } => format!("{DISCONNECT}:{detail}"),
            Packet::Disconnect { detail: None } => DISCONNECT.to_string(),
            Packet::Message(message) => return Ok(Bytes::from(protocol::encode(message)?)),
            Packet::Unknown { kind } => kind.clone(),
        };
        Ok(Bytes::from(text))
    }
}

fn parse_control(text: &str) -> Result<Packet, DecodeError> {
    if text == CONNECT_ACK {
        return Ok(Packet::ConnectAck);
    }
    if let Some(reason) = text.strip_prefix(CONNECT_DENIED_PREFIX) {
        return Ok(Packet::ConnectDenied {
            reason: reason.to_string(),
        });
    }
    if let Some(rest) = text.strip_prefix(CONNECT_PREFIX) {
        return parse_connect(rest);
    }
    if text == HEARTBEAT_ACK {
        return Ok(Packet::HeartbeatAck);
    }
    if text == HEARTBEAT {
        return Ok(Packet::Heartbeat);
    }
    if text == DISCONNECT {
        return Ok(Packet::Disconnect { detail: None });
    }
    if let Some(detail) = text.strip_prefix(DISCONNECT).and_then(|r| r.strip_prefix(':')) {
        return Ok(Packet::Disconnect {
            detail: Some(detail.to_string()),
        });
    }

    let kind: String = text
        .split(|c: char| c == ':' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .chars()
        .take(32)
        .collect();
    Ok(Packet::Unknown { kind })
}

/// `CONNECT:<identity>` or `CONNECT:<identity>:<class>`
fn parse_connect(rest: &str) -> Result<Packet, DecodeError> {
    let (identity, class) = match rest.rsplit_once(':') {
        Some((identity, class)) => {
            let class = class
                .parse::<CharacterClass>()
                .map_err(|e| DecodeError::InvalidControl(e.to_string()))?;
            (identity, Some(class))
        }
        None => (rest, None),
    };

    validate_identity(identity)?;

    Ok(Packet::Connect {
        identity: identity.to_string(),
        class,
    })
}

pub fn validate_identity(identity: &str) -> Result<(), DecodeError> {
    if identity.is_empty() {
        return Err(DecodeError::InvalidControl("empty identity".to_string()));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(DecodeError::InvalidControl("identity too long".to_string()));
    }
    if identity
        .chars()
        .any(|c| c == ':' || c.is_control() || c.is_whitespace())
    {
        return Err(DecodeError::InvalidControl(
            "identity contains ':', whitespace or control characters".to_string(),
        ));
    }
    Ok(())
}
