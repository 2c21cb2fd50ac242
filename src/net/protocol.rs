//! Wire message definitions
//! These are the JSON envelopes exchanged once a session is established

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::game::movement::MovementFlags;

pub const MSG_PLAYER_INPUT: &str = "PlayerInput";
pub const MSG_PLAYER_POSITION: &str = "PlayerPosition";
pub const MSG_GAME_STATE_UPDATE: &str = "GameStateUpdate";

/// One client tick's movement intent (client -> server)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InputSample {
    /// Client-owned, starts at 1, strictly increasing
    pub sequence_number: u32,
    /// Client-local clock in seconds, informational only
    #[serde(default)]
    pub timestamp: f32,
    #[serde(flatten)]
    pub flags: MovementFlags,
    /// Yaw in radians
    #[serde(rename = "RotationY")]
    pub yaw: f32,
    /// Pitch in radians
    #[serde(rename = "RotationX")]
    pub pitch: f32,
    /// Tick duration in seconds
    pub delta_time: f32,
}

/// Authoritative transform of one actor (server -> client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionUpdate {
    #[serde(default)]
    pub sequence_number: u32,
    #[serde(default)]
    pub timestamp: f32,
    pub player_id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(rename = "RotationY")]
    pub yaw: f32,
    #[serde(rename = "RotationX")]
    pub pitch: f32,
    /// Last input sequence the server has processed for this actor
    pub input_sequence: u32,
}

impl PositionUpdate {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

/// Every live actor at one server tick (server -> all clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateSnapshot {
    #[serde(default)]
    pub sequence_number: u32,
    #[serde(default)]
    pub timestamp: f32,
    pub player_positions: Vec<PositionUpdate>,
    /// Server clock, seconds since UTC midnight
    pub server_time: f32,
}

impl StateSnapshot {
    pub fn find(&self, player_id: &str) -> Option<&PositionUpdate> {
        self.player_positions
            .iter()
            .find(|p| p.player_id == player_id)
    }
}

/// Messages with a `MessageType` discriminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "MessageType")]
pub enum WireMessage {
    #[serde(rename = "PlayerInput")]
    Input(InputSample),
    #[serde(rename = "PlayerPosition")]
    PositionUpdate(PositionUpdate),
    #[serde(rename = "GameStateUpdate")]
    StateSnapshot(StateSnapshot),
}

impl WireMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            WireMessage::Input(_) => MSG_PLAYER_INPUT,
            WireMessage::PositionUpdate(_) => MSG_PLAYER_POSITION,
            WireMessage::StateSnapshot(_) => MSG_GAME_STATE_UPDATE,
        }
    }
}

/// Result of decoding a JSON envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(WireMessage),
    /// Well-formed envelope with a discriminator this build does not know
    Unknown { message_type: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("datagram is not valid UTF-8 text")]
    NotText,
    #[error("envelope has no MessageType field")]
    MissingType,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("malformed control message: {0}")]
    InvalidControl(String),
}

#[derive(Debug, thiserror::Error)]
#[error("serialization failed: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "MessageType", default)]
    message_type: Option<String>,
}

pub fn encode(message: &WireMessage) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode a JSON envelope.
///
/// The discriminator is read first; only a known type is parsed further, and
/// a payload that does not match its declared shape is an error rather than
/// a partially filled message.
pub fn decode(data: &[u8]) -> Result<Decoded, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let envelope: Envelope = serde_json::from_slice(data)?;
    let message_type = envelope.message_type.ok_or(DecodeError::MissingType)?;

    match message_type.as_str() {
        MSG_PLAYER_INPUT | MSG_PLAYER_POSITION | MSG_GAME_STATE_UPDATE => {
            Ok(Decoded::Message(serde_json::from_slice(data)?))
        }
        _ => Ok(Decoded::Unknown { message_type }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> InputSample {
        InputSample {
            sequence_number: 7,
            timestamp: 1.5,
            flags: MovementFlags {
                forward: true,
                right: true,
                ..Default::default()
            },
            yaw: 0.25,
            pitch: -0.1,
            delta_time: 1.0 / 60.0,
        }
    }

    #[test]
    fn input_uses_flat_pascal_case_fields() {
        let bytes = encode(&WireMessage::Input(sample_input())).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["MessageType"], "PlayerInput");
        assert_eq!(value["SequenceNumber"], 7);
        assert_eq!(value["MoveForward"], true);
        assert_eq!(value["MoveBackward"], false);
        assert_eq!(value["MoveRight"], true);
        assert!(value.get("RotationY").is_some());
        assert!(value.get("DeltaTime").is_some());
        assert!(value.get("flags").is_none());
    }

    #[test]
    fn decodes_hand_written_input() {
        let json = br#"{
            "MessageType": "PlayerInput",
            "SequenceNumber": 3,
            "Timestamp": 0.5,
            "MoveForward": true, "MoveBackward": false,
            "MoveLeft": false, "MoveRight": false,
            "MoveUp": false, "MoveDown": false,
            "RotationY": 0.0, "RotationX": 0.0,
            "DeltaTime": 0.1
        }"#;

        match decode(json).unwrap() {
            Decoded::Message(WireMessage::Input(input)) => {
                assert_eq!(input.sequence_number, 3);
                assert!(input.flags.forward);
                assert!((input.delta_time - 0.1).abs() < 1e-6);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn snapshot_survives_encoding() {
        let snapshot = StateSnapshot {
            sequence_number: 12,
            timestamp: 100.0,
            player_positions: vec![PositionUpdate {
                sequence_number: 0,
                timestamp: 100.0,
                player_id: "alice".to_string(),
                x: 1.0,
                y: 0.51,
                z: -2.0,
                yaw: 0.3,
                pitch: 0.0,
                input_sequence: 4,
            }],
            server_time: 100.0,
        };
        let bytes = encode(&WireMessage::StateSnapshot(snapshot.clone())).unwrap();
        assert_eq!(
            decode(&bytes).unwrap(),
            Decoded::Message(WireMessage::StateSnapshot(snapshot))
        );
    }

    #[test]
    fn unknown_discriminator_is_typed_not_an_error() {
        let result = decode(br#"{"MessageType":"SpellCast","SpellId":4}"#).unwrap();
        assert_eq!(
            result,
            Decoded::Unknown {
                message_type: "SpellCast".to_string()
            }
        );
    }

    #[test]
    fn missing_discriminator_is_an_error() {
        assert!(matches!(
            decode(br#"{"SequenceNumber":1}"#),
            Err(DecodeError::MissingType)
        ));
    }

    #[test]
    fn truncated_or_mistyped_payloads_are_errors() {
        assert!(matches!(
            decode(br#"{"MessageType":"PlayerInput","SequenceNumber":1"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"MessageType":"PlayerInput","SequenceNumber":"one"}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"{"MessageType":"PlayerPosition","X":1.0}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(decode(b""), Err(DecodeError::Empty)));
    }
}
