use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::connection::Frame;

pub type PlayerId = String;

pub const DEFAULT_FACING: &str = "idle";

/// Last known position and orientation of one connected player.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayerState {
    pub id: PlayerId,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "direction")]
    pub facing: String,
}

impl PlayerState {
    /// State assigned to a player the moment it registers.
    pub fn spawn(id: PlayerId) -> Self {
        Self {
            id,
            x: 0.0,
            y: 0.0,
            facing: DEFAULT_FACING.to_string(),
        }
    }
}

/// Events a client may send. Anything else on the wire is discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    PlayerMoved { x: f64, y: f64, facing: String },
}

/// Events the hub sends, serialised as `{ "event": ..., "data": ... }`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    CurrentPlayers {
        players: BTreeMap<PlayerId, PlayerState>,
        #[serde(rename = "myId")]
        my_id: PlayerId,
    },
    PlayerJoined(PlayerState),
    PlayerMoved(PlayerState),
    PlayerLeft {
        id: PlayerId,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::CurrentPlayers { .. } => "current_players",
            ServerEvent::PlayerJoined(_) => "player_joined",
            ServerEvent::PlayerMoved(_) => "player_moved",
            ServerEvent::PlayerLeft { .. } => "player_left",
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<Frame> {
        serde_json::to_string(self).map(Frame::Text)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("binary frame is not valid UTF-8")]
    NotUtf8(#[source] std::str::Utf8Error),
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("malformed `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct MovePayload {
    x: f64,
    y: f64,
    direction: String,
}

/// Decodes one inbound frame into a typed client event.
pub fn decode_frame(frame: &Frame) -> Result<ClientEvent, DecodeError> {
    match frame {
        Frame::Text(text) => decode(text),
        Frame::Binary(bytes) => decode(std::str::from_utf8(bytes).map_err(DecodeError::NotUtf8)?),
    }
}

pub fn decode(text: &str) -> Result<ClientEvent, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Envelope)?;

    match envelope.event.as_str() {
        "player_moved" => {
            let payload: MovePayload =
                serde_json::from_value(envelope.data).map_err(|source| DecodeError::Payload {
                    kind: envelope.event.clone(),
                    source,
                })?;
            Ok(ClientEvent::PlayerMoved {
                x: payload.x,
                y: payload.y,
                facing: payload.direction,
            })
        }
        _ => Err(DecodeError::UnknownKind(envelope.event)),
    }
}
