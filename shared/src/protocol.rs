//! JSON envelopes exchanged over an upgraded connection.
//!
//! Every application message is `{"type": <kind>, "payload": {...}}`. Inbound
//! messages are decoded in two steps so that a bad envelope, an unknown kind
//! and a malformed payload can each be reported distinctly.

use crate::arena::ArenaMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json")]
    InvalidJson,
    #[error("unknown type {0:?}")]
    UnknownType(String),
    #[error("invalid payload for {kind}")]
    InvalidPayload { kind: &'static str },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloReq {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomCreateReq {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomJoinReq {
    pub room_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomReadyReq {
    pub ready: bool,
}

/// Optional overrides carried by both `room_start` and `room_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomConfigReq {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub win_score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_enemies_on_map: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputReq {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub turn: f64,
    pub shoot: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSendReq {
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingReq {
    pub t: i64,
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello(HelloReq),
    RoomsList,
    RoomCreate(RoomCreateReq),
    RoomJoin(RoomJoinReq),
    RoomLeave,
    RoomReady(RoomReadyReq),
    RoomStart(RoomConfigReq),
    RoomConfig(RoomConfigReq),
    Input(InputReq),
    ChatSend(ChatSendReq),
    Ping(PingReq),
}

impl ClientMessage {
    /// Decodes one text frame into a typed message.
    pub fn decode(text: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawEnvelope =
            serde_json::from_slice(text).map_err(|_| DecodeError::InvalidJson)?;
        let payload = raw
            .payload
            .filter(|value| !value.is_null())
            .unwrap_or_else(|| Value::Object(Default::default()));

        let message = match raw.kind.as_str() {
            "hello" => ClientMessage::Hello(payload_as("hello", payload)?),
            "rooms_list" => ClientMessage::RoomsList,
            "room_create" => ClientMessage::RoomCreate(payload_as("room_create", payload)?),
            "room_join" => ClientMessage::RoomJoin(payload_as("room_join", payload)?),
            "room_leave" => ClientMessage::RoomLeave,
            "room_ready" => ClientMessage::RoomReady(payload_as("room_ready", payload)?),
            "room_start" => ClientMessage::RoomStart(payload_as("room_start", payload)?),
            "room_config" => ClientMessage::RoomConfig(payload_as("room_config", payload)?),
            "input" => ClientMessage::Input(payload_as("input", payload)?),
            "chat_send" => ClientMessage::ChatSend(payload_as("chat_send", payload)?),
            "ping" => ClientMessage::Ping(payload_as("ping", payload)?),
            _ => return Err(DecodeError::UnknownType(raw.kind)),
        };
        Ok(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello(_) => "hello",
            ClientMessage::RoomsList => "rooms_list",
            ClientMessage::RoomCreate(_) => "room_create",
            ClientMessage::RoomJoin(_) => "room_join",
            ClientMessage::RoomLeave => "room_leave",
            ClientMessage::RoomReady(_) => "room_ready",
            ClientMessage::RoomStart(_) => "room_start",
            ClientMessage::RoomConfig(_) => "room_config",
            ClientMessage::Input(_) => "input",
            ClientMessage::ChatSend(_) => "chat_send",
            ClientMessage::Ping(_) => "ping",
        }
    }
}

fn payload_as<T: DeserializeOwned>(kind: &'static str, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|_| DecodeError::InvalidPayload { kind })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    pub user_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub players: usize,
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomsMsg {
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub id: String,
    pub name: String,
    pub host_id: String,
    pub started: bool,
    pub finished: bool,
    pub winner_id: String,
    pub win_score: u32,
    pub show_enemies_on_map: bool,
    pub wall_text: String,
    pub players: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStart {
    pub map: ArenaMap,
    pub tick_ms: u64,
    pub win_score: u32,
    pub show_enemies_on_map: bool,
    pub wall_text: String,
}

/// One participant as seen in a snapshot or in the final rankings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerFrame {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub dir: f64,
    pub hp: i32,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateMsg {
    pub tick: u64,
    pub players: Vec<PlayerFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOver {
    pub room_id: String,
    pub room_name: String,
    pub winner_id: String,
    pub win_score: u32,
    pub rankings: Vec<PlayerFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMsg {
    pub user_id: String,
    pub name: String,
    pub text: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PongMsg {
    pub t: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub message: String,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    HelloAck(HelloAck),
    Rooms(RoomsMsg),
    RoomState(RoomState),
    GameStart(GameStart),
    GameState(GameStateMsg),
    GameOver(GameOver),
    Chat(ChatMsg),
    Pong(PongMsg),
    Error(ErrorMsg),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMsg {
            message: message.into(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::HelloAck(_) => "hello_ack",
            ServerMessage::Rooms(_) => "rooms",
            ServerMessage::RoomState(_) => "room_state",
            ServerMessage::GameStart(_) => "game_start",
            ServerMessage::GameState(_) => "game_state",
            ServerMessage::GameOver(_) => "game_over",
            ServerMessage::Chat(_) => "chat",
            ServerMessage::Pong(_) => "pong",
            ServerMessage::Error(_) => "error",
        }
    }
}
