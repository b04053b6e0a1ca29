//! Error types for the transport layer and for application-level validation.

use arena_shared::DecodeError;
use std::io;

/// Failures while upgrading a connection or reading/writing frames.
///
/// Every variant is fatal to the connection it occurred on.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad upgrade request: {0}")]
    BadRequest(&'static str),
    #[error("request head exceeds {0} bytes")]
    RequestTooLarge(usize),
    #[error("fragmented frames are not supported")]
    Fragmented,
    #[error("client frames must be masked")]
    Unmasked,
    #[error("server frames must not be masked")]
    UnexpectedMask,
    #[error("payload of {0} bytes exceeds the frame ceiling")]
    PayloadTooLarge(u64),
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLarge(u64),
    #[error("unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),
    #[error("close frame already sent")]
    Closed,
}

/// Validation failures reported to the offending session as `error{message}`.
///
/// The display text is exactly the message clients see.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("invalid json")]
    InvalidJson,
    #[error("unknown type")]
    UnknownType,
    #[error("invalid payload")]
    InvalidPayload,
    #[error("name required")]
    NameRequired,
    #[error("send hello first")]
    NotAuthenticated,
    #[error("already in room")]
    AlreadyInRoom,
    #[error("not in room")]
    NotInRoom,
    #[error("room not found")]
    RoomNotFound,
    #[error("room already started")]
    RoomAlreadyStarted,
    #[error("only host can start")]
    NotHostStart,
    #[error("only host can config")]
    NotHostConfig,
    #[error("everyone must be ready")]
    NotAllReady,
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::InvalidJson => AppError::InvalidJson,
            DecodeError::UnknownType(_) => AppError::UnknownType,
            DecodeError::InvalidPayload { kind: "hello" } => AppError::NameRequired,
            DecodeError::InvalidPayload { .. } => AppError::InvalidPayload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick rate must be between 1 and 1000 Hz, got {0}")]
    TickRate(u32),
    #[error("outbound queue capacity must be positive")]
    QueueCapacity,
    #[error("frame ceiling must be at least 125 bytes, got {0}")]
    FrameCeiling(usize),
}
