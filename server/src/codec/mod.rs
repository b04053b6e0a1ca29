//! Hand-rolled upgrade handshake and frame codec for the message channel.
//!
//! The HTTP-style exchange happens once per connection in [`handshake`];
//! afterwards the stream is owned by a [`WsReader`]/[`WsWriter`] pair from
//! [`frame`]. Only single-frame messages are supported.

pub mod frame;
pub mod handshake;

pub use frame::{apply_mask, encode_frame, split, OpCode, Role, WsReader, WsWriter};
pub use handshake::{accept, accept_key, connect, Handshake};
