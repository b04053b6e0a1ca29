//! Frame encode/decode over a split byte stream.

use crate::error::CodecError;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::Mutex;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const MAX_CONTROL_PAYLOAD: u64 = 125;
const CLOSE_ECHO_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(CodecError::UnsupportedOpcode(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// Which end of the channel this codec speaks for.
///
/// Clients mask every frame they send and the server never does; each side
/// rejects frames that break the rule for its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// XORs `payload` in place with the 4-byte key. Applying it twice restores
/// the original bytes.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Builds one final frame, choosing the shortest length encoding.
pub fn encode_frame(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 14);
    frame.push(FIN_BIT | opcode.as_u8());

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    if len < 126 {
        frame.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(mask_bit | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(mask_bit | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            frame.extend_from_slice(&key);
            let start = frame.len();
            frame.extend_from_slice(payload);
            apply_mask(&mut frame[start..], key);
        }
        None => frame.extend_from_slice(payload),
    }
    frame
}

#[derive(Debug)]
struct Frame {
    opcode: OpCode,
    payload: Vec<u8>,
}

/// Write half of a connection. Each frame is written and flushed under one
/// lock so concurrent senders never interleave bytes.
///
/// Once a close frame has gone out every later send fails with
/// [`CodecError::Closed`].
pub struct WsWriter<S> {
    inner: Mutex<WriteHalf<S>>,
    role: Role,
    closed: AtomicBool,
}

impl<S: AsyncRead + AsyncWrite> WsWriter<S> {
    pub(crate) fn new(inner: WriteHalf<S>, role: Role) -> Self {
        Self {
            inner: Mutex::new(inner),
            role,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn send(&self, opcode: OpCode, payload: &[u8]) -> Result<(), CodecError> {
        let mask = match self.role {
            Role::Client => Some(rand::random::<[u8; 4]>()),
            Role::Server => None,
        };
        let frame = encode_frame(opcode, payload, mask);

        let mut inner = self.inner.lock().await;
        if self.is_closed() {
            return Err(CodecError::Closed);
        }
        if opcode == OpCode::Close {
            self.closed.store(true, Ordering::Release);
        }
        inner.write_all(&frame).await?;
        inner.flush().await?;
        Ok(())
    }

    pub async fn send_text(&self, text: &str) -> Result<(), CodecError> {
        self.send(OpCode::Text, text.as_bytes()).await
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let _ = inner.shutdown().await;
    }
}

/// Read half of a connection. Control frames are handled in place; only data
/// payloads are surfaced to the caller.
pub struct WsReader<S> {
    inner: BufReader<ReadHalf<S>>,
    writer: Arc<WsWriter<S>>,
    role: Role,
    max_payload: usize,
}

impl<S: AsyncRead + AsyncWrite> WsReader<S> {
    pub(crate) fn new(
        inner: BufReader<ReadHalf<S>>,
        writer: Arc<WsWriter<S>>,
        role: Role,
        max_payload: usize,
    ) -> Self {
        Self {
            inner,
            writer,
            role,
            max_payload,
        }
    }

    /// Returns the next data payload, or `None` once the peer closed.
    ///
    /// Pings are answered with a pong carrying the same payload. A close frame
    /// is echoed back best-effort before reporting end of stream; the echo
    /// gives up after a second if the write side is stuck.
    pub async fn read_message(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        loop {
            let frame = match self.read_frame().await? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            match frame.opcode {
                OpCode::Text | OpCode::Binary => return Ok(Some(frame.payload)),
                OpCode::Close => {
                    let echo = self.writer.send(OpCode::Close, &frame.payload);
                    let _ = tokio::time::timeout(CLOSE_ECHO_TIMEOUT, echo).await;
                    return Ok(None);
                }
                OpCode::Ping => self.writer.send(OpCode::Pong, &frame.payload).await?,
                OpCode::Pong => {}
                OpCode::Continuation => return Err(CodecError::UnsupportedOpcode(0x0)),
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        let b0 = match self.inner.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let b1 = self.inner.read_u8().await?;

        if b0 & FIN_BIT == 0 {
            return Err(CodecError::Fragmented);
        }
        let opcode = OpCode::from_u8(b0 & 0x0F)?;

        let masked = b1 & MASK_BIT != 0;
        match (self.role, masked) {
            (Role::Server, false) => return Err(CodecError::Unmasked),
            (Role::Client, true) => return Err(CodecError::UnexpectedMask),
            _ => {}
        }

        let len = match b1 & 0x7F {
            126 => u64::from(self.inner.read_u16().await?),
            127 => self.inner.read_u64().await?,
            short => u64::from(short),
        };
        if opcode.is_control() && len > MAX_CONTROL_PAYLOAD {
            return Err(CodecError::ControlTooLarge(len));
        }
        if len > self.max_payload as u64 {
            return Err(CodecError::PayloadTooLarge(len));
        }

        let mut key = [0u8; 4];
        if masked {
            self.inner.read_exact(&mut key).await?;
        }
        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload).await?;
        if masked {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame { opcode, payload }))
    }
}

/// Splits a raw stream that has already completed its handshake.
pub fn split<S>(stream: S, role: Role, max_payload: usize) -> (WsReader<S>, Arc<WsWriter<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(stream);
    let writer = Arc::new(WsWriter::new(write, role));
    let reader = WsReader::new(BufReader::new(read), Arc::clone(&writer), role, max_payload);
    (reader, writer)
}
