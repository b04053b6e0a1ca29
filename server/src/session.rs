//! Per-connection session: registry-side record plus the two tasks that move
//! bytes between the socket and the registry.

use crate::codec::{WsReader, WsWriter};
use crate::registry::Registry;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// How long a finished session waits for its writer to drain before
/// aborting it.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub type SessionId = String;
pub type RoomId = String;

/// Cloneable handle on a session's bounded outbound queue.
///
/// Pushing never waits: when the queue is full the new message is dropped and
/// the client catches up from the next full snapshot.
#[derive(Debug, Clone)]
pub struct Outbound {
    session_id: SessionId,
    tx: mpsc::Sender<Arc<str>>,
}

impl Outbound {
    pub fn channel(session_id: SessionId, capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { session_id, tx }, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns false if the message was dropped.
    pub fn push(&self, message: Arc<str>) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping message", self.session_id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// A connected client as tracked by the registry.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Empty until a successful hello.
    pub name: String,
    pub room_id: Option<RoomId>,
    pub outbound: Outbound,
}

impl Session {
    pub fn new(id: SessionId, outbound: Outbound) -> Self {
        Self {
            id,
            name: String::new(),
            room_id: None,
            outbound,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.name.is_empty()
    }
}

async fn write_loop<S>(mut rx: mpsc::Receiver<Arc<str>>, writer: Arc<WsWriter<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = writer.send_text(&message).await {
            debug!("Write failed: {}", e);
            break;
        }
    }
}

/// Drives one upgraded connection until the peer leaves or the transport
/// fails, then removes the session from the registry.
pub async fn serve<S>(
    registry: Arc<Registry>,
    mut reader: WsReader<S>,
    writer: Arc<WsWriter<S>>,
    peer: SocketAddr,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (session_id, rx) = registry.connect().await;
    info!("Session {} connected from {}", session_id, peer);

    let mut writer_task = tokio::spawn(write_loop(rx, Arc::clone(&writer)));
    let mut writer_finished = false;

    loop {
        tokio::select! {
            result = reader.read_message() => match result {
                Ok(Some(payload)) => registry.handle_frame(&session_id, &payload).await,
                Ok(None) => {
                    debug!("Session {} closed the channel", session_id);
                    break;
                }
                Err(e) => {
                    warn!("Closing session {}: {}", session_id, e);
                    break;
                }
            },
            _ = &mut writer_task => {
                writer_finished = true;
                break;
            }
        }
    }

    registry.disconnect(&session_id).await;
    if !writer_finished
        && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task)
            .await
            .is_err()
    {
        debug!("Writer for {} is stuck, aborting it", session_id);
        writer_task.abort();
    }
    writer.shutdown().await;
    info!("Session {} disconnected", session_id);
}
