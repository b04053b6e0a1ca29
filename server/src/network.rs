//! Server network layer: TCP accept loop and per-connection upgrade

use crate::codec::{accept, Handshake};
use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::session;
use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Listening socket plus the registry every connection is handed to
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    max_frame_bytes: usize,
}

impl Server {
    /// Validates the configuration and binds the listener
    pub async fn new(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let listener = TcpListener::bind(config.address()).await?;
        info!(
            "Server listening on {} ({} Hz, queue {})",
            listener.local_addr()?,
            config.tick_rate,
            config.outbound_queue
        );

        Ok(Server {
            listener,
            registry: Arc::new(Registry::new(config)),
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections forever, one task per connection
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(handle_connection(registry, stream, addr, self.max_frame_bytes));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    registry: Arc<Registry>,
    stream: TcpStream,
    addr: SocketAddr,
    max_frame_bytes: usize,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }

    match accept(stream, max_frame_bytes).await {
        Ok(Handshake::Upgraded(reader, writer)) => {
            session::serve(registry, reader, writer, addr).await;
        }
        Ok(Handshake::Answered) => debug!("Answered plain HTTP request from {}", addr),
        Err(e) => warn!("Handshake with {} failed: {}", addr, e),
    }
}
