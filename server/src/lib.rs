//! # Arena Server Library
//!
//! Authoritative server for a real-time multiplayer arena shooter. Clients
//! connect over a websocket, gather in rooms, and play matches that the server
//! simulates at a fixed tick rate and streams back as full snapshots.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every started room runs its own tick loop. Movement, wall collision,
//! shooting, scoring and respawns are all decided here; clients only send
//! intent (`input`) and render what they receive (`game_state`).
//!
//! ### Room Orchestration
//! The registry multiplexes every connection into isolated rooms:
//! - Authentication by display name (`hello`)
//! - Lobby browsing, room creation, joining and leaving
//! - Ready checks, host-only configuration and match start
//! - Room-scoped chat
//!
//! ### Transport
//! The websocket handshake and frame codec are implemented in-crate on top of
//! a raw TCP stream. Each connection gets a bounded outbound queue; when a
//! client falls behind, new messages are dropped instead of stalling anyone
//! else, and the next snapshot brings it back in sync.
//!
//! ## Architecture Design
//!
//! ### One Lock Domain
//! Sessions and rooms live in a single table guarded by one async mutex.
//! Handlers mutate state and compute the messages to send while holding it;
//! serialization and queueing happen after it is released.
//!
//! ### Tasks
//! - **Accept loop**: one task, hands each TCP stream to a connection task
//! - **Connection reader**: decodes frames and dispatches to the registry
//! - **Connection writer**: drains the outbound queue onto the socket
//! - **Room ticker**: one per started room, ends with the match
//!
//! ## Module Organization
//!
//! ### Codec Module (`codec`)
//! Handshake negotiation, health endpoint, and frame encode/decode for both
//! the server and client roles.
//!
//! ### Session Module (`session`)
//! Per-connection record, bounded outbound queue, and the reader/writer pair.
//!
//! ### Registry Module (`registry`)
//! Session and room tables, message dispatch, broadcast fan-out, and the room
//! tick loop driver.
//!
//! ### Room Module (`room`)
//! One match: roster, lifecycle, configuration and the per-tick simulation.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use arena_server::config::ServerConfig;
//! use arena_server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 9000,
//!         tick_rate: 30,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Bind, then serve `/ws` upgrades and `/healthz` checks forever
//!     let server = Server::new(&config).await?;
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod registry;
pub mod room;
pub mod sanitize;
pub mod session;
pub mod utils;
