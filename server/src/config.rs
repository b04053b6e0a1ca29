//! Server configuration, parsed from the command line by the `server` binary.

use crate::error::ConfigError;
use clap::Parser;
use std::time::Duration;

/// Default inbound payload ceiling: 1 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Authoritative arena shooter server")]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Simulation ticks per second for every started room
    #[arg(short, long, default_value = "20")]
    pub tick_rate: u32,

    /// Messages buffered per connection before new ones are dropped
    #[arg(long, default_value = "64")]
    pub outbound_queue: usize,

    /// Largest inbound frame payload accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tick_rate: 20,
            outbound_queue: 64,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::TickRate(self.tick_rate));
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::QueueCapacity);
        }
        if self.max_frame_bytes < 125 {
            return Err(ConfigError::FrameCeiling(self.max_frame_bytes));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Never shorter than 1 ms, even for rates `validate` would reject.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis((1000 / u64::from(self.tick_rate.max(1))).max(1))
    }
}
