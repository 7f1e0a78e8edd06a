use clap::Parser;

use crate::registry::OutboundLimits;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "canvas-server",
    about = "Shared canvas coordinator and audio relay over websockets"
)]
pub struct Config {
    #[arg(long, env = "CANVAS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "CANVAS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Messages that may wait for one slow connection before it starts missing broadcasts.
    #[arg(long, env = "CANVAS_OUTBOUND_QUEUE_LEN", default_value_t = 64)]
    pub outbound_queue_len: usize,

    /// Unwritten bytes allowed per connection before it starts missing broadcasts.
    #[arg(long, env = "CANVAS_OUTBOUND_QUEUE_BYTES", default_value_t = 64 * 1024)]
    pub outbound_queue_bytes: usize,

    /// Largest inbound websocket frame accepted, strokes and audio alike.
    #[arg(long, env = "CANVAS_MAX_FRAME_BYTES", default_value_t = 1024 * 1024)]
    pub max_frame_bytes: usize,
}

impl Config {
    pub fn outbound_limits(&self) -> OutboundLimits {
        OutboundLimits {
            capacity: self.outbound_queue_len.max(1),
            byte_budget: self.outbound_queue_bytes,
        }
    }
}
