pub mod channels;
pub mod output_router;
pub mod protocol;
pub mod rate_limiter;
pub mod web_server;

pub use protocol::{ClientMessage, NpcActivity, NpcWire, PlayerWire, ProtocolError, ServerEvent};
