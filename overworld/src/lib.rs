//! Multiplayer overworld: an authoritative WebSocket relay that keeps a
//! per-map registry of players and NPCs, plus the client-side pieces that
//! consume it.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod npc;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod world;

pub use config::ServerConfig;
pub use registry::{NpcState, PlayerState, Registry};
pub use world::GameWorld;
