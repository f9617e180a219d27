//! Client-side half of the sync layer: a typed gateway over one WebSocket
//! and a reconciler that keeps remote-entity proxies in step with it.

pub mod dispatch;
pub mod gateway;
pub mod reconciler;

pub use dispatch::{EventKind, GatewayEvent, SubscriptionId, Subscriptions};
pub use gateway::NetworkGateway;
pub use reconciler::{NpcReport, ProxyId, RemoteEntityReconciler, SpriteSink};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,
}
