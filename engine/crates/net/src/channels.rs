use session::{ConnectionId, SessionOutput};
use tokio::sync::mpsc;

use crate::protocol::ClientMessage;

/// Messages from the network layer to the world thread.
#[derive(Debug)]
pub enum NetToWorld {
    /// A WebSocket upgrade completed.
    Connected {
        connection_id: ConnectionId,
    },
    /// A decoded client frame.
    Message {
        connection_id: ConnectionId,
        message: ClientMessage,
    },
    /// The socket closed or errored.
    Disconnected {
        connection_id: ConnectionId,
    },
}

/// Sender from network tasks to the world thread.
pub type WorldTx = mpsc::UnboundedSender<NetToWorld>;
/// Receiver in the world thread for network events.
pub type WorldRx = mpsc::UnboundedReceiver<NetToWorld>;

/// Sender from the world thread to the output router.
pub type OutputTx = mpsc::UnboundedSender<SessionOutput>;
/// Receiver in the output router for session outputs.
pub type OutputRx = mpsc::UnboundedReceiver<SessionOutput>;

/// Per-connection write channel (world thread -> output router -> socket task).
pub type SessionWriteTx = mpsc::UnboundedSender<String>;
pub type SessionWriteRx = mpsc::UnboundedReceiver<String>;

/// Registration message for the output router.
#[derive(Debug)]
pub struct RegisterSession {
    pub connection_id: ConnectionId,
    pub write_tx: SessionWriteTx,
}

pub type RegisterTx = mpsc::UnboundedSender<RegisterSession>;
pub type RegisterRx = mpsc::UnboundedReceiver<RegisterSession>;

pub type UnregisterTx = mpsc::UnboundedSender<ConnectionId>;
pub type UnregisterRx = mpsc::UnboundedReceiver<ConnectionId>;
