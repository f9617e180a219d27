use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use net::{ClientMessage, PlayerWire, ServerEvent};
use session::ConnectionId;
use space::{Direction, EdgeFlags, MapCoord, Position, TilePos};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::dispatch::{EventKind, GatewayEvent, SubscriptionId, Subscriptions};
use super::reconciler::NpcReport;
use super::GatewayError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One WebSocket to the server behind a typed publish/subscribe API.
///
/// Inbound frames are decoded and dispatched one at a time on a reader
/// task, so handlers must be quick and must not subscribe or unsubscribe
/// from inside a handler. Subscribe before `connect` to see the initial
/// `game-state`.
pub struct NetworkGateway {
    subscriptions: Arc<Mutex<Subscriptions>>,
    player_id: Arc<Mutex<Option<ConnectionId>>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Default for NetworkGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkGateway {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(Subscriptions::new())),
            player_id: Arc::new(Mutex::new(None)),
            outbound: None,
            reader: None,
            writer: None,
        }
    }

    pub fn on(
        &self,
        kind: EventKind,
        handler: impl FnMut(&GatewayEvent) + Send + 'static,
    ) -> SubscriptionId {
        lock(&self.subscriptions).on(kind, handler)
    }

    pub fn on_any(&self, handler: impl FnMut(&GatewayEvent) + Send + 'static) -> SubscriptionId {
        lock(&self.subscriptions).on_any(handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        lock(&self.subscriptions).off(id)
    }

    /// Id the server assigned us, once `game-state` has arrived.
    pub fn player_id(&self) -> Option<ConnectionId> {
        *lock(&self.player_id)
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Open the socket and start the reader and writer tasks.
    pub async fn connect(&mut self, url: &str) -> Result<(), GatewayError> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut source) = stream.split();
        tracing::info!(url, "Connected to server");

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let subscriptions = self.subscriptions.clone();
        let player_id = self.player_id.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => {
                            if let ServerEvent::GameState { player_id: id, .. } = &event {
                                *lock(&player_id) = Some(*id);
                            }
                            lock(&subscriptions).dispatch(&GatewayEvent::Server(event));
                        }
                        Err(e) => tracing::debug!("Dropping server frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
            tracing::info!("Disconnected from server");
            lock(&subscriptions).dispatch(&GatewayEvent::Disconnect);
        });

        self.outbound = Some(outbound_tx);
        self.reader = Some(reader);
        self.writer = Some(writer);
        Ok(())
    }

    /// Drop every handler and close the socket. No `disconnect` event is
    /// dispatched for a close we asked for.
    pub async fn close(&mut self) {
        lock(&self.subscriptions).clear();
        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    pub fn send(&self, message: &ClientMessage) -> Result<(), GatewayError> {
        let tx = self.outbound.as_ref().ok_or(GatewayError::NotConnected)?;
        let text = serde_json::to_string(message)?;
        tx.send(text).map_err(|_| GatewayError::Closed)
    }

    pub fn update_player_state(&self, player: PlayerWire) -> Result<(), GatewayError> {
        self.send(&ClientMessage::PlayerUpdate { player })
    }

    pub fn send_attack(&self, position: Position) -> Result<(), GatewayError> {
        self.send(&ClientMessage::PlayerAttack { position })
    }

    /// Pair with `RemoteEntityReconciler::expect_npc_states` so an empty
    /// reply still clears the map's NPCs.
    pub fn request_npc_states(&self, map_position: MapCoord) -> Result<(), GatewayError> {
        self.send(&ClientMessage::RequestNpcStates { map_position })
    }

    pub fn send_npc_movement_complete(&self, npc_id: &str, position: Position) -> Result<(), GatewayError> {
        self.send(&ClientMessage::NpcMovementComplete {
            npc_id: npc_id.to_string(),
            x: position.x,
            y: position.y,
        })
    }

    pub fn send_npc_collision(
        &self,
        npc_id: &str,
        collision: EdgeFlags,
        current_tile: Option<TilePos>,
        position: Position,
        facing: Direction,
    ) -> Result<(), GatewayError> {
        self.send(&ClientMessage::NpcCollision {
            npc_id: npc_id.to_string(),
            collision,
            current_tile,
            x: position.x,
            y: position.y,
            facing,
        })
    }

    pub fn send_npc_map_edge(
        &self,
        npc_id: &str,
        edges: EdgeFlags,
        current_tile: Option<TilePos>,
        position: Position,
        facing: Direction,
    ) -> Result<(), GatewayError> {
        self.send(&ClientMessage::NpcMapEdge {
            npc_id: npc_id.to_string(),
            edges,
            current_tile,
            x: position.x,
            y: position.y,
            facing,
        })
    }

    pub fn send_interaction_start(&self, npc_id: &str) -> Result<(), GatewayError> {
        self.send(&ClientMessage::NpcInteractionStart {
            npc_id: npc_id.to_string(),
        })
    }

    pub fn send_interaction_end(&self, npc_id: &str) -> Result<(), GatewayError> {
        self.send(&ClientMessage::NpcInteractionEnd {
            npc_id: npc_id.to_string(),
        })
    }

    /// Forward an outcome from `RemoteEntityReconciler::step_npcs`.
    pub fn send_report(&self, report: NpcReport) -> Result<(), GatewayError> {
        self.send(&report.into_message())
    }
}

impl Drop for NetworkGateway {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}
