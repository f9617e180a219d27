use net::channels::OutputTx;
use net::ServerEvent;
use session::{ConnectionId, SessionOutput};
use space::MapCoord;

use crate::registry::Registry;

/// Connections that should receive a broadcast, in id order.
///
/// With a map filter only players whose registry map equals the filter are
/// chosen. `exclude` is always skipped.
pub fn recipients(
    registry: &Registry,
    exclude: Option<ConnectionId>,
    map_filter: Option<MapCoord>,
) -> Vec<ConnectionId> {
    let candidates = match map_filter {
        Some(map) => registry.player_ids_at(map),
        None => registry.connection_ids().collect(),
    };
    candidates
        .into_iter()
        .filter(|id| Some(*id) != exclude)
        .collect()
}

/// Fans server events out to the output router.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    output_tx: OutputTx,
}

impl BroadcastRouter {
    pub fn new(output_tx: OutputTx) -> Self {
        Self { output_tx }
    }

    /// Serialize `event` once and queue it for every recipient. Returns the
    /// number of connections it was queued for.
    pub fn broadcast(
        &self,
        registry: &Registry,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
        map_filter: Option<MapCoord>,
    ) -> usize {
        let targets = recipients(registry, exclude, map_filter);
        if targets.is_empty() {
            return 0;
        }
        let Some(text) = encode(event) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in targets {
            if self
                .output_tx
                .send(SessionOutput::new(connection_id, text.clone()))
                .is_ok()
            {
                delivered += 1;
            }
        }
        tracing::trace!(event = event.type_name(), ?map_filter, delivered, "broadcast");
        delivered
    }

    /// Queue `event` for a single connection.
    pub fn send_to(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(text) = encode(event) else {
            return false;
        };
        self.output_tx
            .send(SessionOutput::new(connection_id, text))
            .is_ok()
    }

    /// Queue `event` and ask the router to drop the connection afterwards.
    pub fn send_and_disconnect(&self, connection_id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(text) = encode(event) else {
            return false;
        };
        self.output_tx
            .send(SessionOutput::with_disconnect(connection_id, text))
            .is_ok()
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(event = event.type_name(), "Failed to serialize event: {}", e);
            None
        }
    }
}
