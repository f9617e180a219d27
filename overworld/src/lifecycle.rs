use net::{PlayerWire, ServerEvent};
use session::ConnectionId;
use space::{MapCoord, Position};

use crate::registry::PlayerState;
use crate::world::GameWorld;

/// Animation a freshly spawned player starts with.
pub const SPAWN_ANIMATION: &str = "idle-down";

impl GameWorld {
    pub(crate) fn on_connected(&mut self, connection_id: ConnectionId) {
        let opened = self
            .sessions
            .register(connection_id)
            .and_then(|()| self.sessions.open(connection_id));
        if let Err(e) = opened {
            tracing::warn!(%connection_id, "Refusing connection: {}", e);
            return;
        }

        let player = PlayerState {
            id: connection_id,
            position: self.spawn_position,
            animation: SPAWN_ANIMATION.to_string(),
            map: MapCoord::ORIGIN,
        };
        let others: Vec<PlayerWire> = self
            .registry
            .all_players()
            .filter(|p| p.id != connection_id)
            .map(PlayerState::to_wire)
            .collect();
        let wire = player.to_wire();
        let spawn_map = player.map;
        self.registry.upsert_player(player);

        self.router.send_to(
            connection_id,
            &ServerEvent::GameState {
                player_id: connection_id,
                players: others,
            },
        );
        let npcs = self
            .registry
            .npcs_at(spawn_map)
            .into_iter()
            .map(|npc| npc.to_wire())
            .collect();
        self.router
            .send_to(connection_id, &ServerEvent::InitialNpcStates { npcs });
        self.router.broadcast(
            &self.registry,
            &ServerEvent::PlayerJoined { player: wire },
            Some(connection_id),
            None,
        );

        tracing::info!(
            %connection_id,
            players = self.registry.player_count(),
            "Player joined"
        );
    }

    /// Full replace of the sender's record, then notify the old and new maps.
    pub(crate) fn on_player_update(&mut self, connection_id: ConnectionId, wire: PlayerWire) {
        if let Some(claimed) = wire.id {
            if claimed != connection_id {
                tracing::debug!(%connection_id, %claimed, "Ignoring player id in update payload");
            }
        }
        if self.registry.player(connection_id).is_none() {
            tracing::debug!(%connection_id, "player-update for unknown player");
            return;
        }

        let next = PlayerState::from_wire(connection_id, &wire);
        let new_map = next.map;
        let update = ServerEvent::PlayerUpdate {
            player: next.to_wire(),
        };
        let Some(previous) = self.registry.upsert_player(next) else {
            return;
        };

        if previous.map != new_map {
            tracing::debug!(%connection_id, from = %previous.map, to = %new_map, "Player changed map");
            self.router.broadcast(
                &self.registry,
                &ServerEvent::PlayerLeftMap {
                    player_id: connection_id,
                    map_position: previous.map,
                },
                Some(connection_id),
                Some(previous.map),
            );
        }
        self.router
            .broadcast(&self.registry, &update, Some(connection_id), Some(new_map));
    }

    pub(crate) fn on_player_attack(&mut self, connection_id: ConnectionId, position: Position) {
        if self.registry.player(connection_id).is_none() {
            return;
        }
        self.router.broadcast(
            &self.registry,
            &ServerEvent::PlayerAttack {
                player_id: connection_id,
                position,
            },
            Some(connection_id),
            None,
        );
    }

    pub(crate) fn on_request_npc_states(&mut self, connection_id: ConnectionId, map: MapCoord) {
        let npcs = self
            .registry
            .npcs_at(map)
            .into_iter()
            .map(|npc| npc.to_wire())
            .collect();
        self.router
            .send_to(connection_id, &ServerEvent::NpcStates { npcs });
    }

    pub(crate) fn on_disconnected(&mut self, connection_id: ConnectionId) {
        if let Err(e) = self.sessions.close(connection_id) {
            tracing::debug!(%connection_id, "Close on untracked session: {}", e);
        }
        self.sessions.remove(connection_id);

        let last_map = self.registry.remove_player(connection_id);
        self.router.broadcast(
            &self.registry,
            &ServerEvent::PlayerLeft {
                player_id: connection_id,
            },
            None,
            None,
        );
        if let Some(map) = last_map {
            self.router.broadcast(
                &self.registry,
                &ServerEvent::PlayerLeftMap {
                    player_id: connection_id,
                    map_position: map,
                },
                None,
                Some(map),
            );
        }

        tracing::info!(
            %connection_id,
            players = self.registry.player_count(),
            "Player left"
        );
    }
}
