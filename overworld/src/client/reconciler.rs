//! Keeps the proxies of remote players and NPCs in the current map in
//! step with server events.
//!
//! The reconciler owns no rendering; it drives whatever implements
//! [`SpriteSink`]. Feed it events from the gateway on the game loop's
//! thread, e.g. by forwarding them from an `on_any` handler over a channel.

use std::collections::{BTreeMap, BTreeSet};

use net::{ClientMessage, NpcActivity, NpcWire, PlayerWire, ServerEvent};
use session::ConnectionId;
use space::{Direction, EdgeFlags, MapCoord, MapGeometry, Position, TilePos};

use super::dispatch::GatewayEvent;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProxyId {
    Player(ConnectionId),
    Npc(String),
}

/// Rendering side of a proxy.
pub trait SpriteSink {
    fn create(&mut self, id: &ProxyId, texture: &str, position: Position);
    /// Make the proxy collide with the local player.
    fn add_collider(&mut self, id: &ProxyId);
    fn set_position(&mut self, id: &ProxyId, position: Position);
    fn play_animation(&mut self, id: &ProxyId, animation: &str);
    fn destroy(&mut self, id: &ProxyId);
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerProxy {
    pub position: Position,
    pub animation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NpcProxy {
    pub position: Position,
    pub animation: String,
    pub facing: Direction,
    pub state: NpcActivity,
    /// Where the last movement instruction is taking it.
    pub target: Option<Position>,
}

/// Animation name for an NPC in a given state.
pub fn npc_animation(state: NpcActivity, facing: Direction) -> String {
    match state {
        NpcActivity::Walking => format!("walk-{}", facing),
        _ => format!("idle-{}", facing),
    }
}

/// Outcome of simulating NPC movement that the server needs to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum NpcReport {
    Arrived {
        npc_id: String,
        position: Position,
    },
    MapEdge {
        npc_id: String,
        edges: EdgeFlags,
        tile: TilePos,
        position: Position,
        facing: Direction,
    },
}

impl NpcReport {
    pub fn npc_id(&self) -> &str {
        match self {
            Self::Arrived { npc_id, .. } | Self::MapEdge { npc_id, .. } => npc_id,
        }
    }

    pub fn into_message(self) -> ClientMessage {
        match self {
            Self::Arrived { npc_id, position } => ClientMessage::NpcMovementComplete {
                npc_id,
                x: position.x,
                y: position.y,
            },
            Self::MapEdge {
                npc_id,
                edges,
                tile,
                position,
                facing,
            } => ClientMessage::NpcMapEdge {
                npc_id,
                edges,
                current_tile: Some(tile),
                x: position.x,
                y: position.y,
                facing,
            },
        }
    }
}

pub struct RemoteEntityReconciler {
    local_id: Option<ConnectionId>,
    current_map: MapCoord,
    player_texture: String,
    /// Pixels per second used when simulating NPC walks.
    npc_speed: f32,
    players: BTreeMap<ConnectionId, PlayerProxy>,
    npcs: BTreeMap<String, NpcProxy>,
    /// Map the next `npc-states` reply describes, if we asked for one.
    requested_npc_map: Option<MapCoord>,
}

impl RemoteEntityReconciler {
    pub fn new(player_texture: impl Into<String>, npc_speed: f32) -> Self {
        Self {
            local_id: None,
            current_map: MapCoord::ORIGIN,
            player_texture: player_texture.into(),
            npc_speed,
            players: BTreeMap::new(),
            npcs: BTreeMap::new(),
            requested_npc_map: None,
        }
    }

    pub fn local_id(&self) -> Option<ConnectionId> {
        self.local_id
    }

    pub fn current_map(&self) -> MapCoord {
        self.current_map
    }

    pub fn player(&self, id: ConnectionId) -> Option<&PlayerProxy> {
        self.players.get(&id)
    }

    pub fn player_ids(&self) -> Vec<ConnectionId> {
        self.players.keys().copied().collect()
    }

    pub fn npc(&self, id: &str) -> Option<&NpcProxy> {
        self.npcs.get(id)
    }

    pub fn npc_ids(&self) -> Vec<String> {
        self.npcs.keys().cloned().collect()
    }

    pub fn apply_gateway_event(&mut self, event: &GatewayEvent, sink: &mut impl SpriteSink) {
        match event {
            GatewayEvent::Server(event) => self.apply(event, sink),
            GatewayEvent::Disconnect => self.clear(sink),
        }
    }

    pub fn apply(&mut self, event: &ServerEvent, sink: &mut impl SpriteSink) {
        match event {
            ServerEvent::GameState { player_id, players } => {
                self.local_id = Some(*player_id);
                for player in players {
                    self.upsert_player(player, sink);
                }
            }
            ServerEvent::PlayerJoined { player } | ServerEvent::PlayerUpdate { player } => {
                self.upsert_player(player, sink)
            }
            ServerEvent::PlayerLeft { player_id } | ServerEvent::PlayerLeftMap { player_id, .. } => {
                self.remove_player(*player_id, sink)
            }
            ServerEvent::PlayerAttack { player_id, .. } => self.play_attack(*player_id, sink),
            ServerEvent::InitialNpcStates { npcs } => self.sync_npcs(npcs, None, sink),
            ServerEvent::NpcStates { npcs } => {
                let requested = self.requested_npc_map.take();
                self.sync_npcs(npcs, requested, sink)
            }
            ServerEvent::NpcUpdate { npc } => self.upsert_npc(npc, sink),
            ServerEvent::NpcMovementInstruction {
                npc_id,
                target_x,
                target_y,
                facing,
                state,
            } => self.start_npc_move(npc_id, Position::new(*target_x, *target_y), *facing, *state, sink),
            ServerEvent::Error { message } => tracing::warn!("Server error: {}", message),
        }
    }

    /// The local player moved to another map: nothing tracked is visible
    /// any more.
    pub fn change_map(&mut self, map: MapCoord, sink: &mut impl SpriteSink) {
        self.clear(sink);
        self.current_map = map;
    }

    /// Note that an `npc-states` reply for `map` is on its way, so an empty
    /// reply can still be matched to a map. Call alongside
    /// `NetworkGateway::request_npc_states`.
    pub fn expect_npc_states(&mut self, map: MapCoord) {
        self.requested_npc_map = Some(map);
    }

    /// Destroy every proxy.
    pub fn clear(&mut self, sink: &mut impl SpriteSink) {
        for id in std::mem::take(&mut self.players).into_keys() {
            sink.destroy(&ProxyId::Player(id));
        }
        for id in std::mem::take(&mut self.npcs).into_keys() {
            sink.destroy(&ProxyId::Npc(id));
        }
    }

    fn upsert_player(&mut self, wire: &PlayerWire, sink: &mut impl SpriteSink) {
        let Some(id) = wire.id else {
            tracing::debug!("Player event without id");
            return;
        };
        if Some(id) == self.local_id {
            return;
        }
        if wire.map_position != self.current_map {
            self.remove_player(id, sink);
            return;
        }

        let proxy_id = ProxyId::Player(id);
        let position = Position::new(wire.x, wire.y);
        match self.players.get_mut(&id) {
            None => {
                sink.create(&proxy_id, &self.player_texture, position);
                sink.add_collider(&proxy_id);
                if !wire.animation.is_empty() {
                    sink.play_animation(&proxy_id, &wire.animation);
                }
                self.players.insert(
                    id,
                    PlayerProxy {
                        position,
                        animation: wire.animation.clone(),
                    },
                );
            }
            Some(proxy) => {
                if proxy.position != position {
                    sink.set_position(&proxy_id, position);
                    proxy.position = position;
                }
                if !wire.animation.is_empty() && proxy.animation != wire.animation {
                    sink.play_animation(&proxy_id, &wire.animation);
                    proxy.animation = wire.animation.clone();
                }
            }
        }
    }

    fn remove_player(&mut self, id: ConnectionId, sink: &mut impl SpriteSink) {
        if self.players.remove(&id).is_some() {
            sink.destroy(&ProxyId::Player(id));
        }
    }

    fn play_attack(&mut self, id: ConnectionId, sink: &mut impl SpriteSink) {
        let Some(proxy) = self.players.get_mut(&id) else {
            return;
        };
        let facing = proxy
            .animation
            .rsplit_once('-')
            .map(|(_, facing)| facing)
            .unwrap_or("down");
        proxy.animation = format!("attack-{}", facing);
        sink.play_animation(&ProxyId::Player(id), &proxy.animation);
    }

    /// Apply an NPC snapshot. Proxies missing from it are destroyed only
    /// when the snapshot describes the current map.
    fn sync_npcs(&mut self, npcs: &[NpcWire], requested: Option<MapCoord>, sink: &mut impl SpriteSink) {
        let described = npcs.first().map(|npc| npc.map_position).or(requested);
        let mut present = BTreeSet::new();
        for npc in npcs {
            if npc.map_position == self.current_map {
                present.insert(npc.id.clone());
            }
            self.upsert_npc(npc, sink);
        }
        if described != Some(self.current_map) {
            return;
        }
        let stale: Vec<String> = self
            .npcs
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.remove_npc(&id, sink);
        }
    }

    fn upsert_npc(&mut self, wire: &NpcWire, sink: &mut impl SpriteSink) {
        if wire.id.is_empty() {
            tracing::debug!("NPC event without id");
            return;
        }
        if wire.map_position != self.current_map {
            self.remove_npc(&wire.id, sink);
            return;
        }

        let proxy_id = ProxyId::Npc(wire.id.clone());
        let position = Position::new(wire.x, wire.y);
        let animation = npc_animation(wire.state, wire.facing);
        match self.npcs.get_mut(&wire.id) {
            None => {
                sink.create(&proxy_id, &wire.texture, position);
                sink.add_collider(&proxy_id);
                sink.play_animation(&proxy_id, &animation);
                self.npcs.insert(
                    wire.id.clone(),
                    NpcProxy {
                        position,
                        animation,
                        facing: wire.facing,
                        state: wire.state,
                        target: None,
                    },
                );
            }
            Some(proxy) => {
                if proxy.position != position {
                    sink.set_position(&proxy_id, position);
                    proxy.position = position;
                }
                if proxy.animation != animation {
                    sink.play_animation(&proxy_id, &animation);
                    proxy.animation = animation;
                }
                proxy.facing = wire.facing;
                proxy.state = wire.state;
                if wire.state != NpcActivity::Walking {
                    proxy.target = None;
                }
            }
        }
    }

    fn remove_npc(&mut self, id: &str, sink: &mut impl SpriteSink) {
        if self.npcs.remove(id).is_some() {
            sink.destroy(&ProxyId::Npc(id.to_string()));
        }
    }

    fn start_npc_move(
        &mut self,
        npc_id: &str,
        target: Position,
        facing: Direction,
        state: NpcActivity,
        sink: &mut impl SpriteSink,
    ) {
        let Some(proxy) = self.npcs.get_mut(npc_id) else {
            tracing::trace!(npc_id, "Movement instruction for untracked NPC");
            return;
        };
        proxy.target = Some(target);
        proxy.facing = facing;
        proxy.state = state;
        let animation = npc_animation(NpcActivity::Walking, facing);
        if proxy.animation != animation {
            sink.play_animation(&ProxyId::Npc(npc_id.to_string()), &animation);
            proxy.animation = animation;
        }
    }

    /// Advance walking NPCs by `dt` seconds. NPCs that reach their target or
    /// run off the map stop and are reported.
    pub fn step_npcs(&mut self, dt: f32, geometry: &MapGeometry, sink: &mut impl SpriteSink) -> Vec<NpcReport> {
        let mut reports = Vec::new();
        let step = self.npc_speed * dt;

        for (id, proxy) in self.npcs.iter_mut() {
            let Some(target) = proxy.target else {
                continue;
            };
            let proxy_id = ProxyId::Npc(id.clone());
            let remaining = proxy.position.distance_to(target);
            let arrived = remaining <= step;
            let mut next = if arrived {
                target
            } else {
                Position::new(
                    proxy.position.x + (target.x - proxy.position.x) / remaining * step,
                    proxy.position.y + (target.y - proxy.position.y) / remaining * step,
                )
            };

            // Only the side it is walking toward counts; an NPC may walk
            // along a boundary it already touches.
            let report = if geometry.edges_touched(next).contains(proxy.facing) {
                let mut edges = EdgeFlags::NONE;
                edges.set(proxy.facing, true);
                next = geometry.clamp(next);
                Some(NpcReport::MapEdge {
                    npc_id: id.clone(),
                    edges,
                    tile: geometry.tile_of(next),
                    position: next,
                    facing: proxy.facing,
                })
            } else if arrived {
                Some(NpcReport::Arrived {
                    npc_id: id.clone(),
                    position: next,
                })
            } else {
                None
            };

            if next != proxy.position {
                sink.set_position(&proxy_id, next);
                proxy.position = next;
            }
            if let Some(report) = report {
                proxy.target = None;
                proxy.state = NpcActivity::Idle;
                let animation = npc_animation(NpcActivity::Idle, proxy.facing);
                if proxy.animation != animation {
                    sink.play_animation(&proxy_id, &animation);
                    proxy.animation = animation;
                }
                reports.push(report);
            }
        }
        reports
    }
}
