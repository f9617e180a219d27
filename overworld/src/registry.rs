//! Canonical player and NPC records plus the map-to-entity index.
//!
//! Every mutation goes through this type so that a record's map coordinate
//! and the bucket it is indexed under can never disagree. Upserts return the
//! previous record; callers diff old and new map coordinates from that
//! instead of snapshotting state themselves.

use std::collections::BTreeMap;

use net::{NpcActivity, NpcWire, PlayerWire};
use session::ConnectionId;
use space::{Direction, EdgeFlags, IndexError, MapCoord, MapIndex, Position, Velocity};

/// Key type of the shared map index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityKey {
    Player(ConnectionId),
    Npc(String),
}

/// Server-side record of one connected player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: ConnectionId,
    pub position: Position,
    pub animation: String,
    pub map: MapCoord,
}

impl PlayerState {
    /// Build a record from a client payload. The payload's own id is ignored.
    pub fn from_wire(id: ConnectionId, wire: &PlayerWire) -> Self {
        Self {
            id,
            position: Position::new(wire.x, wire.y),
            animation: wire.animation.clone(),
            map: wire.map_position,
        }
    }

    pub fn to_wire(&self) -> PlayerWire {
        PlayerWire {
            id: Some(self.id),
            x: self.position.x,
            y: self.position.y,
            animation: self.animation.clone(),
            map_position: self.map,
        }
    }
}

/// Progress of the current scripted move.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementState {
    pub target: Option<Position>,
    pub in_progress: bool,
    pub is_colliding: bool,
    /// Sides reported by the last map-edge event; consumed by the next path.
    pub blocked_edges: EdgeFlags,
}

/// Server-side record of one NPC.
#[derive(Debug, Clone, PartialEq)]
pub struct NpcState {
    pub id: String,
    pub position: Position,
    pub texture: String,
    pub interaction_radius: f32,
    pub activity: NpcActivity,
    pub facing: Direction,
    pub velocity: Velocity,
    pub map: MapCoord,
    pub movement: MovementState,
}

impl NpcState {
    pub fn new(id: impl Into<String>, texture: impl Into<String>, position: Position, map: MapCoord) -> Self {
        Self {
            id: id.into(),
            position,
            texture: texture.into(),
            interaction_radius: 48.0,
            activity: NpcActivity::Idle,
            facing: Direction::Down,
            velocity: Velocity::ZERO,
            map,
            movement: MovementState::default(),
        }
    }

    /// Eligible for a new path on the next behavior tick.
    pub fn is_ready_for_path(&self) -> bool {
        self.activity == NpcActivity::Idle
            && !self.movement.in_progress
            && !self.movement.is_colliding
    }

    /// Stop in place at a client-reported position.
    pub fn settle_at(&mut self, position: Position) {
        self.position = position;
        self.velocity = Velocity::ZERO;
        self.movement.target = None;
        self.movement.in_progress = false;
        if self.activity == NpcActivity::Walking {
            self.activity = NpcActivity::Idle;
        }
    }

    pub fn to_wire(&self) -> NpcWire {
        NpcWire {
            id: self.id.clone(),
            x: self.position.x,
            y: self.position.y,
            texture: self.texture.clone(),
            interaction_radius: self.interaction_radius,
            state: self.activity,
            facing: self.facing,
            velocity: self.velocity,
            map_position: self.map,
            is_moving: self.movement.in_progress,
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    players: BTreeMap<ConnectionId, PlayerState>,
    npcs: BTreeMap<String, NpcState>,
    index: MapIndex<EntityKey>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace a player record, re-indexing it if its map
    /// changed. Returns the previous record.
    pub fn upsert_player(&mut self, state: PlayerState) -> Option<PlayerState> {
        let id = state.id;
        let map = state.map;
        let previous = self.players.insert(id, state);
        self.index.place(EntityKey::Player(id), map);
        previous
    }

    /// Delete a player record. Returns the map it was last on.
    pub fn remove_player(&mut self, id: ConnectionId) -> Option<MapCoord> {
        let state = self.players.remove(&id)?;
        self.index.remove(&EntityKey::Player(id));
        Some(state.map)
    }

    pub fn player(&self, id: ConnectionId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// All players, sorted by connection id.
    pub fn all_players(&self) -> impl Iterator<Item = &PlayerState> + '_ {
        self.players.values()
    }

    pub fn connection_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.players.keys().copied()
    }

    /// Connection ids of players on a map, sorted.
    pub fn player_ids_at(&self, map: MapCoord) -> Vec<ConnectionId> {
        self.index
            .members(map)
            .filter_map(|key| match key {
                EntityKey::Player(id) => Some(*id),
                EntityKey::Npc(_) => None,
            })
            .collect()
    }

    pub fn players_at(&self, map: MapCoord) -> Vec<&PlayerState> {
        self.player_ids_at(map)
            .into_iter()
            .filter_map(|id| self.players.get(&id))
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Insert or fully replace an NPC record, re-indexing it if its map
    /// changed. Returns the previous record.
    pub fn upsert_npc(&mut self, state: NpcState) -> Option<NpcState> {
        let key = EntityKey::Npc(state.id.clone());
        let map = state.map;
        let previous = self.npcs.insert(state.id.clone(), state);
        self.index.place(key, map);
        previous
    }

    pub fn remove_npc(&mut self, id: &str) -> Option<NpcState> {
        let state = self.npcs.remove(id)?;
        self.index.remove(&EntityKey::Npc(state.id.clone()));
        Some(state)
    }

    /// Edit an NPC in place. A map change made by the closure is re-indexed
    /// before this returns. `None` if the NPC does not exist.
    pub fn update_npc<T>(&mut self, id: &str, edit: impl FnOnce(&mut NpcState) -> T) -> Option<T> {
        let npc = self.npcs.get_mut(id)?;
        let old_map = npc.map;
        let result = edit(npc);
        if npc.map != old_map {
            let new_map = npc.map;
            self.index.place(EntityKey::Npc(id.to_string()), new_map);
        }
        Some(result)
    }

    pub fn npc(&self, id: &str) -> Option<&NpcState> {
        self.npcs.get(id)
    }

    /// All NPCs, sorted by id.
    pub fn all_npcs(&self) -> impl Iterator<Item = &NpcState> + '_ {
        self.npcs.values()
    }

    /// NPCs on a map, sorted by id.
    pub fn npcs_at(&self, map: MapCoord) -> Vec<&NpcState> {
        self.index
            .members(map)
            .filter_map(|key| match key {
                EntityKey::Npc(id) => self.npcs.get(id),
                EntityKey::Player(_) => None,
            })
            .collect()
    }

    pub fn npc_count(&self) -> usize {
        self.npcs.len()
    }

    /// Verify that every record is indexed under exactly its own map and
    /// that the index holds nothing else.
    pub fn check_index(&self) -> Result<(), IndexError> {
        self.index.verify()?;
        let records = self
            .players
            .values()
            .map(|p| (EntityKey::Player(p.id), p.map))
            .chain(self.npcs.values().map(|n| (EntityKey::Npc(n.id.clone()), n.map)));
        let mut count = 0;
        for (key, map) in records {
            count += 1;
            match self.index.map_of(&key) {
                Some(indexed) if indexed == map => {}
                Some(indexed) => {
                    return Err(IndexError::Mismatch {
                        entity: format!("{:?}", key),
                        bucket: indexed,
                        recorded: map,
                    })
                }
                None => {
                    return Err(IndexError::Unindexed {
                        entity: format!("{:?}", key),
                        recorded: map,
                    })
                }
            }
        }
        if count != self.index.len() {
            let orphan = self.index.occupied_maps().find_map(|map| {
                self.index
                    .members(map)
                    .find(|key| match key {
                        EntityKey::Player(id) => !self.players.contains_key(id),
                        EntityKey::Npc(id) => !self.npcs.contains_key(id),
                    })
                    .map(|key| (map, key.clone()))
            });
            if let Some((bucket, key)) = orphan {
                return Err(IndexError::Orphaned {
                    entity: format!("{:?}", key),
                    bucket,
                });
            }
        }
        Ok(())
    }
}
