//! NPC wander behavior.
//!
//! The server decides where an NPC walks; clients simulate the walk and
//! report back (`npc-movement-complete`, `npc-collision`, `npc-map-edge`).
//! Positions in those reports are taken as-is.

use std::time::Instant;

use net::{NpcActivity, ServerEvent};
use observability::TickMetrics;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use space::{Direction, EdgeFlags, MapGeometry, Position, Velocity};

use crate::registry::NpcState;
use crate::world::{DeferredAction, GameWorld};

/// How a new wander direction is picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathPolicy {
    /// Any direction except the current facing.
    Basic,
    /// Also skip directions that end near the map edge or that the last
    /// map-edge report said were blocked.
    #[default]
    EdgeAware,
}

#[derive(Debug, Clone)]
pub struct NpcBehavior {
    pub policy: PathPolicy,
    pub min_distance_tiles: u32,
    pub max_distance_tiles: u32,
    pub edge_buffer_tiles: u32,
    /// Pixels per second.
    pub speed: f32,
}

impl Default for NpcBehavior {
    fn default() -> Self {
        Self {
            policy: PathPolicy::EdgeAware,
            min_distance_tiles: 2,
            max_distance_tiles: 4,
            edge_buffer_tiles: 2,
            speed: 60.0,
        }
    }
}

/// One straight-line move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPlan {
    pub direction: Direction,
    pub distance_tiles: u32,
    pub target: Position,
}

/// Picks wander paths.
pub struct NpcDriver {
    behavior: NpcBehavior,
    geometry: MapGeometry,
    rng: StdRng,
}

impl NpcDriver {
    pub fn new(behavior: NpcBehavior, geometry: MapGeometry, rng: StdRng) -> Self {
        Self {
            behavior,
            geometry,
            rng,
        }
    }

    pub fn behavior(&self) -> &NpcBehavior {
        &self.behavior
    }

    pub fn geometry(&self) -> &MapGeometry {
        &self.geometry
    }

    /// Plan a move of `distance_tiles` in `direction` from the NPC's position.
    pub fn plan_toward(&self, npc: &NpcState, direction: Direction, distance_tiles: u32) -> PathPlan {
        let (dx, dy) = direction.delta();
        let step = (distance_tiles * self.geometry.tile_size) as f32;
        PathPlan {
            direction,
            distance_tiles,
            target: Position::new(npc.position.x + dx as f32 * step, npc.position.y + dy as f32 * step),
        }
    }

    /// Whether the active policy lets the NPC take this path.
    pub fn allows(&self, npc: &NpcState, plan: &PathPlan) -> bool {
        if plan.direction == npc.facing {
            return false;
        }
        match self.behavior.policy {
            PathPolicy::Basic => true,
            PathPolicy::EdgeAware => {
                let target_tile = self.geometry.tile_of(plan.target);
                !npc.movement.blocked_edges.contains(plan.direction)
                    && !self
                        .geometry
                        .within_edge_buffer(target_tile, self.behavior.edge_buffer_tiles)
            }
        }
    }

    /// Pick a random allowed path, or `None` if every direction is ruled out.
    pub fn plan(&mut self, npc: &NpcState) -> Option<PathPlan> {
        let min = self.behavior.min_distance_tiles;
        let max = self.behavior.max_distance_tiles.max(min);
        let distance = self.rng.gen_range(min..=max);

        let candidates: Vec<PathPlan> = Direction::ALL
            .iter()
            .map(|direction| self.plan_toward(npc, *direction, distance))
            .filter(|plan| self.allows(npc, plan))
            .collect();
        candidates.choose(&mut self.rng).copied()
    }
}

impl GameWorld {
    /// Start a new move for an NPC and tell its map. Returns false when no
    /// path was issued.
    pub(crate) fn issue_path(&mut self, npc_id: &str) -> bool {
        let Some(npc) = self.registry.npc(npc_id) else {
            return false;
        };
        let Some(plan) = self.npc_driver.plan(npc) else {
            tracing::debug!(npc_id, "No open direction, NPC stays idle");
            return false;
        };

        let speed = self.npc_driver.behavior().speed;
        let Some(map) = self.registry.update_npc(npc_id, |npc| {
            npc.activity = NpcActivity::Walking;
            npc.facing = plan.direction;
            npc.velocity = Velocity::toward(plan.direction, speed);
            npc.movement.target = Some(plan.target);
            npc.movement.in_progress = true;
            npc.movement.blocked_edges = EdgeFlags::NONE;
            npc.map
        }) else {
            return false;
        };

        let event = ServerEvent::NpcMovementInstruction {
            npc_id: npc_id.to_string(),
            target_x: plan.target.x,
            target_y: plan.target.y,
            facing: plan.direction,
            state: NpcActivity::Walking,
        };
        self.router.broadcast(&self.registry, &event, None, Some(map));
        true
    }

    fn broadcast_npc_update(&self, npc_id: &str) {
        if let Some(npc) = self.registry.npc(npc_id) {
            let event = ServerEvent::NpcUpdate { npc: npc.to_wire() };
            self.router.broadcast(&self.registry, &event, None, Some(npc.map));
        }
    }

    fn schedule_repath(&mut self, npc_id: &str, clear_collision: bool, now: Instant) {
        self.deferred.schedule_after(
            now,
            self.repath_delay,
            DeferredAction::Repath {
                npc_id: npc_id.to_string(),
                clear_collision,
            },
        );
    }

    /// One behavior tick: settle NPCs nobody is watching, then path every
    /// observed NPC that is ready.
    pub(crate) fn run_npc_tick(&mut self) -> TickMetrics {
        let started = Instant::now();

        let unobserved_walkers: Vec<String> = self
            .registry
            .all_npcs()
            .filter(|npc| npc.movement.in_progress && self.registry.player_ids_at(npc.map).is_empty())
            .map(|npc| npc.id.clone())
            .collect();
        for npc_id in &unobserved_walkers {
            self.registry.update_npc(npc_id, |npc| {
                let target = npc.movement.target.unwrap_or(npc.position);
                npc.settle_at(target);
            });
        }

        let eligible: Vec<String> = self
            .registry
            .all_npcs()
            .filter(|npc| npc.is_ready_for_path() && !self.registry.player_ids_at(npc.map).is_empty())
            .map(|npc| npc.id.clone())
            .collect();

        let mut issued = 0;
        for npc_id in &eligible {
            if self.issue_path(npc_id) {
                issued += 1;
            }
        }

        TickMetrics {
            tick_number: self.npc_timer.fired(),
            duration_us: started.elapsed().as_micros(),
            npcs_considered: eligible.len(),
            instructions_issued: issued,
            connection_count: self.sessions.active_count(),
        }
    }

    pub(crate) fn run_deferred(&mut self, action: DeferredAction) {
        match action {
            DeferredAction::Repath {
                npc_id,
                clear_collision,
            } => {
                let ready = self.registry.update_npc(&npc_id, |npc| {
                    if clear_collision {
                        npc.movement.is_colliding = false;
                    }
                    npc.is_ready_for_path()
                });
                match ready {
                    None => tracing::debug!(%npc_id, "Deferred re-path for removed NPC"),
                    Some(false) => tracing::trace!(%npc_id, "NPC busy, skipping deferred re-path"),
                    Some(true) => {
                        self.issue_path(&npc_id);
                    }
                }
            }
        }
    }

    pub(crate) fn on_npc_movement_complete(&mut self, npc_id: &str, position: Position, now: Instant) {
        if self
            .registry
            .update_npc(npc_id, |npc| npc.settle_at(position))
            .is_none()
        {
            tracing::debug!(npc_id, "movement-complete for unknown NPC");
            return;
        }
        self.broadcast_npc_update(npc_id);
        self.schedule_repath(npc_id, false, now);
    }

    pub(crate) fn on_npc_collision(&mut self, npc_id: &str, position: Position, facing: Direction, now: Instant) {
        let updated = self.registry.update_npc(npc_id, |npc| {
            npc.settle_at(position);
            npc.facing = facing;
            npc.movement.is_colliding = true;
        });
        if updated.is_none() {
            tracing::debug!(npc_id, "collision for unknown NPC");
            return;
        }
        self.broadcast_npc_update(npc_id);
        self.schedule_repath(npc_id, true, now);
    }

    pub(crate) fn on_npc_map_edge(
        &mut self,
        npc_id: &str,
        edges: EdgeFlags,
        position: Position,
        facing: Direction,
        now: Instant,
    ) {
        let updated = self.registry.update_npc(npc_id, |npc| {
            npc.settle_at(position);
            npc.facing = facing;
            npc.movement.blocked_edges = edges;
        });
        if updated.is_none() {
            tracing::debug!(npc_id, "map-edge for unknown NPC");
            return;
        }
        self.broadcast_npc_update(npc_id);
        self.schedule_repath(npc_id, false, now);
    }

    pub(crate) fn on_npc_interaction_start(&mut self, npc_id: &str) {
        let updated = self.registry.update_npc(npc_id, |npc| {
            npc.activity = NpcActivity::Talking;
            npc.velocity = Velocity::ZERO;
            npc.movement.target = None;
            npc.movement.in_progress = false;
            npc.movement.is_colliding = false;
        });
        if updated.is_none() {
            tracing::debug!(npc_id, "interaction-start for unknown NPC");
            return;
        }
        let cancelled = self.deferred.cancel_where(|action| action.npc_id() == npc_id);
        tracing::debug!(npc_id, cancelled, "NPC interaction started");
        self.broadcast_npc_update(npc_id);
    }

    pub(crate) fn on_npc_interaction_end(&mut self, npc_id: &str, now: Instant) {
        let was_talking = self.registry.update_npc(npc_id, |npc| {
            let talking = npc.activity == NpcActivity::Talking;
            if talking {
                npc.activity = NpcActivity::Idle;
            }
            talking
        });
        match was_talking {
            None => tracing::debug!(npc_id, "interaction-end for unknown NPC"),
            Some(false) => tracing::debug!(npc_id, "interaction-end for NPC that was not talking"),
            Some(true) => {
                self.broadcast_npc_update(npc_id);
                self.schedule_repath(npc_id, false, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::ServerConfig;
    use crate::world::tests::{drain, test_world};
    use net::channels::NetToWorld;
    use net::ClientMessage;
    use rand::SeedableRng;
    use session::ConnectionId;
    use space::{MapCoord, TilePos};

    fn geometry() -> MapGeometry {
        MapGeometry {
            tile_size: 32,
            width_tiles: 20,
            height_tiles: 15,
        }
    }

    fn driver(policy: PathPolicy, seed: u64) -> NpcDriver {
        NpcDriver::new(
            NpcBehavior {
                policy,
                ..Default::default()
            },
            geometry(),
            StdRng::seed_from_u64(seed),
        )
    }

    fn npc_at(tile: TilePos, facing: Direction) -> NpcState {
        let mut npc = NpcState::new("n", "npc", geometry().tile_center(tile), MapCoord::ORIGIN);
        npc.facing = facing;
        npc
    }

    #[test]
    fn plan_never_repeats_current_facing() {
        for policy in [PathPolicy::Basic, PathPolicy::EdgeAware] {
            let mut d = driver(policy, 1);
            for facing in Direction::ALL {
                let npc = npc_at(TilePos::new(10, 7), facing);
                for _ in 0..200 {
                    let plan = d.plan(&npc).unwrap();
                    assert_ne!(plan.direction, facing);
                }
            }
        }
    }

    #[test]
    fn plan_distance_stays_in_bounds() {
        let mut d = driver(PathPolicy::Basic, 2);
        let npc = npc_at(TilePos::new(10, 7), Direction::Down);
        for _ in 0..200 {
            let plan = d.plan(&npc).unwrap();
            assert!((2..=4).contains(&plan.distance_tiles));
            let travelled = npc.position.distance_to(plan.target);
            assert_eq!(travelled, (plan.distance_tiles * 32) as f32);
        }
    }

    #[test]
    fn edge_aware_never_targets_the_edge_buffer() {
        let mut d = driver(PathPolicy::EdgeAware, 3);
        let geo = geometry();
        for x in 0..20 {
            for y in 0..15 {
                let npc = npc_at(TilePos::new(x, y), Direction::Up);
                for _ in 0..10 {
                    if let Some(plan) = d.plan(&npc) {
                        assert!(!geo.within_edge_buffer(geo.tile_of(plan.target), 2));
                    }
                }
            }
        }
    }

    #[test]
    fn basic_policy_may_walk_off_the_map() {
        let mut d = driver(PathPolicy::Basic, 4);
        let npc = npc_at(TilePos::new(0, 7), Direction::Down);
        let leaves = (0..200).any(|_| d.plan(&npc).is_some_and(|p| p.target.x < 0.0));
        assert!(leaves);
    }

    #[test]
    fn edge_aware_skips_blocked_edges() {
        let mut d = driver(PathPolicy::EdgeAware, 5);
        let mut npc = npc_at(TilePos::new(10, 7), Direction::Left);
        npc.movement.blocked_edges.set(Direction::Up, true);
        for _ in 0..200 {
            let plan = d.plan(&npc).unwrap();
            assert!(matches!(plan.direction, Direction::Down | Direction::Right));
        }
    }

    #[test]
    fn boxed_in_npc_gets_no_plan() {
        let mut d = NpcDriver::new(
            NpcBehavior::default(),
            MapGeometry {
                tile_size: 32,
                width_tiles: 5,
                height_tiles: 5,
            },
            StdRng::seed_from_u64(6),
        );
        let npc = npc_at(TilePos::new(2, 2), Direction::Down);
        assert!(d.plan(&npc).is_none());
    }

    // --- world integration ---

    fn quiet_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.npc.tick_interval_ms = 60_000;
        config
    }

    fn connect(world: &mut GameWorld, id: u64, now: Instant) {
        world.handle(
            NetToWorld::Connected {
                connection_id: ConnectionId(id),
            },
            now,
        );
    }

    fn send(world: &mut GameWorld, id: u64, message: ClientMessage, now: Instant) {
        world.handle(
            NetToWorld::Message {
                connection_id: ConnectionId(id),
                message,
            },
            now,
        );
    }

    fn instructions_for(events: &[(ConnectionId, ServerEvent)], npc: &str) -> Vec<Direction> {
        events
            .iter()
            .filter_map(|(_, e)| match e {
                ServerEvent::NpcMovementInstruction { npc_id, facing, .. } if npc_id == npc => Some(*facing),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn tick_instructions_are_scoped_to_the_npc_map() {
        let config = ServerConfig::default();
        let start = Instant::now();
        let (mut world, mut rx) = test_world(&config, start);
        connect(&mut world, 1, start);
        drain(&mut rx);

        let metrics = world.poll(start + config.npc_tick_interval()).unwrap();
        assert_eq!(metrics.npcs_considered, 3);
        assert_eq!(metrics.instructions_issued, 3);
        assert_eq!(metrics.connection_count, 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|(to, _)| *to == ConnectionId(1)));
        assert!(events
            .iter()
            .all(|(_, e)| matches!(e, ServerEvent::NpcMovementInstruction { .. })));
        assert!(instructions_for(&events, "wanderer").is_empty());

        let merchant = world.registry().npc("merchant").unwrap();
        assert_eq!(merchant.activity, NpcActivity::Walking);
        assert!(merchant.movement.in_progress);
        assert_ne!(merchant.facing, Direction::Down);
        assert!(!merchant.velocity.is_zero());
    }

    #[test]
    fn unobserved_npcs_are_settled_and_left_idle() {
        let config = ServerConfig::default();
        let start = Instant::now();
        let (mut world, mut rx) = test_world(&config, start);
        connect(&mut world, 1, start);
        world.poll(start + config.npc_tick_interval()).unwrap();
        let target = world.registry().npc("merchant").unwrap().movement.target.unwrap();

        world.handle(
            NetToWorld::Disconnected {
                connection_id: ConnectionId(1),
            },
            start,
        );
        drain(&mut rx);

        let metrics = world.poll(start + config.npc_tick_interval() * 2).unwrap();
        assert_eq!(metrics.npcs_considered, 0);
        let merchant = world.registry().npc("merchant").unwrap();
        assert_eq!(merchant.activity, NpcActivity::Idle);
        assert_eq!(merchant.position, target);
        assert!(!merchant.movement.in_progress);
    }

    #[test]
    fn movement_complete_updates_then_repaths_after_delay() {
        let config = quiet_config();
        let start = Instant::now();
        let (mut world, mut rx) = test_world(&config, start);
        connect(&mut world, 1, start);
        drain(&mut rx);

        send(
            &mut world,
            1,
            ClientMessage::NpcMovementComplete {
                npc_id: "merchant".into(),
                x: 100.0,
                y: 120.0,
            },
            start,
        );
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0].1 {
            ServerEvent::NpcUpdate { npc } => {
                assert_eq!(npc.id, "merchant");
                assert_eq!((npc.x, npc.y), (100.0, 120.0));
                assert_eq!(npc.state, NpcActivity::Idle);
            }
            other => panic!("expected npc-update, got {:?}", other),
        }
        assert_eq!(world.pending_deferred(), 1);

        world.poll(start + Duration::from_millis(999));
        assert!(drain(&mut rx).is_empty());

        world.poll(start + config.repath_delay());
        let events = drain(&mut rx);
        assert_eq!(instructions_for(&events, "merchant").len(), 1);
        assert!(world.registry().npc("merchant").unwrap().movement.in_progress);
    }

    #[test]
    fn colliding_npc_sits_out_ticks_until_delay_clears_it() {
        let mut config = ServerConfig::default();
        config.npc.repath_delay_ms = 5000;
        let start = Instant::now();
        let (mut world, mut rx) = test_world(&config, start);
        connect(&mut world, 1, start);

        send(
            &mut world,
            1,
            ClientMessage::NpcCollision {
                npc_id: "merchant".into(),
                collision: EdgeFlags::NONE,
                current_tile: None,
                x: 330.0,
                y: 270.0,
                facing: Direction::Right,
            },
            start,
        );
        assert!(world.registry().npc("merchant").unwrap().movement.is_colliding);
        drain(&mut rx);

        let metrics = world.poll(start + Duration::from_millis(3000)).unwrap();
        assert_eq!(metrics.npcs_considered, 2);
        assert!(instructions_for(&drain(&mut rx), "merchant").is_empty());

        world.poll(start + Duration::from_millis(5000));
        let directions = instructions_for(&drain(&mut rx), "merchant");
        assert_eq!(directions.len(), 1);
        assert_ne!(directions[0], Direction::Right);
        assert!(!world.registry().npc("merchant").unwrap().movement.is_colliding);
    }

    #[test]
    fn map_edge_biases_next_path_away_from_blocked_side() {
        let config = quiet_config();
        let start = Instant::now();
        let (mut world, mut rx) = test_world(&config, start);
        connect(&mut world, 1, start);

        let mut edges = EdgeFlags::NONE;
        edges.set(Direction::Up, true);
        send(
            &mut world,
            1,
            ClientMessage::NpcMapEdge {
                npc_id: "merchant".into(),
                edges,
                current_tile: Some(TilePos::new(10, 8)),
                x: 336.0,
                y: 272.0,
                facing: Direction::Left,
            },
            start,
        );
        let merchant = world.registry().npc("merchant").unwrap();
        assert!(merchant.velocity.is_zero());
        assert_eq!(merchant.movement.blocked_edges, edges);
        drain(&mut rx);

        world.poll(start + config.repath_delay());
        let directions = instructions_for(&drain(&mut rx), "merchant");
        assert_eq!(directions.len(), 1);
        assert!(matches!(directions[0], Direction::Down | Direction::Right));
        assert!(!world.registry().npc("merchant").unwrap().movement.blocked_edges.any());
    }

    #[test]
    fn deferred_repath_for_removed_npc_is_noop() {
        let config = quiet_config();
        let start = Instant::now();
        let (mut world, mut rx) = test_world(&config, start);
        connect(&mut world, 1, start);
        send(
            &mut world,
            1,
            ClientMessage::NpcMovementComplete {
                npc_id: "guard".into(),
                x: 1.0,
                y: 1.0,
            },
            start,
        );
        world.registry.remove_npc("guard");
        drain(&mut rx);

        world.poll(start + config.repath_delay());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(world.pending_deferred(), 0);
    }

    #[test]
    fn talking_npc_stays_put_until_interaction_ends() {
        let config = ServerConfig::default();
        let start = Instant::now();
        let (mut world, mut rx) = test_world(&config, start);
        connect(&mut world, 1, start);

        send(
            &mut world,
            1,
            ClientMessage::NpcMovementComplete {
                npc_id: "merchant".into(),
                x: 336.0,
                y: 272.0,
            },
            start,
        );
        send(
            &mut world,
            1,
            ClientMessage::NpcInteractionStart {
                npc_id: "merchant".into(),
            },
            start,
        );
        assert_eq!(world.pending_deferred(), 0);
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some((_, ServerEvent::NpcUpdate { npc })) if npc.state == NpcActivity::Talking
        ));

        let metrics = world.poll(start + config.npc_tick_interval()).unwrap();
        assert_eq!(metrics.npcs_considered, 2);
        assert!(instructions_for(&drain(&mut rx), "merchant").is_empty());

        // Movement reports do not end a conversation.
        send(
            &mut world,
            1,
            ClientMessage::NpcMovementComplete {
                npc_id: "merchant".into(),
                x: 340.0,
                y: 272.0,
            },
            start,
        );
        assert_eq!(world.registry().npc("merchant").unwrap().activity, NpcActivity::Talking);

        let ended = start + config.npc_tick_interval() + Duration::from_millis(100);
        send(
            &mut world,
            1,
            ClientMessage::NpcInteractionEnd {
                npc_id: "merchant".into(),
            },
            ended,
        );
        assert_eq!(world.registry().npc("merchant").unwrap().activity, NpcActivity::Idle);
        drain(&mut rx);

        world.poll(ended + config.repath_delay());
        assert_eq!(instructions_for(&drain(&mut rx), "merchant").len(), 1);
    }

    #[test]
    fn unknown_npc_reports_are_ignored() {
        let config = quiet_config();
        let start = Instant::now();
        let (mut world, mut rx) = test_world(&config, start);
        connect(&mut world, 1, start);
        drain(&mut rx);

        send(
            &mut world,
            1,
            ClientMessage::NpcMovementComplete {
                npc_id: "ghost".into(),
                x: 0.0,
                y: 0.0,
            },
            start,
        );
        send(
            &mut world,
            1,
            ClientMessage::NpcInteractionStart {
                npc_id: "ghost".into(),
            },
            start,
        );
        assert!(drain(&mut rx).is_empty());
        assert_eq!(world.pending_deferred(), 0);
    }
}
