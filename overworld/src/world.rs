//! The game world and the thread that owns it.
//!
//! `GameWorld` holds every piece of mutable server state. Only the world
//! thread touches it; network tasks talk to it through `NetToWorld`
//! messages and receive frames back through the output router. Handlers for
//! individual messages live in `lifecycle` (players) and `npc` (NPCs).

use std::time::{Duration, Instant};

use engine_core::{DeferredQueue, IntervalTimer, TickConfig};
use net::channels::{NetToWorld, OutputTx, WorldRx};
use net::{ClientMessage, ServerEvent};
use observability::TickMetrics;
use rand::rngs::StdRng;
use rand::SeedableRng;
use session::{ConnectionId, SessionManager};
use space::Position;

use crate::broadcast::BroadcastRouter;
use crate::config::ServerConfig;
use crate::npc::NpcDriver;
use crate::registry::Registry;
use crate::shutdown::ShutdownRx;

/// Work scheduled for a later world-thread iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredAction {
    /// Give an NPC a new path, optionally clearing its collision flag first.
    Repath { npc_id: String, clear_collision: bool },
}

impl DeferredAction {
    pub fn npc_id(&self) -> &str {
        match self {
            Self::Repath { npc_id, .. } => npc_id,
        }
    }
}

pub struct GameWorld {
    pub(crate) registry: Registry,
    pub(crate) sessions: SessionManager,
    pub(crate) router: BroadcastRouter,
    pub(crate) npc_driver: NpcDriver,
    pub(crate) deferred: DeferredQueue<DeferredAction>,
    pub(crate) npc_timer: IntervalTimer,
    pub(crate) repath_delay: Duration,
    pub(crate) spawn_position: Position,
}

impl GameWorld {
    /// Build a world seeded with the configured NPC set.
    pub fn new(config: &ServerConfig, output_tx: OutputTx, rng: StdRng, now: Instant) -> Self {
        let geometry = config.to_geometry();
        let mut registry = Registry::new();
        for spawn in &config.npcs {
            registry.upsert_npc(spawn.to_state(&geometry));
        }
        tracing::info!(npcs = registry.npc_count(), "World initialised");

        Self {
            registry,
            sessions: SessionManager::new(),
            router: BroadcastRouter::new(output_tx),
            npc_driver: NpcDriver::new(config.to_npc_behavior(), geometry, rng),
            deferred: DeferredQueue::new(),
            npc_timer: IntervalTimer::new(config.npc_tick_interval(), now),
            repath_delay: config.repath_delay(),
            spawn_position: config.spawn_position(),
        }
    }

    pub fn from_config(config: &ServerConfig, output_tx: OutputTx) -> Self {
        Self::new(config, output_tx, StdRng::from_entropy(), Instant::now())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Apply one message from the network layer.
    pub fn handle(&mut self, msg: NetToWorld, now: Instant) {
        match msg {
            NetToWorld::Connected { connection_id } => self.on_connected(connection_id),
            NetToWorld::Message {
                connection_id,
                message,
            } => self.on_client_message(connection_id, message, now),
            NetToWorld::Disconnected { connection_id } => self.on_disconnected(connection_id),
        }
    }

    fn on_client_message(&mut self, connection_id: ConnectionId, message: ClientMessage, now: Instant) {
        if !self.sessions.is_open(connection_id) {
            tracing::debug!(%connection_id, "Dropping message from connection that is not open");
            return;
        }
        match message {
            ClientMessage::PlayerUpdate { player } => self.on_player_update(connection_id, player),
            ClientMessage::PlayerAttack { position } => self.on_player_attack(connection_id, position),
            ClientMessage::RequestNpcStates { map_position } => {
                self.on_request_npc_states(connection_id, map_position)
            }
            ClientMessage::NpcMovementComplete { npc_id, x, y } => {
                self.on_npc_movement_complete(&npc_id, Position::new(x, y), now)
            }
            ClientMessage::NpcCollision {
                npc_id, x, y, facing, ..
            } => self.on_npc_collision(&npc_id, Position::new(x, y), facing, now),
            ClientMessage::NpcMapEdge {
                npc_id,
                edges,
                x,
                y,
                facing,
                ..
            } => self.on_npc_map_edge(&npc_id, edges, Position::new(x, y), facing, now),
            ClientMessage::NpcInteractionStart { npc_id } => self.on_npc_interaction_start(&npc_id),
            ClientMessage::NpcInteractionEnd { npc_id } => self.on_npc_interaction_end(&npc_id, now),
        }
    }

    /// Run due deferred actions, then the NPC tick if its interval elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<TickMetrics> {
        for action in self.deferred.drain_due(now) {
            self.run_deferred(action);
        }
        if self.npc_timer.poll(now) {
            Some(self.run_npc_tick())
        } else {
            None
        }
    }

    /// Tell every open connection the server is going away.
    pub fn notify_shutdown(&mut self) {
        let event = ServerEvent::Error {
            message: "Server is shutting down.".to_string(),
        };
        for connection_id in self.sessions.open_connections() {
            self.router.send_and_disconnect(connection_id, &event);
        }
    }
}

/// Drive the world until shutdown or until every network sender is gone.
pub fn run_world_thread(
    mut world_rx: WorldRx,
    mut world: GameWorld,
    tick_config: TickConfig,
    shutdown_rx: ShutdownRx,
) {
    let tick_duration = tick_config.tick_duration();
    tracing::info!(tps = tick_config.tps, "World loop running");

    loop {
        if shutdown_rx.is_shutdown() {
            tracing::info!("World loop: shutdown signal received");
            world.notify_shutdown();
            break;
        }

        let tick_start = Instant::now();

        // 1. Network messages
        loop {
            match world_rx.try_recv() {
                Ok(msg) => world.handle(msg, Instant::now()),
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                    tracing::info!("World loop: network channel closed");
                    return;
                }
            }
        }

        // 2. Deferred callbacks and NPC behavior
        if let Some(metrics) = world.poll(Instant::now()) {
            metrics.log();
        }

        let elapsed = tick_start.elapsed();
        if elapsed < tick_duration {
            std::thread::sleep(tick_duration - elapsed);
        }
    }

    tracing::info!("World loop stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use net::channels::OutputRx;
    use session::SessionOutput;
    use tokio::sync::mpsc;

    pub(crate) fn test_world(config: &ServerConfig, now: Instant) -> (GameWorld, OutputRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let world = GameWorld::new(config, tx, StdRng::seed_from_u64(42), now);
        (world, rx)
    }

    /// Decode everything queued so far as (recipient, event).
    pub(crate) fn drain(rx: &mut OutputRx) -> Vec<(ConnectionId, ServerEvent)> {
        let mut out = Vec::new();
        while let Ok(SessionOutput {
            connection_id, text, ..
        }) = rx.try_recv()
        {
            let event: ServerEvent = serde_json::from_str(&text).unwrap();
            out.push((connection_id, event));
        }
        out
    }

    #[test]
    fn world_seeds_configured_npcs() {
        let config = ServerConfig::default();
        let (world, _rx) = test_world(&config, Instant::now());
        assert_eq!(world.registry().npc_count(), config.npcs.len());
        world.registry().check_index().unwrap();
    }

    #[test]
    fn poll_fires_npc_tick_on_interval() {
        let config = ServerConfig::default();
        let start = Instant::now();
        let (mut world, _rx) = test_world(&config, start);

        assert!(world.poll(start + Duration::from_millis(10)).is_none());
        let metrics = world
            .poll(start + config.npc_tick_interval())
            .expect("tick should fire");
        assert_eq!(metrics.tick_number, 1);
        // Nobody is watching any map yet.
        assert_eq!(metrics.npcs_considered, 0);
        assert!(world.poll(start + config.npc_tick_interval()).is_none());
    }

    #[test]
    fn notify_shutdown_disconnects_open_sessions() {
        let config = ServerConfig::default();
        let (mut world, mut rx) = test_world(&config, Instant::now());
        world.handle(
            NetToWorld::Connected {
                connection_id: ConnectionId(1),
            },
            Instant::now(),
        );
        drain(&mut rx);

        world.notify_shutdown();
        let out = rx.try_recv().unwrap();
        assert_eq!(out.connection_id, ConnectionId(1));
        assert!(out.disconnect);
    }

    #[test]
    fn world_thread_exits_when_network_channel_closes() {
        let config = ServerConfig::default();
        let (world, _rx) = test_world(&config, Instant::now());
        let (world_tx, world_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = crate::shutdown::shutdown_channel();
        drop(world_tx);
        let handle = std::thread::spawn(move || {
            run_world_thread(world_rx, world, TickConfig { tps: 100 }, shutdown_rx);
        });
        handle.join().unwrap();
    }

    #[test]
    fn world_thread_exits_on_shutdown() {
        let config = ServerConfig::default();
        let (world, _rx) = test_world(&config, Instant::now());
        let (_world_tx, world_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = crate::shutdown::shutdown_channel();
        shutdown_tx.trigger();
        let handle = std::thread::spawn(move || {
            run_world_thread(world_rx, world, TickConfig { tps: 100 }, shutdown_rx);
        });
        handle.join().unwrap();
    }
}
