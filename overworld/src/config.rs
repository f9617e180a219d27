use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use engine_core::TickConfig;
use net::rate_limiter::ConnectionLimits;
use net::web_server::WebServerConfig;
use space::{Direction, MapCoord, MapGeometry, Position, TilePos};

use crate::npc::{NpcBehavior, PathPolicy};
use crate::registry::NpcState;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub ws_addr: String,
    pub web_static_dir: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            ws_addr: "0.0.0.0:8080".to_string(),
            web_static_dir: "web_dist".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub max_connections_total: usize,
    pub max_connections_per_ip: usize,
    pub max_input_length: usize,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            max_connections_total: 1000,
            max_connections_per_ip: 5,
            max_input_length: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickSection {
    pub tps: u32,
}

impl Default for TickSection {
    fn default() -> Self {
        Self { tps: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapSection {
    pub tile_size: u32,
    pub width_tiles: u32,
    pub height_tiles: u32,
    /// Pixel spawn position for new connections on map (0,0).
    pub spawn_x: f32,
    pub spawn_y: f32,
}

impl Default for MapSection {
    fn default() -> Self {
        Self {
            tile_size: 32,
            width_tiles: 40,
            height_tiles: 30,
            spawn_x: 400.0,
            spawn_y: 300.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NpcSection {
    pub tick_interval_ms: u64,
    pub repath_delay_ms: u64,
    pub min_distance_tiles: u32,
    pub max_distance_tiles: u32,
    pub edge_buffer_tiles: u32,
    /// Pixels per second.
    pub speed: f32,
    pub policy: PathPolicy,
}

impl Default for NpcSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3000,
            repath_delay_ms: 1000,
            min_distance_tiles: 2,
            max_distance_tiles: 4,
            edge_buffer_tiles: 2,
            speed: 60.0,
            policy: PathPolicy::EdgeAware,
        }
    }
}

/// One NPC placed at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct NpcSpawn {
    pub id: String,
    pub texture: String,
    pub tile_x: i32,
    pub tile_y: i32,
    #[serde(default)]
    pub map_x: i32,
    #[serde(default)]
    pub map_y: i32,
    #[serde(default = "default_interaction_radius")]
    pub interaction_radius: f32,
    #[serde(default)]
    pub facing: Direction,
}

fn default_interaction_radius() -> f32 {
    48.0
}

impl NpcSpawn {
    fn new(id: &str, texture: &str, tile: (i32, i32), map: (i32, i32), facing: Direction) -> Self {
        Self {
            id: id.to_string(),
            texture: texture.to_string(),
            tile_x: tile.0,
            tile_y: tile.1,
            map_x: map.0,
            map_y: map.1,
            interaction_radius: default_interaction_radius(),
            facing,
        }
    }

    pub fn to_state(&self, geometry: &MapGeometry) -> NpcState {
        let position = geometry.tile_center(TilePos::new(self.tile_x, self.tile_y));
        let mut state = NpcState::new(
            self.id.clone(),
            self.texture.clone(),
            position,
            MapCoord::new(self.map_x, self.map_y),
        );
        state.interaction_radius = self.interaction_radius;
        state.facing = self.facing;
        state
    }
}

fn default_npcs() -> Vec<NpcSpawn> {
    vec![
        NpcSpawn::new("merchant", "npc-merchant", (10, 8), (0, 0), Direction::Down),
        NpcSpawn::new("guard", "npc-guard", (20, 12), (0, 0), Direction::Left),
        NpcSpawn::new("villager", "npc-villager", (15, 20), (0, 0), Direction::Up),
        NpcSpawn::new("wanderer", "npc-villager", (12, 14), (1, 0), Direction::Right),
    ]
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub net: NetConfig,
    pub security: SecuritySection,
    pub tick: TickSection,
    pub map: MapSection,
    pub npc: NpcSection,
    pub npcs: Vec<NpcSpawn>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            security: SecuritySection::default(),
            tick: TickSection::default(),
            map: MapSection::default(),
            npc: NpcSection::default(),
            npcs: default_npcs(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional TOML file path. A path that does
    /// not exist yields the defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config: Self = match config_path {
            Some(path) if Path::new(path).exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map.tile_size == 0 {
            return Err(ConfigError::Invalid("map.tile_size must be positive".into()));
        }
        if self.npc.min_distance_tiles == 0 || self.npc.min_distance_tiles > self.npc.max_distance_tiles {
            return Err(ConfigError::Invalid(format!(
                "npc distance bounds {}..={} are empty",
                self.npc.min_distance_tiles, self.npc.max_distance_tiles
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for spawn in &self.npcs {
            if !seen.insert(spawn.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate npc id '{}'", spawn.id)));
            }
        }
        Ok(())
    }

    pub fn to_tick_config(&self) -> TickConfig {
        TickConfig { tps: self.tick.tps }
    }

    pub fn to_geometry(&self) -> MapGeometry {
        MapGeometry {
            tile_size: self.map.tile_size,
            width_tiles: self.map.width_tiles,
            height_tiles: self.map.height_tiles,
        }
    }

    pub fn spawn_position(&self) -> Position {
        Position::new(self.map.spawn_x, self.map.spawn_y)
    }

    pub fn to_npc_behavior(&self) -> NpcBehavior {
        NpcBehavior {
            policy: self.npc.policy,
            min_distance_tiles: self.npc.min_distance_tiles,
            max_distance_tiles: self.npc.max_distance_tiles,
            edge_buffer_tiles: self.npc.edge_buffer_tiles,
            speed: self.npc.speed,
        }
    }

    pub fn npc_tick_interval(&self) -> Duration {
        Duration::from_millis(self.npc.tick_interval_ms.max(1))
    }

    pub fn repath_delay(&self) -> Duration {
        Duration::from_millis(self.npc.repath_delay_ms)
    }

    pub fn to_web_server_config(&self) -> WebServerConfig {
        let dir = PathBuf::from(&self.net.web_static_dir);
        WebServerConfig {
            static_dir: if dir.is_dir() { Some(dir) } else { None },
            limits: ConnectionLimits {
                max_connections_total: self.security.max_connections_total,
                max_connections_per_ip: self.security.max_connections_per_ip,
                max_input_length: self.security.max_input_length,
            },
        }
    }
}

/// Parse CLI arguments and load config.
/// Supports: --config <path>
pub fn parse_cli_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(val) = args.get(i + 1) {
                    config_path = Some(val.as_str());
                    i += 2;
                } else {
                    eprintln!("--config requires a path argument");
                    std::process::exit(1);
                }
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    match ServerConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}
