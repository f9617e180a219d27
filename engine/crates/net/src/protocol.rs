use serde::{Deserialize, Serialize};
use session::ConnectionId;
use space::{Direction, EdgeFlags, MapCoord, Position, TilePos, Velocity};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },
}

/// Client-to-server message (internally tagged JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Full replace of the sender's own player record.
    PlayerUpdate { player: PlayerWire },
    PlayerAttack { position: Position },
    RequestNpcStates { map_position: MapCoord },
    NpcMovementComplete { npc_id: String, x: f32, y: f32 },
    NpcCollision {
        npc_id: String,
        #[serde(default)]
        collision: EdgeFlags,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_tile: Option<TilePos>,
        x: f32,
        y: f32,
        facing: Direction,
    },
    NpcMapEdge {
        npc_id: String,
        #[serde(default)]
        edges: EdgeFlags,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_tile: Option<TilePos>,
        x: f32,
        y: f32,
        facing: Direction,
    },
    NpcInteractionStart { npc_id: String },
    NpcInteractionEnd { npc_id: String },
}

/// Server-to-client message (internally tagged JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Sent once on connect: the receiver's own id and every other player.
    GameState {
        player_id: ConnectionId,
        players: Vec<PlayerWire>,
    },
    InitialNpcStates { npcs: Vec<NpcWire> },
    NpcStates { npcs: Vec<NpcWire> },
    PlayerJoined { player: PlayerWire },
    PlayerLeft { player_id: ConnectionId },
    PlayerUpdate { player: PlayerWire },
    PlayerLeftMap {
        player_id: ConnectionId,
        map_position: MapCoord,
    },
    PlayerAttack {
        player_id: ConnectionId,
        position: Position,
    },
    NpcMovementInstruction {
        npc_id: String,
        target_x: f32,
        target_y: f32,
        facing: Direction,
        state: NpcActivity,
    },
    NpcUpdate { npc: NpcWire },
    Error { message: String },
}

impl ServerEvent {
    /// The `type` tag this event carries on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GameState { .. } => "game-state",
            Self::InitialNpcStates { .. } => "initial-npc-states",
            Self::NpcStates { .. } => "npc-states",
            Self::PlayerJoined { .. } => "player-joined",
            Self::PlayerLeft { .. } => "player-left",
            Self::PlayerUpdate { .. } => "player-update",
            Self::PlayerLeftMap { .. } => "player-left-map",
            Self::PlayerAttack { .. } => "player-attack",
            Self::NpcMovementInstruction { .. } => "npc-movement-instruction",
            Self::NpcUpdate { .. } => "npc-update",
            Self::Error { .. } => "error",
        }
    }
}

/// Wire representation of a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerWire {
    /// Ignored when sent by a client; the connection id is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ConnectionId>,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub animation: String,
    #[serde(default)]
    pub map_position: MapCoord,
}

/// High-level NPC activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NpcActivity {
    #[default]
    Idle,
    Walking,
    Talking,
    Busy,
}

/// Wire representation of an NPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcWire {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub texture: String,
    pub interaction_radius: f32,
    pub state: NpcActivity,
    pub facing: Direction,
    #[serde(default)]
    pub velocity: Velocity,
    pub map_position: MapCoord,
    #[serde(default)]
    pub is_moving: bool,
}

/// Decode one inbound text frame, enforcing the size limit first.
pub fn decode_client_message(text: &str, max_len: usize) -> Result<ClientMessage, ProtocolError> {
    if text.len() > max_len {
        return Err(ProtocolError::TooLarge {
            len: text.len(),
            max: max_len,
        });
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: u64, map: MapCoord) -> PlayerWire {
        PlayerWire {
            id: Some(ConnectionId(id)),
            x: 100.0,
            y: 64.0,
            animation: "walk-left".to_string(),
            map_position: map,
        }
    }

    #[test]
    fn deserialize_player_update() {
        let json = r#"{"type":"player-update","player":{"id":3,"x":10.5,"y":20,"animation":"walk-up","mapPosition":{"x":1,"y":0}}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::PlayerUpdate { player } => {
                assert_eq!(player.id, Some(ConnectionId(3)));
                assert_eq!(player.x, 10.5);
                assert_eq!(player.animation, "walk-up");
                assert_eq!(player.map_position, MapCoord::new(1, 0));
            }
            _ => panic!("Expected PlayerUpdate"),
        }
    }

    #[test]
    fn deserialize_player_update_without_id() {
        let json = r#"{"type":"player-update","player":{"x":1,"y":2,"animation":"idle-down","mapPosition":{"x":0,"y":0}}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::PlayerUpdate { player } if player.id.is_none()));
    }

    #[test]
    fn deserialize_request_npc_states() {
        let json = r#"{"type":"request-npc-states","mapPosition":{"x":-2,"y":5}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::RequestNpcStates {
                map_position: MapCoord::new(-2, 5)
            }
        );
    }

    #[test]
    fn deserialize_npc_collision() {
        let json = r#"{"type":"npc-collision","npcId":"guard","collision":{"up":false,"down":true,"left":false,"right":false},"currentTile":{"x":4,"y":7},"x":144,"y":240,"facing":"down"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::NpcCollision {
                npc_id,
                collision,
                current_tile,
                facing,
                ..
            } => {
                assert_eq!(npc_id, "guard");
                assert!(collision.down);
                assert_eq!(current_tile, Some(TilePos::new(4, 7)));
                assert_eq!(facing, Direction::Down);
            }
            _ => panic!("Expected NpcCollision"),
        }
    }

    #[test]
    fn deserialize_npc_map_edge_without_tile() {
        let json = r#"{"type":"npc-map-edge","npcId":"merchant","edges":{"left":true},"x":0,"y":96,"facing":"left"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::NpcMapEdge {
                edges,
                current_tile,
                ..
            } => {
                assert!(edges.left);
                assert!(!edges.right);
                assert!(current_tile.is_none());
            }
            _ => panic!("Expected NpcMapEdge"),
        }
    }

    #[test]
    fn deserialize_interaction() {
        let json = r#"{"type":"npc-interaction-start","npcId":"merchant"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::NpcInteractionStart {
                npc_id: "merchant".to_string()
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = decode_client_message(r#"{"type":"teleport","x":1}"#, 4096).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = decode_client_message("not json", 4096).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn oversize_frame_is_rejected_before_parsing() {
        let text = format!(r#"{{"type":"player-attack","position":{{"x":1,"y":2}},"pad":"{}"}}"#, "x".repeat(64));
        let err = decode_client_message(&text, 32).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { max: 32, .. }));
    }

    #[test]
    fn serialize_game_state() {
        let msg = ServerEvent::GameState {
            player_id: ConnectionId(7),
            players: vec![],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"game-state","playerId":7,"players":[]}"#);
    }

    #[test]
    fn serialize_player_left_map() {
        let msg = ServerEvent::PlayerLeftMap {
            player_id: ConnectionId(2),
            map_position: MapCoord::new(0, 0),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"player-left-map""#));
        assert!(json.contains(r#""playerId":2"#));
        assert!(json.contains(r#""mapPosition":{"x":0,"y":0}"#));
    }

    #[test]
    fn serialize_player_update_uses_camel_case() {
        let msg = ServerEvent::PlayerUpdate {
            player: player(4, MapCoord::new(1, 0)),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"player-update""#));
        assert!(json.contains(r#""mapPosition":{"x":1,"y":0}"#));
        assert!(json.contains(r#""id":4"#));
    }

    #[test]
    fn serialize_movement_instruction() {
        let msg = ServerEvent::NpcMovementInstruction {
            npc_id: "guard".to_string(),
            target_x: 80.0,
            target_y: 48.0,
            facing: Direction::Left,
            state: NpcActivity::Walking,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"npc-movement-instruction""#));
        assert!(json.contains(r#""npcId":"guard""#));
        assert!(json.contains(r#""targetX":80.0"#));
        assert!(json.contains(r#""facing":"left""#));
        assert!(json.contains(r#""state":"walking""#));
    }

    #[test]
    fn npc_wire_shape() {
        let npc = NpcWire {
            id: "merchant".to_string(),
            x: 16.0,
            y: 16.0,
            texture: "merchant".to_string(),
            interaction_radius: 48.0,
            state: NpcActivity::Idle,
            facing: Direction::Down,
            velocity: Velocity::ZERO,
            map_position: MapCoord::ORIGIN,
            is_moving: false,
        };
        let json = serde_json::to_string(&ServerEvent::NpcUpdate { npc }).unwrap();
        assert!(json.contains(r#""type":"npc-update""#));
        assert!(json.contains(r#""interactionRadius":48.0"#));
        assert!(json.contains(r#""isMoving":false"#));
        assert!(json.contains(r#""state":"idle""#));
    }

    #[test]
    fn server_events_decode_back() {
        let events = vec![
            ServerEvent::PlayerLeft {
                player_id: ConnectionId(1),
            },
            ServerEvent::PlayerAttack {
                player_id: ConnectionId(1),
                position: Position::new(3.0, 4.0),
            },
            ServerEvent::NpcStates { npcs: vec![] },
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: ServerEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back.type_name(), event.type_name());
            assert!(json.contains(&format!(r#""type":"{}""#, event.type_name())));
        }
    }
}
