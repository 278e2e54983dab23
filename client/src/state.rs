//! The client's accumulated draw state.
//!
//! The server only sends deltas, so the client owns a running picture of the
//! game and replays every turn's events into it. After each folded message
//! (except GameStarted, which Turn 0 follows immediately) a full snapshot
//! goes to the GUI.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use shared::{
    explosion_rays, Bomb, BombId, ClientMessage, DrawMessage, Event, InputMessage, Player,
    PlayerId, Position, ServerMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    Game,
}

pub struct ClientState {
    phase: Phase,
    player_name: String,
    server_name: String,
    player_count: u8,
    size_x: u16,
    size_y: u16,
    game_length: u16,
    explosion_radius: u16,
    bomb_timer: u16,
    turn: u16,
    players: BTreeMap<PlayerId, Player>,
    player_positions: BTreeMap<PlayerId, Position>,
    blocks: BTreeSet<Position>,
    active_bombs: BTreeMap<BombId, Bomb>,
    explosions: BTreeSet<Position>,
    scores: BTreeMap<PlayerId, u32>,
}

impl ClientState {
    pub fn new(player_name: String) -> Self {
        Self {
            phase: Phase::Lobby,
            player_name,
            server_name: String::new(),
            player_count: 0,
            size_x: 0,
            size_y: 0,
            game_length: 0,
            explosion_radius: 0,
            bomb_timer: 0,
            turn: 0,
            players: BTreeMap::new(),
            player_positions: BTreeMap::new(),
            blocks: BTreeSet::new(),
            active_bombs: BTreeMap::new(),
            explosions: BTreeSet::new(),
            scores: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// GUI input → server action. Until a game starts, any input is read as
    /// the player wanting in; the server ignores repeat Joins anyway.
    pub fn translate_input(&self, input: &InputMessage) -> ClientMessage {
        if self.phase == Phase::Lobby {
            return ClientMessage::Join {
                name: self.player_name.clone(),
            };
        }
        match input {
            InputMessage::PlaceBomb => ClientMessage::PlaceBomb,
            InputMessage::PlaceBlock => ClientMessage::PlaceBlock,
            InputMessage::Move { direction } => ClientMessage::Move {
                direction: *direction,
            },
        }
    }

    /// Folds one server message and returns the snapshot to forward to the
    /// GUI, or None for GameStarted (absorbed silently).
    pub fn apply(&mut self, message: ServerMessage) -> Option<DrawMessage> {
        match message {
            ServerMessage::Hello {
                server_name,
                player_count,
                size_x,
                size_y,
                game_length,
                explosion_radius,
                bomb_timer,
            } => {
                self.server_name = server_name;
                self.player_count = player_count;
                self.size_x = size_x;
                self.size_y = size_y;
                self.game_length = game_length;
                self.explosion_radius = explosion_radius;
                self.bomb_timer = bomb_timer;
            }
            ServerMessage::AcceptedPlayer { id, player } => {
                self.players.insert(id, player);
                self.scores.insert(id, 0);
            }
            ServerMessage::GameStarted { players } => {
                self.phase = Phase::Game;
                self.players = players;
                self.player_positions.clear();
                self.blocks.clear();
                self.scores = self.players.keys().map(|&id| (id, 0)).collect();
                return None;
            }
            ServerMessage::Turn { turn, events } => self.apply_turn(turn, events),
            ServerMessage::GameEnded { scores } => {
                self.phase = Phase::Lobby;
                self.active_bombs.clear();
                self.player_positions.clear();
                self.blocks.clear();
                self.scores = scores;
            }
        }
        Some(self.snapshot())
    }

    fn apply_turn(&mut self, turn: u16, events: Vec<Event>) {
        // Live bombs count down before this turn's events land, so a bomb
        // placed this turn keeps its full fuse.
        for bomb in self.active_bombs.values_mut() {
            bomb.timer = bomb.timer.saturating_sub(1);
        }
        self.explosions.clear();
        self.turn = turn;

        let mut players_lost: BTreeSet<PlayerId> = BTreeSet::new();
        let mut blocks_lost: BTreeSet<Position> = BTreeSet::new();
        for event in events {
            match event {
                Event::BombPlaced { id, position } => {
                    self.active_bombs.insert(
                        id,
                        Bomb {
                            position,
                            timer: self.bomb_timer,
                        },
                    );
                }
                Event::BombExploded {
                    id,
                    players_destroyed,
                    blocks_destroyed,
                } => {
                    if let Some(bomb) = self.active_bombs.remove(&id) {
                        self.trace_explosion(bomb.position);
                    } else {
                        debug!("explosion for unknown bomb {}", id);
                    }
                    players_lost.extend(players_destroyed);
                    blocks_lost.extend(blocks_destroyed);
                }
                Event::PlayerMoved { id, position } => {
                    self.player_positions.insert(id, position);
                }
                Event::BlockPlaced { position } => {
                    self.blocks.insert(position);
                }
            }
        }

        for id in players_lost {
            *self.scores.entry(id).or_insert(0) += 1;
        }
        for block in blocks_lost {
            self.blocks.remove(&block);
        }
    }

    /// Marks every cell the blast reaches. The bomb's own cell always burns;
    /// if it holds a block the blast spreads no further, otherwise each ray
    /// stops on (and includes) its first block. Blocks destroyed this turn
    /// still stop rays, because removals apply after all events.
    fn trace_explosion(&mut self, center: Position) {
        self.explosions.insert(center);
        if self.blocks.contains(&center) {
            return;
        }
        for ray in explosion_rays(center, self.explosion_radius, self.size_x, self.size_y) {
            for cell in ray {
                self.explosions.insert(cell);
                if self.blocks.contains(&cell) {
                    break;
                }
            }
        }
    }

    fn snapshot(&self) -> DrawMessage {
        match self.phase {
            Phase::Lobby => DrawMessage::Lobby {
                server_name: self.server_name.clone(),
                player_count: self.player_count,
                size_x: self.size_x,
                size_y: self.size_y,
                game_length: self.game_length,
                explosion_radius: self.explosion_radius,
                bomb_timer: self.bomb_timer,
                players: self.players.clone(),
            },
            Phase::Game => DrawMessage::Game {
                server_name: self.server_name.clone(),
                size_x: self.size_x,
                size_y: self.size_y,
                game_length: self.game_length,
                turn: self.turn,
                players: self.players.clone(),
                player_positions: self.player_positions.clone(),
                blocks: self.blocks.clone(),
                bombs: self.active_bombs.values().copied().collect(),
                explosions: self.explosions.clone(),
                scores: self.scores.clone(),
            },
        }
    }
}
