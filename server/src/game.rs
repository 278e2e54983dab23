//! The authoritative simulation. Exactly one thread (the service loop)
//! mutates an [`Engine`]; everything it produces is a `ServerMessage` ready
//! for broadcast.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use log::{debug, info};
use shared::{
    explosion_rays, BombId, ClientMessage, Direction, Event, Player, PlayerId, Position,
    ServerMessage,
};

use crate::random::Lcg;

/// Simulation parameters fixed at startup.
#[derive(Debug, Clone)]
pub struct Rules {
    pub server_name: String,
    pub player_count: u8,
    pub size_x: u16,
    pub size_y: u16,
    pub game_length: u16,
    pub explosion_radius: u16,
    pub bomb_timer: u16,
    pub initial_blocks: u16,
}

impl Rules {
    /// The greeting every connection receives the moment it is accepted.
    pub fn hello(&self) -> ServerMessage {
        ServerMessage::Hello {
            server_name: self.server_name.clone(),
            player_count: self.player_count,
            size_x: self.size_x,
            size_y: self.size_y,
            game_length: self.game_length,
            explosion_radius: self.explosion_radius,
            bomb_timer: self.bomb_timer,
        }
    }
}

/// A bomb on the schedule, ordered by explosion turn then placement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledBomb {
    explodes_at: u16,
    id: BombId,
    position: Position,
}

#[derive(Debug)]
struct JoinedPlayer {
    player: Player,
    position: Position,
}

pub struct Engine {
    rules: Rules,
    rng: Lcg,
    players: Vec<JoinedPlayer>,
    scores: BTreeMap<PlayerId, u32>,
    blocks: BTreeSet<Position>,
    bombs: BinaryHeap<Reverse<ScheduledBomb>>,
    next_bomb_id: BombId,
    players_at: BTreeMap<Position, BTreeSet<PlayerId>>,
    destroyed_players: BTreeSet<PlayerId>,
    destroyed_blocks: BTreeSet<Position>,
}

impl Engine {
    pub fn new(rules: Rules, seed: u32) -> Self {
        Self {
            rules,
            rng: Lcg::new(seed),
            players: Vec::new(),
            scores: BTreeMap::new(),
            blocks: BTreeSet::new(),
            bombs: BinaryHeap::new(),
            next_bomb_id: 0,
            players_at: BTreeMap::new(),
            destroyed_players: BTreeSet::new(),
            destroyed_blocks: BTreeSet::new(),
        }
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn lobby_full(&self) -> bool {
        self.players.len() >= usize::from(self.rules.player_count)
    }

    /// Seats the next player and returns the AcceptedPlayer broadcast.
    pub fn join(&mut self, name: String, address: String) -> ServerMessage {
        let id = self.players.len() as PlayerId;
        let player = Player { name, address };
        info!("player {} joined as {}", id, player.name);
        self.players.push(JoinedPlayer {
            player: player.clone(),
            position: Position { x: 0, y: 0 },
        });
        ServerMessage::AcceptedPlayer { id, player }
    }

    /// Opens a game: places every player, rolls the initial blocks and
    /// returns the GameStarted/Turn-0 pair. Duplicate block draws are
    /// skipped silently, so fewer than `initial_blocks` events may appear.
    pub fn start(&mut self) -> (ServerMessage, ServerMessage) {
        let players: BTreeMap<PlayerId, Player> = self
            .players
            .iter()
            .enumerate()
            .map(|(id, seat)| (id as PlayerId, seat.player.clone()))
            .collect();

        let mut events = Vec::new();
        for id in 0..self.players.len() {
            let position = self.random_position();
            self.players[id].position = position;
            self.players_at.entry(position).or_default().insert(id as PlayerId);
            self.scores.insert(id as PlayerId, 0);
            events.push(Event::PlayerMoved {
                id: id as PlayerId,
                position,
            });
        }
        for _ in 0..self.rules.initial_blocks {
            let position = self.random_position();
            if self.blocks.insert(position) {
                events.push(Event::BlockPlaced { position });
            }
        }

        info!("game started with {} players", self.players.len());
        (
            ServerMessage::GameStarted { players },
            ServerMessage::Turn { turn: 0, events },
        )
    }

    /// Runs one turn: explosions first, then player actions in ascending id
    /// order. `take_action` yields (and thereby consumes) each seat's
    /// pending message; it is called for destroyed players too, whose
    /// pending action is discarded while they respawn.
    pub fn tick(
        &mut self,
        turn: u16,
        mut take_action: impl FnMut(PlayerId) -> Option<ClientMessage>,
    ) -> ServerMessage {
        self.destroyed_players.clear();
        self.destroyed_blocks.clear();

        let mut events = Vec::new();
        self.explode_due_bombs(turn, &mut events);

        for id in 0..self.players.len() {
            let id = id as PlayerId;
            let action = take_action(id);
            if self.destroyed_players.contains(&id) {
                self.respawn(id, &mut events);
            } else if let Some(message) = action {
                self.apply_action(id, message, turn, &mut events);
            }
        }

        debug!("turn {} produced {} events", turn, events.len());
        ServerMessage::Turn { turn, events }
    }

    /// Final scoreboard, keyed by player id.
    pub fn end(&mut self) -> ServerMessage {
        info!("game over, final scores: {:?}", self.scores);
        ServerMessage::GameEnded {
            scores: self.scores.clone(),
        }
    }

    /// Clears per-game state. Bomb ids and the RNG sequence deliberately
    /// continue across games.
    pub fn reset(&mut self) {
        self.players.clear();
        self.scores.clear();
        self.blocks.clear();
        self.bombs.clear();
        self.players_at.clear();
        self.destroyed_players.clear();
        self.destroyed_blocks.clear();
    }

    fn random_position(&mut self) -> Position {
        let x = (self.rng.draw() % u64::from(self.rules.size_x)) as u16;
        let y = (self.rng.draw() % u64::from(self.rules.size_y)) as u16;
        Position { x, y }
    }

    /// Pops every bomb scheduled for this turn and ray-casts its blast. The
    /// bomb's own cell burns first; if it holds a block the blast spreads no
    /// further, otherwise each ray stops on (and includes) its first block.
    /// Destroyed blocks leave the board only after all of this turn's
    /// explosions have been traced.
    fn explode_due_bombs(&mut self, turn: u16, events: &mut Vec<Event>) {
        while let Some(Reverse(bomb)) = self.bombs.peek().copied() {
            if bomb.explodes_at > turn {
                break;
            }
            self.bombs.pop();

            let mut players_destroyed = Vec::new();
            let mut blocks_destroyed = Vec::new();
            if self.burn_cell(bomb.position, &mut players_destroyed, &mut blocks_destroyed) {
                let rays = explosion_rays(
                    bomb.position,
                    self.rules.explosion_radius,
                    self.rules.size_x,
                    self.rules.size_y,
                );
                for ray in rays {
                    for cell in ray {
                        if !self.burn_cell(cell, &mut players_destroyed, &mut blocks_destroyed) {
                            break;
                        }
                    }
                }
            }
            events.push(Event::BombExploded {
                id: bomb.id,
                players_destroyed,
                blocks_destroyed,
            });
        }

        for block in &self.destroyed_blocks {
            self.blocks.remove(block);
        }
    }

    /// Burns one cell; returns false when a block absorbs the blast there.
    fn burn_cell(
        &mut self,
        cell: Position,
        players_destroyed: &mut Vec<PlayerId>,
        blocks_destroyed: &mut Vec<Position>,
    ) -> bool {
        if let Some(ids) = self.players_at.get(&cell) {
            for &id in ids {
                players_destroyed.push(id);
                self.destroyed_players.insert(id);
            }
        }
        if self.blocks.contains(&cell) {
            blocks_destroyed.push(cell);
            self.destroyed_blocks.insert(cell);
            return false;
        }
        true
    }

    fn respawn(&mut self, id: PlayerId, events: &mut Vec<Event>) {
        let old = self.players[usize::from(id)].position;
        let position = self.random_position();
        self.move_player(id, old, position);
        *self.scores.entry(id).or_insert(0) += 1;
        events.push(Event::PlayerMoved { id, position });
    }

    fn apply_action(
        &mut self,
        id: PlayerId,
        message: ClientMessage,
        turn: u16,
        events: &mut Vec<Event>,
    ) {
        let position = self.players[usize::from(id)].position;
        match message {
            ClientMessage::PlaceBomb => {
                let bomb_id = self.next_bomb_id;
                self.next_bomb_id += 1;
                self.bombs.push(Reverse(ScheduledBomb {
                    explodes_at: turn.saturating_add(self.rules.bomb_timer),
                    id: bomb_id,
                    position,
                }));
                events.push(Event::BombPlaced {
                    id: bomb_id,
                    position,
                });
            }
            ClientMessage::PlaceBlock => {
                if self.blocks.insert(position) {
                    events.push(Event::BlockPlaced { position });
                }
            }
            ClientMessage::Move { direction } => {
                if let Some(target) = self.step(position, direction) {
                    if !self.blocks.contains(&target) {
                        self.move_player(id, position, target);
                        events.push(Event::PlayerMoved {
                            id,
                            position: target,
                        });
                    }
                }
            }
            // Joins only mean something in the lobby.
            ClientMessage::Join { .. } => {}
        }
    }

    fn move_player(&mut self, id: PlayerId, from: Position, to: Position) {
        if let Some(ids) = self.players_at.get_mut(&from) {
            ids.remove(&id);
            if ids.is_empty() {
                self.players_at.remove(&from);
            }
        }
        self.players_at.entry(to).or_default().insert(id);
        self.players[usize::from(id)].position = to;
    }

    /// Target cell for a move, or None when it would leave the board.
    fn step(&self, from: Position, direction: Direction) -> Option<Position> {
        let Position { x, y } = from;
        match direction {
            Direction::Up => (y + 1 < self.rules.size_y).then(|| Position { x, y: y + 1 }),
            Direction::Down => y.checked_sub(1).map(|y| Position { x, y }),
            Direction::Left => x.checked_sub(1).map(|x| Position { x, y }),
            Direction::Right => (x + 1 < self.rules.size_x).then(|| Position { x: x + 1, y }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: u16, y: u16) -> Position {
        Position { x, y }
    }

    fn rules(player_count: u8, size: u16) -> Rules {
        Rules {
            server_name: "test".to_string(),
            player_count,
            size_x: size,
            size_y: size,
            game_length: 10,
            explosion_radius: 3,
            bomb_timer: 2,
            initial_blocks: 1,
        }
    }

    fn engine_with_players(rules: Rules, seed: u32, count: u8) -> Engine {
        let mut engine = Engine::new(rules, seed);
        for i in 0..count {
            engine.join(format!("p{}", i), format!("addr{}", i));
        }
        engine
    }

    #[test]
    fn test_zero_seed_places_everything_at_origin() {
        let mut rules = rules(1, 16);
        rules.initial_blocks = 1;
        let mut engine = engine_with_players(rules, 0, 1);
        let (started, turn0) = engine.start();

        match started {
            ServerMessage::GameStarted { players } => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[&0].name, "p0");
            }
            other => panic!("expected GameStarted, got {:?}", other),
        }
        match turn0 {
            ServerMessage::Turn { turn, events } => {
                assert_eq!(turn, 0);
                assert_eq!(
                    events,
                    vec![
                        Event::PlayerMoved {
                            id: 0,
                            position: pos(0, 0)
                        },
                        Event::BlockPlaced { position: pos(0, 0) },
                    ]
                );
            }
            other => panic!("expected Turn, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_initial_block_draws_are_skipped() {
        // Seed 0 keeps drawing (0, 0), so only the first of many block
        // rolls produces an event.
        let mut rules = rules(1, 16);
        rules.initial_blocks = 5;
        let mut engine = engine_with_players(rules, 0, 1);
        let (_, turn0) = engine.start();
        match turn0 {
            ServerMessage::Turn { events, .. } => {
                let blocks = events
                    .iter()
                    .filter(|event| matches!(event, Event::BlockPlaced { .. }))
                    .count();
                assert_eq!(blocks, 1);
            }
            other => panic!("expected Turn, got {:?}", other),
        }
    }

    #[test]
    fn test_explosion_stops_at_blocks_inclusive() {
        let mut engine = Engine::new(rules(0, 5), 0);
        engine.blocks.insert(pos(2, 0));
        engine.blocks.insert(pos(4, 2));
        engine.bombs.push(Reverse(ScheduledBomb {
            explodes_at: 1,
            id: 0,
            position: pos(2, 2),
        }));

        let message = engine.tick(1, |_| None);
        match message {
            ServerMessage::Turn { events, .. } => {
                assert_eq!(events.len(), 1);
                match &events[0] {
                    Event::BombExploded {
                        id,
                        players_destroyed,
                        blocks_destroyed,
                    } => {
                        assert_eq!(*id, 0);
                        assert!(players_destroyed.is_empty());
                        // Rightward ray stops on (4, 2), downward on (2, 0);
                        // the other rays hit nothing.
                        assert_eq!(blocks_destroyed, &vec![pos(4, 2), pos(2, 0)]);
                    }
                    other => panic!("expected BombExploded, got {:?}", other),
                }
            }
            other => panic!("expected Turn, got {:?}", other),
        }
        assert!(engine.blocks.is_empty());
    }

    #[test]
    fn test_blocked_bomb_cell_stops_all_rays() {
        let mut engine = Engine::new(rules(0, 5), 0);
        engine.blocks.insert(pos(2, 2));
        engine.blocks.insert(pos(3, 2));
        engine.bombs.push(Reverse(ScheduledBomb {
            explodes_at: 1,
            id: 0,
            position: pos(2, 2),
        }));

        let message = engine.tick(1, |_| None);
        match message {
            ServerMessage::Turn { events, .. } => match &events[0] {
                Event::BombExploded {
                    blocks_destroyed, ..
                } => assert_eq!(blocks_destroyed, &vec![pos(2, 2)]),
                other => panic!("expected BombExploded, got {:?}", other),
            },
            other => panic!("expected Turn, got {:?}", other),
        }
        // Only the bomb cell's block burned.
        assert_eq!(engine.blocks, BTreeSet::from([pos(3, 2)]));
    }

    #[test]
    fn test_destroyed_player_respawns_and_scores() {
        let mut engine = engine_with_players(rules(1, 5), 0, 1);
        engine.start();
        // Seed 0 placed the player at (0, 0); detonate a bomb there.
        engine.bombs.push(Reverse(ScheduledBomb {
            explodes_at: 1,
            id: 0,
            position: pos(0, 0),
        }));

        let message = engine.tick(1, |_| Some(ClientMessage::PlaceBomb));
        match message {
            ServerMessage::Turn { events, .. } => {
                assert_eq!(events.len(), 2);
                assert!(matches!(
                    events[0],
                    Event::BombExploded { ref players_destroyed, .. }
                        if players_destroyed == &vec![0]
                ));
                // The pending PlaceBomb was consumed but not acted on; the
                // player respawned instead.
                assert!(matches!(events[1], Event::PlayerMoved { id: 0, .. }));
            }
            other => panic!("expected Turn, got {:?}", other),
        }
        assert_eq!(engine.scores[&0], 1);

        match engine.end() {
            ServerMessage::GameEnded { scores } => {
                assert_eq!(scores, BTreeMap::from([(0, 1)]));
            }
            other => panic!("expected GameEnded, got {:?}", other),
        }
    }

    #[test]
    fn test_bomb_is_scheduled_bomb_timer_turns_ahead() {
        let mut engine = engine_with_players(rules(1, 5), 0, 1);
        engine.start();

        let placed = engine.tick(1, |_| Some(ClientMessage::PlaceBomb));
        assert!(matches!(
            placed,
            ServerMessage::Turn { ref events, .. }
                if events == &vec![Event::BombPlaced { id: 0, position: pos(0, 0) }]
        ));

        // bomb_timer is 2: nothing on turn 2, detonation on turn 3.
        let quiet = engine.tick(2, |_| None);
        assert!(matches!(
            quiet,
            ServerMessage::Turn { ref events, .. } if events.is_empty()
        ));
        let boom = engine.tick(3, |_| None);
        match boom {
            ServerMessage::Turn { events, .. } => {
                assert!(matches!(events[0], Event::BombExploded { id: 0, .. }));
            }
            other => panic!("expected Turn, got {:?}", other),
        }
    }

    #[test]
    fn test_simultaneous_bombs_explode_in_placement_order() {
        let mut engine = engine_with_players(rules(2, 5), 0, 2);
        engine.start();

        engine.tick(1, |_| Some(ClientMessage::PlaceBomb));
        let boom = engine.tick(3, |_| None);
        match boom {
            ServerMessage::Turn { events, .. } => {
                let exploded: Vec<BombId> = events
                    .iter()
                    .filter_map(|event| match event {
                        Event::BombExploded { id, .. } => Some(*id),
                        _ => None,
                    })
                    .collect();
                assert_eq!(exploded, vec![0, 1]);
            }
            other => panic!("expected Turn, got {:?}", other),
        }
    }

    #[test]
    fn test_moves_respect_bounds_and_blocks() {
        let mut engine = engine_with_players(rules(1, 5), 0, 1);
        engine.start();
        // Player sits at (0, 0): moving down or left leaves the board.
        for direction in [Direction::Down, Direction::Left] {
            let message = engine.tick(1, |_| Some(ClientMessage::Move { direction }));
            assert!(matches!(
                message,
                ServerMessage::Turn { ref events, .. } if events.is_empty()
            ));
        }

        engine.blocks.insert(pos(1, 0));
        let blocked = engine.tick(2, |_| {
            Some(ClientMessage::Move {
                direction: Direction::Right,
            })
        });
        assert!(matches!(
            blocked,
            ServerMessage::Turn { ref events, .. } if events.is_empty()
        ));

        let moved = engine.tick(3, |_| {
            Some(ClientMessage::Move {
                direction: Direction::Up,
            })
        });
        assert!(matches!(
            moved,
            ServerMessage::Turn { ref events, .. }
                if events == &vec![Event::PlayerMoved { id: 0, position: pos(0, 1) }]
        ));
    }

    #[test]
    fn test_place_block_on_occupied_cell_is_silent() {
        let mut engine = engine_with_players(rules(1, 5), 0, 1);
        engine.start();

        let placed = engine.tick(1, |_| Some(ClientMessage::PlaceBlock));
        assert!(matches!(
            placed,
            ServerMessage::Turn { ref events, .. }
                if events == &vec![Event::BlockPlaced { position: pos(0, 0) }]
        ));
        let repeated = engine.tick(2, |_| Some(ClientMessage::PlaceBlock));
        assert!(matches!(
            repeated,
            ServerMessage::Turn { ref events, .. } if events.is_empty()
        ));
    }

    #[test]
    fn test_reset_keeps_bomb_ids_monotonic() {
        let mut engine = engine_with_players(rules(1, 5), 0, 1);
        engine.start();
        engine.tick(1, |_| Some(ClientMessage::PlaceBomb));
        engine.end();
        engine.reset();

        engine.join("again".to_string(), "addr".to_string());
        engine.start();
        let message = engine.tick(1, |_| Some(ClientMessage::PlaceBomb));
        assert!(matches!(
            message,
            ServerMessage::Turn { ref events, .. }
                if matches!(events[0], Event::BombPlaced { id: 1, .. })
        ));
    }

    #[test]
    fn test_scores_start_at_zero_for_every_player() {
        let mut engine = engine_with_players(rules(3, 5), 0, 3);
        engine.start();
        match engine.end() {
            ServerMessage::GameEnded { scores } => {
                assert_eq!(scores, BTreeMap::from([(0, 0), (1, 0), (2, 0)]));
            }
            other => panic!("expected GameEnded, got {:?}", other),
        }
    }
}
