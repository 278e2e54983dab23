//! The four top-level message families.
//!
//! Tags are a single leading byte. `ClientMessage` flows client→server over
//! TCP, `ServerMessage` server→client over TCP, `InputMessage` GUI→client
//! over UDP and `DrawMessage` client→GUI over UDP.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Bomb, Direction, Event, Player, PlayerId, Position};
use crate::wire::{ReadBuffer, Wire, WireError, WriteBuffer};

/// What a player asks the server to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Join { name: String },
    PlaceBomb,
    PlaceBlock,
    Move { direction: Direction },
}

/// What the server tells every client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Hello {
        server_name: String,
        player_count: u8,
        size_x: u16,
        size_y: u16,
        game_length: u16,
        explosion_radius: u16,
        bomb_timer: u16,
    },
    AcceptedPlayer {
        id: PlayerId,
        player: Player,
    },
    GameStarted {
        players: BTreeMap<PlayerId, Player>,
    },
    Turn {
        turn: u16,
        events: Vec<Event>,
    },
    GameEnded {
        scores: BTreeMap<PlayerId, u32>,
    },
}

/// What the GUI asks the client to do. In the lobby any of these turns into
/// a Join; in a game they pass through to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMessage {
    PlaceBomb,
    PlaceBlock,
    Move { direction: Direction },
}

/// The full picture the GUI draws, sent after every folded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawMessage {
    Lobby {
        server_name: String,
        player_count: u8,
        size_x: u16,
        size_y: u16,
        game_length: u16,
        explosion_radius: u16,
        bomb_timer: u16,
        players: BTreeMap<PlayerId, Player>,
    },
    Game {
        server_name: String,
        size_x: u16,
        size_y: u16,
        game_length: u16,
        turn: u16,
        players: BTreeMap<PlayerId, Player>,
        player_positions: BTreeMap<PlayerId, Position>,
        blocks: BTreeSet<Position>,
        bombs: Vec<Bomb>,
        explosions: BTreeSet<Position>,
        scores: BTreeMap<PlayerId, u32>,
    },
}

impl Wire for ClientMessage {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        match reader.read_u8()? {
            0 => Ok(ClientMessage::Join {
                name: String::decode(reader)?,
            }),
            1 => Ok(ClientMessage::PlaceBomb),
            2 => Ok(ClientMessage::PlaceBlock),
            3 => Ok(ClientMessage::Move {
                direction: Direction::decode(reader)?,
            }),
            tag => Err(WireError::BadType(tag)),
        }
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        match self {
            ClientMessage::Join { name } => {
                writer.write_u8(0)?;
                name.encode(writer)
            }
            ClientMessage::PlaceBomb => writer.write_u8(1),
            ClientMessage::PlaceBlock => writer.write_u8(2),
            ClientMessage::Move { direction } => {
                writer.write_u8(3)?;
                direction.encode(writer)
            }
        }
    }
}

impl Wire for ServerMessage {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        match reader.read_u8()? {
            0 => Ok(ServerMessage::Hello {
                server_name: String::decode(reader)?,
                player_count: reader.read_u8()?,
                size_x: reader.read_u16()?,
                size_y: reader.read_u16()?,
                game_length: reader.read_u16()?,
                explosion_radius: reader.read_u16()?,
                bomb_timer: reader.read_u16()?,
            }),
            1 => Ok(ServerMessage::AcceptedPlayer {
                id: reader.read_u8()?,
                player: Player::decode(reader)?,
            }),
            2 => Ok(ServerMessage::GameStarted {
                players: BTreeMap::decode(reader)?,
            }),
            3 => Ok(ServerMessage::Turn {
                turn: reader.read_u16()?,
                events: Vec::decode(reader)?,
            }),
            4 => Ok(ServerMessage::GameEnded {
                scores: BTreeMap::decode(reader)?,
            }),
            tag => Err(WireError::BadType(tag)),
        }
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        match self {
            ServerMessage::Hello {
                server_name,
                player_count,
                size_x,
                size_y,
                game_length,
                explosion_radius,
                bomb_timer,
            } => {
                writer.write_u8(0)?;
                server_name.encode(writer)?;
                writer.write_u8(*player_count)?;
                writer.write_u16(*size_x)?;
                writer.write_u16(*size_y)?;
                writer.write_u16(*game_length)?;
                writer.write_u16(*explosion_radius)?;
                writer.write_u16(*bomb_timer)
            }
            ServerMessage::AcceptedPlayer { id, player } => {
                writer.write_u8(1)?;
                writer.write_u8(*id)?;
                player.encode(writer)
            }
            ServerMessage::GameStarted { players } => {
                writer.write_u8(2)?;
                players.encode(writer)
            }
            ServerMessage::Turn { turn, events } => {
                writer.write_u8(3)?;
                writer.write_u16(*turn)?;
                events.encode(writer)
            }
            ServerMessage::GameEnded { scores } => {
                writer.write_u8(4)?;
                scores.encode(writer)
            }
        }
    }
}

impl Wire for InputMessage {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        match reader.read_u8()? {
            0 => Ok(InputMessage::PlaceBomb),
            1 => Ok(InputMessage::PlaceBlock),
            2 => Ok(InputMessage::Move {
                direction: Direction::decode(reader)?,
            }),
            tag => Err(WireError::BadType(tag)),
        }
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        match self {
            InputMessage::PlaceBomb => writer.write_u8(0),
            InputMessage::PlaceBlock => writer.write_u8(1),
            InputMessage::Move { direction } => {
                writer.write_u8(2)?;
                direction.encode(writer)
            }
        }
    }
}

impl Wire for DrawMessage {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        match reader.read_u8()? {
            0 => Ok(DrawMessage::Lobby {
                server_name: String::decode(reader)?,
                player_count: reader.read_u8()?,
                size_x: reader.read_u16()?,
                size_y: reader.read_u16()?,
                game_length: reader.read_u16()?,
                explosion_radius: reader.read_u16()?,
                bomb_timer: reader.read_u16()?,
                players: BTreeMap::decode(reader)?,
            }),
            1 => Ok(DrawMessage::Game {
                server_name: String::decode(reader)?,
                size_x: reader.read_u16()?,
                size_y: reader.read_u16()?,
                game_length: reader.read_u16()?,
                turn: reader.read_u16()?,
                players: BTreeMap::decode(reader)?,
                player_positions: BTreeMap::decode(reader)?,
                blocks: BTreeSet::decode(reader)?,
                bombs: Vec::decode(reader)?,
                explosions: BTreeSet::decode(reader)?,
                scores: BTreeMap::decode(reader)?,
            }),
            tag => Err(WireError::BadType(tag)),
        }
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        match self {
            DrawMessage::Lobby {
                server_name,
                player_count,
                size_x,
                size_y,
                game_length,
                explosion_radius,
                bomb_timer,
                players,
            } => {
                writer.write_u8(0)?;
                server_name.encode(writer)?;
                writer.write_u8(*player_count)?;
                writer.write_u16(*size_x)?;
                writer.write_u16(*size_y)?;
                writer.write_u16(*game_length)?;
                writer.write_u16(*explosion_radius)?;
                writer.write_u16(*bomb_timer)?;
                players.encode(writer)
            }
            DrawMessage::Game {
                server_name,
                size_x,
                size_y,
                game_length,
                turn,
                players,
                player_positions,
                blocks,
                bombs,
                explosions,
                scores,
            } => {
                writer.write_u8(1)?;
                server_name.encode(writer)?;
                writer.write_u16(*size_x)?;
                writer.write_u16(*size_y)?;
                writer.write_u16(*game_length)?;
                writer.write_u16(*turn)?;
                players.encode(writer)?;
                player_positions.encode(writer)?;
                blocks.encode(writer)?;
                bombs.encode(writer)?;
                explosions.encode(writer)?;
                scores.encode(writer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{TcpReadBuffer, TcpWriteBuffer};

    fn encode_to_vec<T: Wire>(value: &T) -> Vec<u8> {
        let mut writer = TcpWriteBuffer::new(Vec::new());
        value.encode(&mut writer).unwrap();
        writer.force_send().unwrap();
        writer.into_inner()
    }

    fn decode_from_slice<T: Wire>(bytes: &[u8]) -> Result<T, WireError> {
        let mut reader = TcpReadBuffer::new(bytes);
        T::decode(&mut reader)
    }

    fn roundtrip<T: Wire + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = encode_to_vec(&value);
        assert_eq!(decode_from_slice::<T>(&bytes).unwrap(), value);
    }

    fn pos(x: u16, y: u16) -> Position {
        Position { x, y }
    }

    fn sample_player(name: &str) -> Player {
        Player {
            name: name.to_string(),
            address: "[::1]:4242".to_string(),
        }
    }

    #[test]
    fn test_hello_wire_layout() {
        let hello = ServerMessage::Hello {
            server_name: "srv".to_string(),
            player_count: 2,
            size_x: 10,
            size_y: 10,
            game_length: 5,
            explosion_radius: 2,
            bomb_timer: 3,
        };
        let bytes = encode_to_vec(&hello);
        assert_eq!(
            bytes,
            vec![
                0x00, 0x03, 0x73, 0x72, 0x76, 0x02, 0x00, 0x0A, 0x00, 0x0A, 0x00, 0x05, 0x00,
                0x02, 0x00, 0x03
            ]
        );
        assert_eq!(decode_from_slice::<ServerMessage>(&bytes).unwrap(), hello);
    }

    #[test]
    fn test_client_message_roundtrips() {
        roundtrip(ClientMessage::Join {
            name: "alice".to_string(),
        });
        roundtrip(ClientMessage::PlaceBomb);
        roundtrip(ClientMessage::PlaceBlock);
        roundtrip(ClientMessage::Move {
            direction: Direction::Left,
        });
    }

    #[test]
    fn test_place_bomb_is_a_single_tag_byte() {
        assert_eq!(encode_to_vec(&ClientMessage::PlaceBomb), vec![0x01]);
    }

    #[test]
    fn test_server_message_roundtrips() {
        roundtrip(ServerMessage::AcceptedPlayer {
            id: 3,
            player: sample_player("bob"),
        });
        roundtrip(ServerMessage::GameStarted {
            players: BTreeMap::from([(0, sample_player("a")), (1, sample_player("b"))]),
        });
        roundtrip(ServerMessage::Turn {
            turn: 17,
            events: vec![
                Event::BombPlaced {
                    id: 4,
                    position: pos(1, 2),
                },
                Event::BombExploded {
                    id: 4,
                    players_destroyed: vec![0, 2],
                    blocks_destroyed: vec![pos(1, 3)],
                },
                Event::PlayerMoved {
                    id: 1,
                    position: pos(6, 6),
                },
                Event::BlockPlaced { position: pos(0, 0) },
            ],
        });
        roundtrip(ServerMessage::GameEnded {
            scores: BTreeMap::from([(0, 2), (1, 0)]),
        });
    }

    #[test]
    fn test_input_message_roundtrips() {
        roundtrip(InputMessage::PlaceBomb);
        roundtrip(InputMessage::PlaceBlock);
        roundtrip(InputMessage::Move {
            direction: Direction::Up,
        });
    }

    #[test]
    fn test_draw_message_roundtrips() {
        roundtrip(DrawMessage::Lobby {
            server_name: "srv".to_string(),
            player_count: 4,
            size_x: 16,
            size_y: 16,
            game_length: 100,
            explosion_radius: 3,
            bomb_timer: 5,
            players: BTreeMap::from([(0, sample_player("a"))]),
        });
        roundtrip(DrawMessage::Game {
            server_name: "srv".to_string(),
            size_x: 16,
            size_y: 16,
            game_length: 100,
            turn: 42,
            players: BTreeMap::from([(0, sample_player("a")), (1, sample_player("b"))]),
            player_positions: BTreeMap::from([(0, pos(1, 1)), (1, pos(2, 2))]),
            blocks: BTreeSet::from([pos(3, 3), pos(4, 4)]),
            bombs: vec![Bomb {
                position: pos(5, 5),
                timer: 2,
            }],
            explosions: BTreeSet::from([pos(5, 5), pos(5, 6)]),
            scores: BTreeMap::from([(0, 1), (1, 3)]),
        });
    }

    #[test]
    fn test_out_of_range_tags_are_bad_type() {
        assert!(matches!(
            decode_from_slice::<ClientMessage>(&[4]),
            Err(WireError::BadType(4))
        ));
        assert!(matches!(
            decode_from_slice::<ServerMessage>(&[5]),
            Err(WireError::BadType(5))
        ));
        assert!(matches!(
            decode_from_slice::<InputMessage>(&[3]),
            Err(WireError::BadType(3))
        ));
        assert!(matches!(
            decode_from_slice::<DrawMessage>(&[2]),
            Err(WireError::BadType(2))
        ));
        assert!(matches!(
            decode_from_slice::<Direction>(&[4]),
            Err(WireError::BadType(4))
        ));
        assert!(matches!(
            decode_from_slice::<Event>(&[9]),
            Err(WireError::BadType(9))
        ));
    }

    #[test]
    fn test_bad_tag_consumes_only_the_tag_byte() {
        let mut reader = TcpReadBuffer::new(&[7u8, 1, 2, 3][..]);
        assert!(matches!(
            InputMessage::decode(&mut reader),
            Err(WireError::BadType(7))
        ));
        // The bytes after the rejected tag are still there.
        assert_eq!(reader.read_u8().unwrap(), 1);
    }

    #[test]
    fn test_truncated_message_is_bad_read() {
        let bytes = encode_to_vec(&ServerMessage::GameStarted {
            players: BTreeMap::from([(0, sample_player("a"))]),
        });
        assert!(matches!(
            decode_from_slice::<ServerMessage>(&bytes[..bytes.len() - 1]),
            Err(WireError::BadRead)
        ));
    }
}
