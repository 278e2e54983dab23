//! Domain records shared by every message family.

use crate::wire::{ReadBuffer, Wire, WireError, WriteBuffer};

/// Players are numbered 0..player_count-1 in join order.
pub type PlayerId = u8;
/// Bombs are numbered from 0 in placement order.
pub type BombId = u32;

/// A cell on the board. (0, 0) is the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub x: u16,
    pub y: u16,
}

/// A seated player as announced to every client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Player {
    pub name: String,
    pub address: String,
}

/// A live bomb with the number of turns left on its fuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bomb {
    pub position: Position,
    pub timer: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}

/// One thing that happened during a turn, broadcast as part of the turn's
/// event list. Clients fold these into their draw state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BombPlaced {
        id: BombId,
        position: Position,
    },
    BombExploded {
        id: BombId,
        players_destroyed: Vec<PlayerId>,
        blocks_destroyed: Vec<Position>,
    },
    PlayerMoved {
        id: PlayerId,
        position: Position,
    },
    BlockPlaced {
        position: Position,
    },
}

/// The four axial rays out of `center`, in Up/Right/Down/Left order. Each ray
/// lists its cells in walking order, excludes the center itself and is
/// clipped to the board and capped at `radius` cells. Both the server's
/// destruction pass and the client's draw-state ray-cast walk these, each
/// applying its own stop-at-block rule.
pub fn explosion_rays(
    center: Position,
    radius: u16,
    size_x: u16,
    size_y: u16,
) -> [Vec<Position>; 4] {
    let up = (1..=radius)
        .map_while(|step| {
            let y = u32::from(center.y) + u32::from(step);
            (y < u32::from(size_y)).then(|| Position {
                x: center.x,
                y: y as u16,
            })
        })
        .collect();
    let right = (1..=radius)
        .map_while(|step| {
            let x = u32::from(center.x) + u32::from(step);
            (x < u32::from(size_x)).then(|| Position {
                x: x as u16,
                y: center.y,
            })
        })
        .collect();
    let down = (1..=radius)
        .map_while(|step| center.y.checked_sub(step).map(|y| Position { x: center.x, y }))
        .collect();
    let left = (1..=radius)
        .map_while(|step| center.x.checked_sub(step).map(|x| Position { x, y: center.y }))
        .collect();
    [up, right, down, left]
}

impl Wire for Position {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        Ok(Self {
            x: reader.read_u16()?,
            y: reader.read_u16()?,
        })
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        writer.write_u16(self.x)?;
        writer.write_u16(self.y)
    }
}

impl Wire for Player {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        Ok(Self {
            name: String::decode(reader)?,
            address: String::decode(reader)?,
        })
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        self.name.encode(writer)?;
        self.address.encode(writer)
    }
}

impl Wire for Bomb {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        Ok(Self {
            position: Position::decode(reader)?,
            timer: reader.read_u16()?,
        })
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        self.position.encode(writer)?;
        writer.write_u16(self.timer)
    }
}

impl Wire for Direction {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        match reader.read_u8()? {
            0 => Ok(Direction::Up),
            1 => Ok(Direction::Right),
            2 => Ok(Direction::Down),
            3 => Ok(Direction::Left),
            tag => Err(WireError::BadType(tag)),
        }
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        writer.write_u8(*self as u8)
    }
}

impl Wire for Event {
    fn decode<R: ReadBuffer>(reader: &mut R) -> Result<Self, WireError> {
        match reader.read_u8()? {
            0 => Ok(Event::BombPlaced {
                id: reader.read_u32()?,
                position: Position::decode(reader)?,
            }),
            1 => Ok(Event::BombExploded {
                id: reader.read_u32()?,
                players_destroyed: Vec::decode(reader)?,
                blocks_destroyed: Vec::decode(reader)?,
            }),
            2 => Ok(Event::PlayerMoved {
                id: reader.read_u8()?,
                position: Position::decode(reader)?,
            }),
            3 => Ok(Event::BlockPlaced {
                position: Position::decode(reader)?,
            }),
            tag => Err(WireError::BadType(tag)),
        }
    }

    fn encode<W: WriteBuffer>(&self, writer: &mut W) -> Result<(), WireError> {
        match self {
            Event::BombPlaced { id, position } => {
                writer.write_u8(0)?;
                writer.write_u32(*id)?;
                position.encode(writer)
            }
            Event::BombExploded {
                id,
                players_destroyed,
                blocks_destroyed,
            } => {
                writer.write_u8(1)?;
                writer.write_u32(*id)?;
                players_destroyed.encode(writer)?;
                blocks_destroyed.encode(writer)
            }
            Event::PlayerMoved { id, position } => {
                writer.write_u8(2)?;
                writer.write_u8(*id)?;
                position.encode(writer)
            }
            Event::BlockPlaced { position } => {
                writer.write_u8(3)?;
                position.encode(writer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: u16, y: u16) -> Position {
        Position { x, y }
    }

    #[test]
    fn test_position_order_is_x_then_y() {
        assert!(pos(1, 9) < pos(2, 0));
        assert!(pos(1, 1) < pos(1, 2));
    }

    #[test]
    fn test_player_order_is_name_then_address() {
        let a = Player {
            name: "a".into(),
            address: "z".into(),
        };
        let b = Player {
            name: "b".into(),
            address: "a".into(),
        };
        assert!(a < b);
    }

    #[test]
    fn test_rays_clip_to_board() {
        let [up, right, down, left] = explosion_rays(pos(0, 0), 3, 2, 5);
        assert_eq!(up, vec![pos(0, 1), pos(0, 2), pos(0, 3)]);
        assert_eq!(right, vec![pos(1, 0)]);
        assert!(down.is_empty());
        assert!(left.is_empty());
    }

    #[test]
    fn test_rays_cap_at_radius() {
        let [up, right, down, left] = explosion_rays(pos(5, 5), 2, 100, 100);
        assert_eq!(up, vec![pos(5, 6), pos(5, 7)]);
        assert_eq!(right, vec![pos(6, 5), pos(7, 5)]);
        assert_eq!(down, vec![pos(5, 4), pos(5, 3)]);
        assert_eq!(left, vec![pos(4, 5), pos(3, 5)]);
    }

    #[test]
    fn test_rays_with_zero_radius_are_empty() {
        let rays = explosion_rays(pos(3, 3), 0, 8, 8);
        assert!(rays.iter().all(|ray| ray.is_empty()));
    }
}
