//! Shared protocol library for the bomber game client and server.
//!
//! This crate holds everything both executables must agree on:
//!
//! - the buffered wire transport ([`wire`]): big-endian integer framing over
//!   a coalescing TCP stream buffer and a one-message-per-datagram UDP
//!   buffer;
//! - the domain records ([`types`]): positions, players, bombs, directions
//!   and the turn events the server broadcasts;
//! - the four top-level message families ([`messages`]) exchanged on the
//!   GUI↔client (UDP) and client↔server (TCP) links.
//!
//! Every message is self-describing: a leading tag byte selects the variant
//! and the fields follow in a fixed order. Decoding an out-of-range tag
//! fails with [`wire::WireError::BadType`]; how fatal that is depends on the
//! transport (TCP connections die, UDP datagrams are dropped).

pub mod messages;
pub mod types;
pub mod wire;

pub use messages::{ClientMessage, DrawMessage, InputMessage, ServerMessage};
pub use types::{explosion_rays, Bomb, BombId, Direction, Event, Player, PlayerId, Position};
pub use wire::{
    ReadBuffer, TcpReadBuffer, TcpWriteBuffer, UdpReadBuffer, UdpWriteBuffer, Wire, WireError,
    WriteBuffer, TCP_BUFFER_SIZE, UDP_BUFFER_SIZE,
};
