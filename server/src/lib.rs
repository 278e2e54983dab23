//! # Game Server Library
//!
//! The authoritative half of the bomber game: it owns the only true copy of
//! the board, collects player actions over TCP and broadcasts every change
//! back to all connected clients as turn deltas.
//!
//! The crate splits into three modules:
//!
//! - [`random`] — the seeded Park–Miller generator behind every placement
//!   roll, so a seed replays a game exactly;
//! - [`game`] — the single-writer simulation: joins, bombs, explosions,
//!   movement and scoring;
//! - [`network`] — blocking-I/O concurrency around the simulation: the
//!   accept loop, a listener and an emitter thread per connection, the
//!   totally-ordered broadcast fanout with late-join replay, and shutdown.

pub mod game;
pub mod network;
pub mod random;
