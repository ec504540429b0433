//! Vehicle Combat - authoritative multiplayer vehicle combat simulation
//!
//! The library holds everything both binaries share:
//! - `net`: framing, wire messages, sessions and per-connection I/O
//! - `game`: physics, vehicles, weapons and the world tick
//! - `sim`: the fixed-rate server and client loops
//! - `http`: health and status endpoints

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod input;
pub mod net;
pub mod sim;
pub mod util;
