//! # Shields Relay Server
//!
//! Authoritative relay for the Shields multiplayer game. The server does not
//! simulate anything; it validates who may speak, hands out entity ids and
//! forwards packets to the right players.
//!
//! ## Core Responsibilities
//!
//! ### Login Handshake
//! A player first sends TESTLOGIN. The server either answers with team
//! counts (query), refuses (version, invalid or taken name) or records a
//! pending registration and replies "!Server OK!" with a fresh id. Only
//! after that may the player's LOGIN and any other packet pass.
//!
//! ### Fan-out
//! Each packet kind has its own audience: MOVE goes to everyone except the
//! sender, chat commands only back to the sender, everything else to every
//! session. A joiner receives a synthesized LOGIN for every player already
//! present.
//!
//! ### Level Transfer
//! Level images do not fit in a datagram. A LEVEL packet announces the path
//! and size, and the PNG is then streamed once over TCP on the same port.
//!
//! ## Architecture
//!
//! All state lives in [`relay::Relay`], owned by one task that handles one
//! packet at a time. UDP receive, UDP send and level streaming each run in
//! their own task and talk to it over unbounded `mpsc` channels, so a slow
//! download never stalls the relay.
//!
//! ## Module Organization
//!
//! - `session_table`: sessions, pending registrations and the id counter
//! - `commands`: the chat command parser and help text
//! - `relay`: dispatch, handshake, fan-out, scores and round changes
//! - `level_transfer`: the TCP side channel
//! - `network`: sockets, tasks and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut server = Server::bind(ServerConfig::default()).await?;
//!     let handle = server.handle()?;
//!
//!     // Later, from anywhere: switch everyone to a new level
//!     handle.start_game("CTF", "Arena", "arena.png");
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Known Gaps
//!
//! There is no heartbeat. A player who vanishes without sending DISCONNECT
//! keeps their session and pending registration until the server restarts.

pub mod commands;
pub mod level_transfer;
pub mod network;
pub mod relay;
pub mod session_table;
