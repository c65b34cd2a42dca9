//! # Shields Client Library
//!
//! Headless client for the Shields relay. It keeps a mirror of everything
//! the server relays, drives the local player and publishes its movement.
//! A renderer, if any, only reads [`mirror::MirrorSnapshot`]s.
//!
//! ## Architecture Overview
//!
//! Two flows share one [`session::ClientSession`] behind a `tokio` mutex:
//!
//! ### Receive Loop
//! Decodes every datagram and applies it to the session right away. Answers
//! the session asks for (a DESTROY for an evicted mine, a spawn MOVE after a
//! round starts) are sent from the same loop. Level downloads run in their
//! own task so the loop never waits on TCP.
//!
//! ### Tick Loop
//! Runs at [`shared::TICKS_PER_SECOND`]. Each tick moves the local player,
//! advances bullets, tweens remote players towards their last reported
//! position and checks the local player against enemy bullets and mines.
//!
//! ## Joining
//!
//! [`network::Client::login`] walks the handshake in [`handshake`]: team
//! query, registration, LOGIN, level download, then a spawn MOVE and a zero
//! SCORE. Each wait is bounded; a refusal from the server ends the attempt
//! with [`shared::NetError::LoginRejected`].
//!
//! ## Module Organization
//!
//! - `mirror`: remote players, the local player, bullets, mines, flags, chat
//! - `handshake`: the TESTLOGIN / LOGIN state machine
//! - `session`: packet handling, the mine cap and outgoing player actions
//! - `level_download`: the TCP side of Level Transfer
//! - `network`: socket, receive loop, login and the tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig, Intent};
//! use shared::Direction;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), shared::NetError> {
//!     let client = Client::connect(ClientConfig {
//!         username: "Alice".to_string(),
//!         ..ClientConfig::default()
//!     })
//!     .await?;
//!     client.login().await?;
//!
//!     let (intents, rx) = mpsc::unbounded_channel();
//!     intents.send(Intent::Steer(Direction::Right)).ok();
//!     intents.send(Intent::Chat("hello".to_string())).ok();
//!     client.run(rx).await
//! }
//! ```

pub mod handshake;
pub mod level_download;
pub mod mirror;
pub mod network;
pub mod session;
