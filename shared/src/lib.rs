//! Wire protocol shared by the Shields server and clients
//!
//! This crate holds everything both ends must agree on:
//!
//! - [`packet`]: the ASCII datagram codec for the twelve packet kinds
//! - [`login`]: typed TESTLOGIN replies and team sentinels
//! - [`username`]: name cleanup applied before logging in
//! - [`level`]: the level raster shipped over the Level Transfer stream
//! - [`error`]: error types used by both network layers
//!
//! Game constants live at the crate root. Positions are integer pixels; a
//! level tile is [`TILE_PIXELS`] wide.

use std::fmt;
use std::str::FromStr;

pub mod error;
pub mod level;
pub mod login;
pub mod packet;
pub mod username;

pub use error::{NetError, Result, UsernameError};
pub use level::Level;
pub use login::{LoginReply, LoginRequest};
pub use packet::{log_datagram, Packet, PacketType};
pub use username::{prepare_username, sanitize_username, validate_username};

/// UDP port of the relay; Level Transfer listens on the same number over TCP
pub const DEFAULT_PORT: u16 = 9714;
/// Fixed receive buffer size of every datagram
pub const PACKET_SIZE: usize = 1024;
pub const PROTOCOL_VERSION: &str = "v1.1.01";
pub const MAX_USERNAME_LEN: usize = 10;
/// Internal name used by self tests; never valid for players
pub const TEST_SENTINEL: &str = "nbSpTst";
/// Sender name of packets the server originates
pub const SERVER_NAME: &str = "SERVER";

/// Ticks between MOVE publications, also the length of an interpolation window
pub const UPDATE_RATE: u32 = 7;
pub const TICKS_PER_SECOND: u64 = 60;
/// Mines a client may own before its oldest is destroyed
pub const MAX_MINES: usize = 3;
pub const TILE_PIXELS: i32 = 32;
pub const STARTING_HEALTH: i32 = 20;
pub const PLAYER_SPEED: i32 = 2;
pub const BULLET_SPEED: i32 = 6;
pub const BULLET_DAMAGE: i32 = 4;
pub const MINE_DAMAGE: i32 = 8;
/// Damage dealt by `/kill`
pub const KILL_DAMAGE: i32 = 9001;
/// DESTROY id meaning every bullet and mine
pub const DESTROY_ALL: i32 = -2;

/// Game mode in which scores are shared by the whole team
pub const CAPTURE_THE_FLAG: &str = "CTF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Team {
    Green,
    Red,
}

impl Team {
    pub fn as_str(self) -> &'static str {
        match self {
            Team::Green => "GREEN",
            Team::Red => "RED",
        }
    }

    /// One letter tag used in the pending roster
    pub fn initial(self) -> char {
        match self {
            Team::Green => 'G',
            Team::Red => 'R',
        }
    }

    pub fn opponent(self) -> Team {
        match self {
            Team::Green => Team::Red,
            Team::Red => Team::Green,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Team {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GREEN" => Ok(Team::Green),
            "RED" => Ok(Team::Red),
            other => Err(format!("unknown team {:?}", other)),
        }
    }
}

/// Facing and travel direction, encoded 0..=3 on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn from_wire(value: u8) -> Option<Direction> {
        match value {
            0 => Some(Direction::Up),
            1 => Some(Direction::Down),
            2 => Some(Direction::Left),
            3 => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    /// Unit step in screen coordinates (y grows downwards)
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}
