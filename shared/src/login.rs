//! Typed view of the TESTLOGIN pre-login exchange
//!
//! On the wire the `login_data` field doubles as username (requests) and as
//! a `!`-wrapped reply text (answers). Both ends convert through
//! [`LoginReply`] and [`LoginRequest`] so that string matching lives in one
//! place.

use crate::packet::Packet;
use crate::Team;
use std::fmt;

/// Marker in the red slot asking for team counts instead of registering
pub const TEAM_QUERY: i32 = -2;
/// Marker in a slot naming the team being joined
pub const TEAM_CHOSEN: i32 = -1;

const SERVER_OK: &str = "!Server OK!";
const PLAYERS: &str = "!Players!";
const VERSION_PREFIX: &str = "!The server is running version ";
const INVALID_PREFIX: &str = "!The server got an invalid username ";
const TAKEN: &str = "!This username is already taken!";
const NOT_WHITELISTED: &str = "!You are not whitelisted!";

/// Server answer to a TESTLOGIN
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    Accepted { id: i32 },
    TeamCounts { green: i32, red: i32 },
    VersionMismatch { server_version: String },
    InvalidUsername { username: String },
    UsernameTaken,
    NotWhitelisted,
}

impl LoginReply {
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            LoginReply::Accepted { .. } | LoginReply::TeamCounts { .. }
        )
    }

    /// Builds the wire packet, stamped with the server's version
    pub fn to_packet(&self, version: &str) -> Packet {
        let (login_data, id, green, red) = match self {
            LoginReply::Accepted { id } => (SERVER_OK.to_string(), *id, TEAM_QUERY, TEAM_QUERY),
            LoginReply::TeamCounts { green, red } => (PLAYERS.to_string(), -1, *green, *red),
            LoginReply::VersionMismatch { server_version } => (
                format!("{}{}!", VERSION_PREFIX, server_version),
                -1,
                TEAM_QUERY,
                TEAM_QUERY,
            ),
            LoginReply::InvalidUsername { username } => (
                format!("{}{}!", INVALID_PREFIX, username),
                -1,
                TEAM_QUERY,
                TEAM_QUERY,
            ),
            LoginReply::UsernameTaken => (TAKEN.to_string(), -1, TEAM_QUERY, TEAM_QUERY),
            LoginReply::NotWhitelisted => {
                (NOT_WHITELISTED.to_string(), -1, TEAM_QUERY, TEAM_QUERY)
            }
        };

        Packet::TestLogin {
            login_data,
            id,
            version: version.to_string(),
            green,
            red,
        }
    }

    /// Interprets a TESTLOGIN received by a client; `None` if it is not a reply
    pub fn from_packet(packet: &Packet) -> Option<LoginReply> {
        let Packet::TestLogin {
            login_data,
            id,
            version,
            green,
            red,
        } = packet
        else {
            return None;
        };

        let text = login_data.as_str();
        if text.eq_ignore_ascii_case(SERVER_OK) {
            Some(LoginReply::Accepted { id: *id })
        } else if text.contains(PLAYERS) {
            Some(LoginReply::TeamCounts {
                green: *green,
                red: *red,
            })
        } else if text.starts_with(VERSION_PREFIX) {
            let server_version = text[VERSION_PREFIX.len()..].trim_end_matches('!');
            let server_version = if server_version.is_empty() {
                version.clone()
            } else {
                server_version.to_string()
            };
            Some(LoginReply::VersionMismatch { server_version })
        } else if text.starts_with(INVALID_PREFIX) {
            Some(LoginReply::InvalidUsername {
                username: text[INVALID_PREFIX.len()..]
                    .trim_end_matches('!')
                    .to_string(),
            })
        } else if text.contains(TAKEN) {
            Some(LoginReply::UsernameTaken)
        } else if text.contains(NOT_WHITELISTED) {
            Some(LoginReply::NotWhitelisted)
        } else {
            None
        }
    }
}

impl fmt::Display for LoginReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginReply::Accepted { id } => write!(f, "Server OK (id {})", id),
            LoginReply::TeamCounts { green, red } => {
                write!(f, "Players: {} green, {} red", green, red)
            }
            LoginReply::VersionMismatch { server_version } => {
                write!(f, "The server is running version {}", server_version)
            }
            LoginReply::InvalidUsername { username } => {
                write!(f, "The server got an invalid username {}", username)
            }
            LoginReply::UsernameTaken => write!(f, "This username is already taken"),
            LoginReply::NotWhitelisted => write!(f, "You are not whitelisted"),
        }
    }
}

/// Client side TESTLOGIN requests, as the server classifies them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginRequest {
    TeamQuery,
    Register { team: Team },
}

impl LoginRequest {
    /// Reads the green/red sentinel pair of an inbound TESTLOGIN
    pub fn classify(green: i32, red: i32) -> LoginRequest {
        if red == TEAM_QUERY {
            LoginRequest::TeamQuery
        } else if green == TEAM_CHOSEN {
            LoginRequest::Register { team: Team::Green }
        } else {
            LoginRequest::Register { team: Team::Red }
        }
    }

    pub fn sentinels(self) -> (i32, i32) {
        match self {
            LoginRequest::TeamQuery => (TEAM_QUERY, TEAM_QUERY),
            LoginRequest::Register { team: Team::Green } => (TEAM_CHOSEN, 0),
            LoginRequest::Register { team: Team::Red } => (0, TEAM_CHOSEN),
        }
    }

    pub fn to_packet(self, username: &str, version: &str) -> Packet {
        let (green, red) = self.sentinels();
        Packet::TestLogin {
            login_data: username.to_string(),
            id: -1,
            version: version.to_string(),
            green,
            red,
        }
    }
}
