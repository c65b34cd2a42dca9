//! Error types shared by the server and client

use crate::login::LoginReply;
use thiserror::Error;

/// Reasons a username is refused before any LOGIN/TESTLOGIN leaves the client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("username is empty")]
    Empty,

    #[error("username {0:?} may not start with '!'")]
    ReservedPrefix(String),

    #[error("username {0:?} is reserved")]
    Reserved(String),
}

/// Errors raised by the network layers
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("level image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("level image is {actual_width}x{actual_height}, announced {width}x{height}")]
    LevelTooSmall {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("announced level size {width}x{height} has no tiles")]
    EmptyLevel { width: u32, height: u32 },

    #[error("server refused login: {0}")]
    LoginRejected(LoginReply),

    #[error("no answer from the server during login")]
    LoginTimeout,

    #[error("level transfer did not complete in time")]
    LevelTimeout,

    #[error("login step out of order: {0}")]
    Handshake(String),

    #[error(transparent)]
    Username(#[from] UsernameError),

    /// Unrecoverable condition; the owning loop must stop
    #[error("fatal: {0}")]
    Fatal(String),
}

impl NetError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetError::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
