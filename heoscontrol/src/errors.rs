use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeosError {
    // Transport: the device could not be reached or its reply could not be read
    #[error("Cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("I/O error while talking to {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("Timed out waiting for a reply from {0}")]
    Timeout(String),
    #[error("Connection to {0} closed before a full reply was received")]
    ConnectionClosed(String),
    #[error("Malformed reply from {host}: {reason}")]
    MalformedReply { host: String, reason: String },

    // Protocol: a well-formed reply reporting a failure
    #[error("Command {command} failed with error {message}")]
    CommandFailed { command: String, message: String },

    // Validation: rejected before any network call
    #[error("Volume must be between 0 and 100, got {0}")]
    InvalidVolume(i32),
    #[error("Invalid play state: {0}")]
    InvalidPlayState(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // Lookup
    #[error("Unknown player '{0}'")]
    UnknownPlayer(String),
    #[error("Unknown group '{0}'")]
    UnknownGroup(String),
    #[error("Group {0} has no leader")]
    NoGroupLeader(String),
    #[error("Group {0} reports more than one leader")]
    AmbiguousGroupLeader(String),

    #[error("Discovery socket error: {0}")]
    Discovery(#[source] io::Error),

    #[error("Cannot access registry cache {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid registry cache {}: {reason}", path.display())]
    CacheFormat { path: PathBuf, reason: String },
}

impl HeosError {
    pub fn io(host: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                HeosError::Timeout(host.to_string())
            }
            _ => HeosError::Io {
                host: host.to_string(),
                source,
            },
        }
    }

    pub fn malformed_reply(host: &str, reason: impl Into<String>) -> Self {
        HeosError::MalformedReply {
            host: host.to_string(),
            reason: reason.into(),
        }
    }

    pub fn command_failed(command: &str, message: &str) -> Self {
        HeosError::CommandFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// The device could not be reached, or did not answer with a usable line.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HeosError::Connect { .. }
                | HeosError::Io { .. }
                | HeosError::Timeout(_)
                | HeosError::ConnectionClosed(_)
                | HeosError::MalformedReply { .. }
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, HeosError::CommandFailed { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            HeosError::InvalidVolume(_)
                | HeosError::InvalidPlayState(_)
                | HeosError::InvalidQuery(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HeosError::UnknownPlayer(_)
                | HeosError::UnknownGroup(_)
                | HeosError::NoGroupLeader(_)
                | HeosError::AmbiguousGroupLeader(_)
        )
    }
}

pub type Result<T, E = HeosError> = std::result::Result<T, E>;
