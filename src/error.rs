// ABOUTME: Application-wide error types for highk.
// ABOUTME: Uses thiserror for ergonomic error handling and maps failures to exit codes.

use crate::container::LookupError;
use crate::cp::CopyError;
use crate::login::LoginError;
use crate::network::NetworkError;
use crate::runtime::{ConnectError, RuntimeServiceError};
use crate::store::StoreError;
use crate::types::{ContainerNameError, IdentifierError, ParseImageRefError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    ResourceBusy(String),

    #[error("{0}")]
    SystemBroken(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Canceled(String),

    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The container command could not be found.
    #[error("{0}")]
    CommandNotFound(String),

    /// The container command exists but cannot be executed.
    #[error("{0}")]
    CannotExecute(String),

    /// An attached container exited non-zero.
    #[error("container exited with status {0}")]
    ContainerExit(i32),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    ContainerName(#[from] ContainerNameError),

    #[error(transparent)]
    ImageRef(#[from] ParseImageRefError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeServiceError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PreconditionFailed,
    ResourceBusy,
    SystemBroken,
    ConnectionFailed,
    ServerMisbehaving,
    AuthenticationFailure,
    Timeout,
    Canceled,
    /// Anything that does not fit the categories above.
    Other,
}

impl Error {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::Identifier(_)
            | Error::ContainerName(_)
            | Error::ImageRef(_)
            | Error::Yaml(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) | Error::ConfigNotFound(_) | Error::CommandNotFound(_) => {
                ErrorKind::NotFound
            }
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::PreconditionFailed(_) | Error::CannotExecute(_) => {
                ErrorKind::PreconditionFailed
            }
            Error::ResourceBusy(_) => ErrorKind::ResourceBusy,
            Error::SystemBroken(_) | Error::Io(_) | Error::Json(_) => ErrorKind::SystemBroken,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Canceled(_) => ErrorKind::Canceled,
            Error::ContainerExit(_) | Error::Multiple(_) => ErrorKind::Other,
            Error::Store(e) => e.kind(),
            Error::Runtime(e) => e.kind(),
            Error::Connect(_) => ErrorKind::ConnectionFailed,
            Error::Lookup(e) => e.kind(),
            Error::Network(e) => e.kind(),
            Error::Copy(e) => e.kind(),
            Error::Login(e) => e.kind(),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ContainerExit(code) => *code,
            Error::CommandNotFound(_) => 127,
            Error::CannotExecute(_) => 126,
            Error::Connect(_) => 125,
            Error::Runtime(e) if e.kind() == ErrorKind::ConnectionFailed => 125,
            _ => 1,
        }
    }

    /// Collapse per-target errors from a batch operation.
    pub fn join(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_of_nothing_is_ok() {
        assert!(Error::join(Vec::new()).is_ok());
    }

    #[test]
    fn join_of_one_returns_it_unchanged() {
        let err = Error::join(vec![Error::NotFound("no such container: x".into())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn join_of_many_lists_every_message() {
        let err = Error::join(vec![
            Error::NotFound("no such container: a".into()),
            Error::PreconditionFailed("container b is running".into()),
        ])
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("no such container: a"));
        assert!(message.contains("container b is running"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn exit_codes_follow_docker_conventions() {
        assert_eq!(Error::ContainerExit(42).exit_code(), 42);
        assert_eq!(Error::ContainerExit(137).exit_code(), 137);
        assert_eq!(Error::CommandNotFound("sh".into()).exit_code(), 127);
        assert_eq!(Error::CannotExecute("sh".into()).exit_code(), 126);
        assert_eq!(Error::InvalidArgument("bad".into()).exit_code(), 1);
    }
}
