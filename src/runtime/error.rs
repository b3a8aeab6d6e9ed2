// ABOUTME: Runtime error types: service call failures and connection failures.
// ABOUTME: Connection errors use the SNAFU pattern with a kind() accessor.

use snafu::Snafu;

use crate::error::ErrorKind;

/// Failure reported by a runtime service call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("runtime service unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("canceled: {0}")]
    Canceled(String),

    #[error("runtime service error: {0}")]
    Internal(String),
}

impl RuntimeServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeServiceError::NotFound(_))
    }

    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeServiceError::NotFound(_) => ErrorKind::NotFound,
            RuntimeServiceError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            RuntimeServiceError::FailedPrecondition(_) => ErrorKind::PreconditionFailed,
            RuntimeServiceError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RuntimeServiceError::Unavailable(_) => ErrorKind::ConnectionFailed,
            RuntimeServiceError::DeadlineExceeded(_) => ErrorKind::Timeout,
            RuntimeServiceError::Canceled(_) => ErrorKind::Canceled,
            RuntimeServiceError::Internal(_) => ErrorKind::Other,
        }
    }
}

impl From<tonic::Status> for RuntimeServiceError {
    fn from(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            tonic::Code::NotFound => RuntimeServiceError::NotFound(message),
            tonic::Code::AlreadyExists => RuntimeServiceError::AlreadyExists(message),
            tonic::Code::FailedPrecondition => RuntimeServiceError::FailedPrecondition(message),
            tonic::Code::InvalidArgument => RuntimeServiceError::InvalidArgument(message),
            tonic::Code::Unavailable => RuntimeServiceError::Unavailable(message),
            tonic::Code::DeadlineExceeded => RuntimeServiceError::DeadlineExceeded(message),
            tonic::Code::Cancelled => RuntimeServiceError::Canceled(message),
            _ => RuntimeServiceError::Internal(message),
        }
    }
}

/// Unified error for reaching a runtime service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConnectError {
    #[snafu(display("unsupported runtime address {address:?}"))]
    UnsupportedAddress { address: String },

    #[snafu(display("failed to connect to containerd at {address}: {source}"))]
    Transport {
        address: String,
        source: tonic::transport::Error,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// The address scheme is not understood.
    BadAddress,
    /// The socket could not be reached.
    Unreachable,
}

impl ConnectError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ConnectErrorKind {
        match self {
            ConnectError::UnsupportedAddress { .. } => ConnectErrorKind::BadAddress,
            ConnectError::Transport { .. } => ConnectErrorKind::Unreachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_codes_map_to_variants() {
        let err: RuntimeServiceError = tonic::Status::not_found("container x").into();
        assert!(err.is_not_found());

        let err: RuntimeServiceError = tonic::Status::failed_precondition("busy").into();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let err: RuntimeServiceError = tonic::Status::unavailable("down").into();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    }
}
