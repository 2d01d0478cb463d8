use crate::Role;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum NearbyError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid service type: {0}")]
    InvalidServiceType(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, NearbyError>;

/// Context for error logging
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub peer_id: Option<String>,
    pub generation: Option<u64>,
    pub role: Option<Role>,
    pub additional_info: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }
}

impl NearbyError {
    /// Log error with structured context
    pub fn log_with_context(&self, context: &ErrorContext) {
        error!(
            error = %self,
            error_type = ?self,
            category = %self.category(),
            peer_id = ?context.peer_id,
            generation = ?context.generation,
            role = ?context.role,
            additional_info = ?context.additional_info,
            timestamp = %chrono::Utc::now(),
            "Nearby session error occurred"
        );
    }

    /// Stable error code reported to the host bridge
    pub fn code(&self) -> &'static str {
        match self {
            NearbyError::InvalidArgument(_) | NearbyError::InvalidServiceType(_) => "bad_args",
            NearbyError::NotImplemented(_) => "not_implemented",
            NearbyError::SendFailed(_) => "send_failed",
            NearbyError::SessionClosed => "session_closed",
            NearbyError::PeerNotFound(_) => "peer_not_found",
            NearbyError::ConnectionFailed(_) => "connection_failed",
            NearbyError::Timeout(_) => "timeout",
            NearbyError::TransportError(_) => "transport_error",
            NearbyError::SerializationError(_) => "serialization_error",
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            NearbyError::InvalidArgument(details) => {
                format!("Invalid input: {}. Please check the request and try again.", details)
            }
            NearbyError::NotImplemented(method) => {
                format!("The operation '{}' is not supported.", method)
            }
            NearbyError::InvalidServiceType(details) => {
                format!("Invalid service type: {}.", details)
            }
            NearbyError::SendFailed(details) => {
                format!("Sending failed: {}. The session is still open, please try again.", details)
            }
            NearbyError::SessionClosed => {
                "The nearby session has been closed. Please start a new session.".to_string()
            }
            NearbyError::PeerNotFound(peer) => {
                format!("The peer '{}' could not be found. They may have moved out of range.", peer)
            }
            NearbyError::ConnectionFailed(details) => {
                format!("Connection failed: {}. Please move closer and try again.", details)
            }
            NearbyError::Timeout(operation) => {
                format!("Operation timed out: {}. Please try again.", operation)
            }
            NearbyError::TransportError(details) => {
                format!("Nearby transport error: {}. Please check your wireless settings.", details)
            }
            NearbyError::SerializationError(details) => {
                format!("Data processing error: {}. Please try again.", details)
            }
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            NearbyError::InvalidArgument(_) => ErrorCategory::Usage,
            NearbyError::NotImplemented(_) => ErrorCategory::Usage,
            NearbyError::InvalidServiceType(_) => ErrorCategory::Usage,
            NearbyError::SendFailed(_) => ErrorCategory::Send,
            NearbyError::SessionClosed => ErrorCategory::Session,
            NearbyError::PeerNotFound(_) => ErrorCategory::Session,
            NearbyError::ConnectionFailed(_) => ErrorCategory::Transport,
            NearbyError::Timeout(_) => ErrorCategory::Transport,
            NearbyError::TransportError(_) => ErrorCategory::Transport,
            NearbyError::SerializationError(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad or missing caller arguments, rejected synchronously
    Usage,
    /// Recoverable send failure, reported through the event stream
    Send,
    Session,
    Transport,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Usage => write!(f, "usage"),
            ErrorCategory::Send => write!(f, "send"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}
