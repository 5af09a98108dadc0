//! Error types for the conversation gateway

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while driving a conversation turn
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Session lookup failure (unknown identifier, never a fabricated empty session)
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Tool name is not in the catalog
    #[error("Unknown tool: {0}")]
    ToolUnknown(String),

    /// Tool arguments failed schema validation
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    ToolInvalidArguments { tool: String, reason: String },

    /// Tool ran but failed
    #[error("Tool '{tool}' execution failed: {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    /// Permission request lookup failure
    #[error("Permission request not found: {0}")]
    PermissionNotFound(String),

    /// Permission request was already decided
    #[error("Permission request already resolved: {0}")]
    PermissionAlreadyResolved(String),

    /// Provider connection / HTTP-level failure
    #[error("Provider transport error: {0}")]
    ProviderTransport(String),

    /// Malformed or unexpected provider stream shape
    #[error("Provider protocol error: {0}")]
    ProviderProtocol(String),

    /// Turn aborted by the client
    #[error("Turn cancelled")]
    TurnCancelled,

    /// Pending permission decision never arrived
    #[error("Turn timed out after {0:?} awaiting a permission decision")]
    TurnTimedOut(std::time::Duration),

    /// Turn exceeded the provider round budget
    #[error("Turn exceeded {0} provider rounds")]
    TurnLimitExceeded(usize),
}

impl GatewayError {
    /// Wire-facing error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            GatewayError::ToolUnknown(_) => ErrorKind::ToolUnknown,
            GatewayError::ToolInvalidArguments { .. } => ErrorKind::ToolInvalidArguments,
            GatewayError::ToolExecutionFailed { .. } => ErrorKind::ToolExecutionFailed,
            GatewayError::PermissionNotFound(_) => ErrorKind::PermissionNotFound,
            GatewayError::PermissionAlreadyResolved(_) => ErrorKind::PermissionAlreadyResolved,
            GatewayError::ProviderTransport(_) => ErrorKind::ProviderTransport,
            GatewayError::ProviderProtocol(_) => ErrorKind::ProviderProtocol,
            GatewayError::TurnCancelled => ErrorKind::TurnCancelled,
            GatewayError::TurnTimedOut(_) => ErrorKind::TurnTimedOut,
            GatewayError::TurnLimitExceeded(_) => ErrorKind::TurnLimitExceeded,
        }
    }
}

/// Serializable error taxonomy carried on `error` stream events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SessionNotFound,
    ToolUnknown,
    ToolInvalidArguments,
    ToolExecutionFailed,
    PermissionNotFound,
    PermissionAlreadyResolved,
    ProviderTransport,
    ProviderProtocol,
    TurnCancelled,
    TurnTimedOut,
    TurnLimitExceeded,
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            GatewayError::SessionNotFound("s1".into()).kind(),
            ErrorKind::SessionNotFound
        );
        assert_eq!(
            GatewayError::ToolUnknown("nope".into()).kind(),
            ErrorKind::ToolUnknown
        );
        assert_eq!(GatewayError::TurnCancelled.kind(), ErrorKind::TurnCancelled);
        assert_eq!(
            GatewayError::TurnTimedOut(std::time::Duration::from_secs(30)).kind(),
            ErrorKind::TurnTimedOut
        );
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::ToolInvalidArguments {
            tool: "calculator".into(),
            reason: "missing field 'a'".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid arguments for tool 'calculator': missing field 'a'"
        );

        let err = GatewayError::SessionNotFound("abc".into());
        assert_eq!(err.to_string(), "Session not found: abc");
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::PermissionAlreadyResolved).unwrap();
        assert_eq!(json, "\"permission_already_resolved\"");

        let kind: ErrorKind = serde_json::from_str("\"turn_timed_out\"").unwrap();
        assert_eq!(kind, ErrorKind::TurnTimedOut);
    }
}
