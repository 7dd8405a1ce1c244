//! Error types for the VFS.

use thiserror::Error;

use crate::models::Role;

/// Result type alias using the VFS error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for VFS operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Generic entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// No resource exists at the given root path
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A resource already occupies the target path
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The acting user lacks a required role.
    ///
    /// This is a security error and is never folded into [`Error::Internal`].
    #[error("Role violation: user '{user}' requires role {role:?}")]
    RoleViolation { user: String, role: Role },

    /// Publish operation failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors raised by role checks.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Error::RoleViolation { .. })
    }

    /// True for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::ResourceNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_resource_not_found() {
        let err = Error::ResourceNotFound("/sites/default/index.html".to_string());
        assert_eq!(
            err.to_string(),
            "Resource not found: /sites/default/index.html"
        );
    }

    #[test]
    fn test_error_display_already_exists() {
        let err = Error::AlreadyExists("/a.txt".to_string());
        assert_eq!(err.to_string(), "Resource already exists: /a.txt");
    }

    #[test]
    fn test_role_violation_is_security_error() {
        let err = Error::RoleViolation {
            user: "guest".to_string(),
            role: Role::Publisher,
        };
        assert!(err.is_security_violation());
        assert!(err.to_string().contains("guest"));
        assert!(err.to_string().contains("Publisher"));
    }

    #[test]
    fn test_internal_is_not_security_error() {
        let err = Error::Internal("boom".to_string());
        assert!(!err.is_security_violation());
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::NotFound("x".into()).is_not_found());
        assert!(Error::ResourceNotFound("/x".into()).is_not_found());
        assert!(!Error::InvalidInput("x".into()).is_not_found());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
