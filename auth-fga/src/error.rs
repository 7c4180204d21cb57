use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FgaError {
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Invalid object reference: {0}")]
    InvalidObjectRef(String),

    #[error("{child} cannot be a child of {parent}")]
    InvalidHierarchy { child: String, parent: String },

    #[error("Invalid grant duration: {0}")]
    InvalidDuration(String),

    /// The engine already stores a tuple with this key, expired or not.
    #[error("Grant already exists: {key}")]
    DuplicateGrant { key: String },

    #[error("Tuple not found: {key}")]
    NotFound { key: String },

    /// The authorization model has no such relation on the object type.
    #[error("Relation not defined by the model: {message}")]
    UndefinedRelation { message: String },

    #[error("Engine rejected request ({code}): {message}")]
    Validation { code: String, message: String },

    #[error("Authorization engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Authentication with engine failed: {0}")]
    Authentication(String),

    #[error("No answer from engine within {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse error category, for callers that branch on the kind of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    DuplicateGrant,
    NotFound,
    UndefinedRelation,
    Validation,
    Unavailable,
    Cancelled,
    Config,
    Internal,
}

impl FgaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRole(_)
            | Self::UnknownResourceType(_)
            | Self::InvalidObjectRef(_)
            | Self::InvalidHierarchy { .. }
            | Self::InvalidDuration(_) => ErrorKind::Precondition,
            Self::DuplicateGrant { .. } => ErrorKind::DuplicateGrant,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UndefinedRelation { .. } => ErrorKind::UndefinedRelation,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::EngineUnavailable(_) | Self::Authentication(_) | Self::Timeout(_) => {
                ErrorKind::Unavailable
            }
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.kind() == ErrorKind::DuplicateGrant
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_undefined_relation(&self) -> bool {
        self.kind() == ErrorKind::UndefinedRelation
    }
}

impl From<config::ConfigError> for FgaError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FgaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let dup = FgaError::DuplicateGrant {
            key: "User:Bob editor Account:2".to_string(),
        };
        assert!(dup.is_duplicate());
        assert!(!dup.is_not_found());

        let validation = FgaError::Validation {
            code: "validation_error".to_string(),
            message: "invalid relation".to_string(),
        };
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert!(!validation.is_duplicate());

        assert_eq!(FgaError::Timeout(Duration::from_secs(1)).kind(), ErrorKind::Unavailable);
        assert_eq!(FgaError::InvalidRole("5".to_string()).kind(), ErrorKind::Precondition);

        let undefined = FgaError::UndefinedRelation {
            message: "relation 'Workspace#writer' not found".to_string(),
        };
        assert!(undefined.is_undefined_relation());
        assert_ne!(undefined.kind(), ErrorKind::Validation);
    }
}
