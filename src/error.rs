//! Error types for the Vertica autoscaler operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur during operator operations
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error that has no more specific classification
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Referenced object does not exist (yet)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency write collision
    #[error("Conflict writing {0}")]
    Conflict(String),

    /// Inputs that cannot be reconciled without a config change
    #[error("{0}")]
    ConfigurationInconsistency(String),

    /// Operator configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid resource state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl OperatorError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn inconsistency(msg: impl Into<String>) -> Self {
        Self::ConfigurationInconsistency(msg.into())
    }

    /// Classify a raw API error into the operator's taxonomy.
    ///
    /// 404 and 409 get their own variants so callers can match on them
    /// without digging into the response body.
    pub fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(what.into()),
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict(what.into()),
            _ => Self::KubeApi(err),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_error_display() {
        let err = OperatorError::not_found("verticadb default/v");
        assert!(err.to_string().contains("Resource not found"));

        let err = OperatorError::inconsistency("password not found in secret");
        assert_eq!(err.to_string(), "password not found in secret");
    }

    #[test]
    fn test_from_kube_classifies_status_codes() {
        assert!(OperatorError::from_kube(api_error(404), "x").is_not_found());
        assert!(OperatorError::from_kube(api_error(409), "x").is_conflict());

        let other = OperatorError::from_kube(api_error(500), "x");
        assert!(matches!(other, OperatorError::KubeApi(_)));
        assert!(!other.is_conflict());
        assert!(!other.is_not_found());
    }
}
