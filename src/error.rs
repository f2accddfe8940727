use thiserror::Error;

/// Errors that can occur in the orchestration engine.
///
/// Every variant carries enough context for the adapter layer to build a
/// tagged error response; `code()` returns the stable machine-readable code
/// for that purpose.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// Malformed configuration or request, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// A controller with the same id is already registered
    #[error("Controller {0} already registered")]
    ControllerExists(String),

    /// Referenced controller id is not in the registry
    #[error("Controller {0} not found")]
    ControllerNotFound(String),

    /// Backend construction failed (unknown type or constructor error)
    #[error("Failed to create controller backend: {0}")]
    ControllerCreationFailed(String),

    /// Referenced controller exists but is not healthy enough for the operation
    #[error("Controller {0} is not healthy")]
    ControllerUnhealthy(String),

    /// The switch has no mapping record
    #[error("Switch {0} is not mapped to any controller")]
    MappingNotFound(String),

    /// No healthy backup controller could be selected
    #[error("No healthy backup controller available for switch {0}")]
    NoBackupAvailable(String),

    /// No backend is registered for the resolved switch type
    #[error("No backend available for switch {0}")]
    BackendNotAvailable(String),

    /// A backend operation failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// Operation exceeded its configured timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid engine state (e.g. operation on a stopped component)
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ConductorError {
    /// Stable error code for the adapter boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ConductorError::Validation(_) => "VALIDATION_ERROR",
            ConductorError::ControllerExists(_) => "CONTROLLER_EXISTS",
            ConductorError::ControllerNotFound(_) => "CONTROLLER_NOT_FOUND",
            ConductorError::ControllerCreationFailed(_) => "CONTROLLER_CREATION_FAILED",
            ConductorError::ControllerUnhealthy(_) => "CONTROLLER_UNHEALTHY",
            ConductorError::MappingNotFound(_) => "MAPPING_NOT_FOUND",
            ConductorError::NoBackupAvailable(_) => "NO_BACKUP_AVAILABLE",
            ConductorError::BackendNotAvailable(_) => "BACKEND_NOT_AVAILABLE",
            ConductorError::Backend(_) => "BACKEND_ERROR",
            ConductorError::Timeout(_) => "TIMEOUT",
            ConductorError::InvalidState(_) => "INVALID_STATE",
        }
    }
}

/// Result type alias using ConductorError
pub type Result<T> = std::result::Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConductorError::ControllerNotFound("of-primary".to_string());
        assert_eq!(err.to_string(), "Controller of-primary not found");
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            ConductorError::ControllerExists("a".into()).code(),
            "CONTROLLER_EXISTS"
        );
        assert_eq!(
            ConductorError::MappingNotFound("s1".into()).code(),
            "MAPPING_NOT_FOUND"
        );
        assert_eq!(
            ConductorError::NoBackupAvailable("s1".into()).code(),
            "NO_BACKUP_AVAILABLE"
        );
        assert_eq!(
            ConductorError::Validation("bad port".into()).code(),
            "VALIDATION_ERROR"
        );
    }
}
