//! Container engine errors.

/// Error reported by a [`ContainerRuntime`](crate::ContainerRuntime).
///
/// The variants are split by how callers react: a missing object is a user
/// error, an unreachable engine is fatal, a conflict is usually a warning.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Image, container or other engine object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine binary is missing or the daemon cannot be reached.
    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The operation conflicts with the object's current state
    /// (name already in use, container not running, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The engine command failed for another reason.
    #[error("`{command}` failed{}: {stderr}", .code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Engine output could not be understood.
    #[error("unexpected engine output: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_engine_unavailable(&self) -> bool {
        matches!(self, Self::EngineUnavailable(_))
    }
}

/// Convenience alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = RuntimeError::CommandFailed {
            command: "docker run".to_string(),
            code: Some(125),
            stderr: "invalid reference format".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "`docker run` failed with exit code 125: invalid reference format"
        );

        let err = RuntimeError::CommandFailed {
            command: "docker run".to_string(),
            code: None,
            stderr: "killed".to_string(),
        };
        assert_eq!(err.to_string(), "`docker run` failed: killed");
    }

    #[test]
    fn test_predicates() {
        assert!(RuntimeError::NotFound("x".into()).is_not_found());
        assert!(RuntimeError::Conflict("x".into()).is_conflict());
        assert!(RuntimeError::EngineUnavailable("x".into()).is_engine_unavailable());
        assert!(!RuntimeError::Parse("x".into()).is_conflict());
    }
}
