use hui_schema::SchemaError;
use thiserror::Error;

use crate::supervisor::NodeRole;

/// Errors surfaced by the control plane.
///
/// Validation variants (`InvalidConfig`, `MissingDependency`) are always
/// returned before any stored value changes. Lifecycle variants are scoped
/// to a single node.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("{node} node failed to start: {reason}")]
    StartFailed { node: NodeRole, reason: String },

    #[error("{node} node failed to stop: {reason}")]
    StopFailed { node: NodeRole, reason: String },

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("device limit reached: {devices}/{limit}")]
    DeviceLimitExceeded { devices: i64, limit: i64 },

    #[error("system error: {0}")]
    Sys(String),
}

impl ControlError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlError::InvalidConfig(_) => "invalid_config",
            ControlError::MissingDependency(_) => "missing_dependency",
            ControlError::StartFailed { .. } => "start_failed",
            ControlError::StopFailed { .. } => "stop_failed",
            ControlError::Unreachable(_) => "unreachable",
            ControlError::Unauthorized => "unauthorized",
            ControlError::DeviceLimitExceeded { .. } => "device_limit_exceeded",
            ControlError::Sys(_) => "sys_error",
        }
    }

    pub(crate) fn start_failed(node: NodeRole, reason: impl Into<String>) -> Self {
        ControlError::StartFailed {
            node,
            reason: reason.into(),
        }
    }

    pub(crate) fn stop_failed(node: NodeRole, reason: impl Into<String>) -> Self {
        ControlError::StopFailed {
            node,
            reason: reason.into(),
        }
    }
}

impl From<SchemaError> for ControlError {
    fn from(err: SchemaError) -> Self {
        ControlError::InvalidConfig(err.to_string())
    }
}

/// Store errors are plain strings; they always mean an internal fault.
pub(crate) fn store_err(err: String) -> ControlError {
    ControlError::Sys(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(
            ControlError::InvalidConfig("x".into()).as_label(),
            "invalid_config"
        );
        assert_eq!(
            ControlError::start_failed(NodeRole::Secondary, "boom").as_label(),
            "start_failed"
        );
        assert_eq!(
            ControlError::DeviceLimitExceeded {
                devices: 3,
                limit: 3
            }
            .to_string(),
            "device limit reached: 3/3"
        );
    }

    #[test]
    fn schema_errors_are_invalid_config() {
        let err: ControlError = SchemaError::InvalidListen(":abc".into()).into();
        assert!(matches!(err, ControlError::InvalidConfig(_)));
    }
}
