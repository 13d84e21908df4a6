use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки жизненного цикла узла.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// Повторный spin уже вращающегося узла
    #[error("Node {node} is already spinning")]
    AlreadySpinning { node: String },
    /// Операция над уничтоженным узлом
    #[error("Node {node} has been destroyed")]
    NodeDestroyed { node: String },
    /// Некорректный период вращения
    #[error("Invalid spin period: {reason}")]
    InvalidSpinPeriod { reason: String },
    /// Адрес уже занят живым узлом
    #[error("Node {node} is already declared in the communication graph")]
    AlreadyDeclared { node: String },
    /// Поток вращения завершился аварийно
    #[error("Spin thread of {node} panicked")]
    SpinThreadPanicked { node: String },
}

impl ErrorExt for NodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadySpinning { .. } => StatusCode::AlreadySpinning,
            Self::NodeDestroyed { .. } => StatusCode::NodeDestroyed,
            Self::InvalidSpinPeriod { .. } => StatusCode::InvalidArgs,
            Self::AlreadyDeclared { .. } => StatusCode::NodeAlreadyDeclared,
            Self::SpinThreadPanicked { .. } => StatusCode::Internal,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_codes() {
        let err = NodeError::AlreadySpinning {
            node: "/robot/clock".into(),
        };
        assert_eq!(err.status_code(), StatusCode::AlreadySpinning);
        assert!(err.to_string().contains("/robot/clock"));

        let err = NodeError::InvalidSpinPeriod {
            reason: "zero".into(),
        };
        assert_eq!(err.status_code(), StatusCode::InvalidArgs);

        let err = NodeError::AlreadyDeclared { node: "/x".into() };
        assert_eq!(err.status_code(), StatusCode::NodeAlreadyDeclared);
    }
}
