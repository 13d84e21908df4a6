use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки backend'а: хранилище документов, шина сообщений, именованные
/// блокировки и граф топологии.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Хранилище документов недоступно или отказало
    #[error("Document store failure on '{key}': {reason}")]
    Store { key: String, reason: String },
    /// Шина сообщений отказала при публикации/подписке
    #[error("Message bus failure on '{topic}': {reason}")]
    Bus { topic: String, reason: String },
    /// Ошибка блокировки (например, unlock без владения)
    #[error("Lock error on {resource}: {reason}")]
    Lock { resource: String, reason: String },
    /// Блокировку не удалось получить за отведённое время
    #[error("Timed out after {timeout_ms} ms waiting for lock {resource}")]
    LockTimeout { resource: String, timeout_ms: u64 },
    /// Операция над графом топологии не выполнена
    #[error("Graph operation failed: {reason}")]
    Graph { reason: String },
    /// Данные не удалось закодировать/декодировать
    #[error("Codec failure for {what}: {reason}")]
    Codec { what: String, reason: String },
}

impl BackendError {
    pub fn codec(
        what: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Codec {
            what: what.into(),
            reason: err.to_string(),
        }
    }
}

impl ErrorExt for BackendError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Store { .. } => StatusCode::StorageUnavailable,
            Self::Bus { .. } => StatusCode::BusUnavailable,
            Self::Lock { .. } => StatusCode::LockError,
            Self::LockTimeout { .. } => StatusCode::LockTimeout,
            Self::Graph { .. } => StatusCode::GraphError,
            Self::Codec { .. } => StatusCode::SerializationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет маппинг вариантов на коды статуса.
    #[test]
    fn test_status_codes() {
        let lock = BackendError::LockTimeout {
            resource: "comm_graph".into(),
            timeout_ms: 50,
        };
        assert_eq!(lock.status_code(), StatusCode::LockTimeout);
        assert_eq!(lock.status_code().log_level(), crate::LogLevel::Warn);

        let codec = BackendError::codec("envelope", "expected value");
        assert_eq!(codec.status_code(), StatusCode::SerializationFailed);
        assert!(codec.to_string().contains("expected value"));
    }
}
