use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки построения и использования endpoints (publisher, subscriber,
/// shared variable, timer) и групп обратных вызовов.
#[derive(Debug, Clone, Error)]
pub enum EndpointError {
    /// Топик не начинается с '/'
    #[error("Malformed topic '{topic}': {reason}")]
    MalformedTopic { topic: String, reason: String },
    /// Родительский узел не зарегистрирован в графе топологии
    #[error("Node {address} is not declared in the communication graph")]
    NodeNotDeclared { address: String },
    /// Endpoint не принадлежит указанной группе
    #[error("Endpoint {endpoint_id} is not a member of the callback group")]
    NotInCallbackGroup { endpoint_id: String },
    /// Операция над уже уничтоженным endpoint
    #[error("Endpoint {endpoint_id} has been destroyed")]
    EndpointDestroyed { endpoint_id: String },
    /// Значение не соответствует объявленному типу переменной
    #[error("Value for '{name}' does not match declared type {expected}")]
    TypeMismatch { name: String, expected: String },
}

impl ErrorExt for EndpointError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedTopic { .. } => StatusCode::MalformedTopic,
            Self::NodeNotDeclared { .. } => StatusCode::NodeNotDeclared,
            Self::NotInCallbackGroup { .. } => StatusCode::NotInCallbackGroup,
            Self::EndpointDestroyed { .. } => StatusCode::EndpointDestroyed,
            Self::TypeMismatch { .. } => StatusCode::TypeError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
