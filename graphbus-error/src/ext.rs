use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общий трейт типизированных ошибок graphbus (object-safe).
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// По умолчанию [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Нужен для downcast из [`StackError`](crate::StackError).
    fn as_any(&self) -> &dyn Any;
}
