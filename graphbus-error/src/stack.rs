use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, StatusCode};

/// Ошибка graphbus с цепочкой контекстов.
///
/// Контексты добавляются по мере подъёма ошибки (backend → endpoint →
/// узел) и запоминают место вызова.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Arc<Vec<ErrorContext>>,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: &'static Location<'static>,
}

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Arc::new(Vec::new()),
        }
    }

    /// Добавляет контекст с местом вызова.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.contexts).push(ErrorContext {
            message: msg.into(),
            location: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    /// Уровень, на котором ошибку стоит логировать.
    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut debug = f.debug_struct("StackError");
        debug.field("inner", &self.inner.to_string());
        debug.field("status_code", &self.status_code());
        if !self.contexts.is_empty() {
            let contexts: Vec<String> = self
                .contexts
                .iter()
                .map(|c| format!("{} ({}:{})", c.message, c.location.file(), c.location.line()))
                .collect();
            debug.field("contexts", &contexts);
        }
        debug.finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // Внешний контекст первым: "create_publisher: declare: <ошибка>".
        for ctx in self.contexts.iter().rev() {
            write!(f, "{}: ", ctx.message)?;
        }
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}
