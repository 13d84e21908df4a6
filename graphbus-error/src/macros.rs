/// Немедленно возвращает ошибку (аналогично `anyhow::bail!`).
///
/// Формы:
/// - `bail!(err)`: принимает готовый тип ошибки;
/// - `bail!(code, "msg")`: создаёт `GenericError` с кодом и сообщением;
/// - `bail!(code, "fmt {}", arg)`: форматирует сообщение.
///
/// ```ignore
/// use graphbus_error::{bail, StatusCode};
///
/// fn check_rate(hz: f64) -> graphbus_error::GraphBusResult<()> {
///     if hz <= 0.0 {
///         bail!(StatusCode::InvalidArgs, "rate must be positive, got {}", hz);
///     }
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $msg:expr) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, $msg)
        ))
    };
    ($code:expr, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, format!($fmt, $($arg)*))
        ))
    };
}

/// Проверяет условие и вызывает `bail!`, если условие ложно.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            $crate::bail!($err);
        }
    };
    ($cond:expr, $code:expr, $msg:expr) => {
        if !($cond) {
            $crate::bail!($code, $msg);
        }
    };
    ($cond:expr, $code:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($code, $fmt, $($arg)*);
        }
    };
}

/// `.context(..)` для любого `Result`, ошибка которого сводится к
/// `StackError`.
pub trait ResultExt<T> {
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<crate::StackError>,
{
    #[track_caller]
    fn context<C>(
        self,
        ctx: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(ctx)),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GenericError, GraphBusResult, NodeError, StatusCode};

    #[test]
    fn test_bail_simple() {
        fn example() -> GraphBusResult<()> {
            bail!(NodeError::AlreadySpinning {
                node: "/ns/a".to_string()
            });
        }

        let err = example().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::AlreadySpinning);
    }

    #[test]
    fn test_bail_with_format() {
        fn example(value: i32) -> GraphBusResult<()> {
            bail!(StatusCode::InvalidArgs, "Invalid value: {}", value);
        }

        let err = example(42).unwrap_err();
        assert!(err.to_string().contains("Invalid value: 42"));
    }

    #[test]
    fn test_ensure() {
        fn validate(x: i32) -> GraphBusResult<()> {
            ensure!(x > 0, StatusCode::InvalidArgs, "Value must be positive");
            ensure!(x < 100, StatusCode::InvalidArgs, "Value too large: {}", x);
            Ok(())
        }

        assert!(validate(50).is_ok());
        assert!(validate(-1).is_err());
        assert!(validate(150).is_err());
    }

    #[test]
    fn test_result_ext() {
        fn inner() -> Result<(), GenericError> {
            Err(GenericError::new(StatusCode::Internal, "inner error"))
        }

        fn outer() -> GraphBusResult<()> {
            inner().context("outer context")?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert_eq!(err.contexts().len(), 1);
        assert_eq!(err.contexts()[0].message, "outer context");
    }
}
