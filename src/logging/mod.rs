//! Структурированное логирование на `tracing`.
//!
//! Библиотека сама глобальный subscriber не устанавливает: это делает
//! приложение через [`init_logging`].

pub mod config;
mod filters;
pub mod handle;
pub mod sinks;

pub use config::{LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use tracing_subscriber::{
    layer::{Layered, SubscriberExt},
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

type FilteredRegistry = Layered<EnvFilter, Registry>;

/// Логирует `StackError` на уровне, который задаёт её код статуса.
///
/// `log_failure!(err, field = value, ..., "message")`
macro_rules! log_failure {
    ($err:expr, $($rest:tt)+) => {{
        let err: &::graphbus_error::StackError = &$err;
        match err.log_level() {
            ::graphbus_error::LogLevel::Debug => ::tracing::debug!(error = %err, $($rest)+),
            ::graphbus_error::LogLevel::Info => ::tracing::info!(error = %err, $($rest)+),
            ::graphbus_error::LogLevel::Warn => ::tracing::warn!(error = %err, $($rest)+),
            ::graphbus_error::LogLevel::Error => ::tracing::error!(error = %err, $($rest)+),
        }
    }};
}

pub(crate) use log_failure;

/// Инициализация логирования с конфигурацией
pub fn init_logging(
    mut config: LoggingConfig
) -> Result<LoggingHandle, Box<dyn std::error::Error>> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers: Vec<Box<dyn Layer<FilteredRegistry> + Send + Sync>> = Vec::new();

    if config.console_enabled {
        layers.push(sinks::console::layer_with_config(&config));
    }

    let file_guard = if config.file_enabled {
        let (file_layer, guard) = sinks::file::layer_with_config(&config);
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_dir = %config.log_dir.display(),
        console_enabled = config.console_enabled,
        file_enabled = config.file_enabled,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
