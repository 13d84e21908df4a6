use std::io::{self, Stdout};

use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Консольный layer в формате из конфигурации.
///
/// Возвращаем boxed trait-объект, чтобы стереть конкретный тип формата
/// (json/pretty/compact).
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;

    match config.format {
        LogFormat::Json => Box::new(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer)
                .with_target(config.with_target)
                .with_thread_names(config.with_thread_names),
        ),
        LogFormat::Pretty => Box::new(
            fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_ansi(config.with_ansi)
                .with_target(config.with_target)
                .with_thread_names(config.with_thread_names),
        ),
        LogFormat::Compact => Box::new(
            fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(config.with_ansi)
                .with_target(config.with_target)
                .with_thread_names(config.with_thread_names),
        ),
    }
}
