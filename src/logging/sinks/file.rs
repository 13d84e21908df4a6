use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Файловый layer с ежедневной ротацией и неблокирующей записью.
///
/// Возвращённый `WorkerGuard` должен жить, пока нужна запись в файл.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let file_appender = rolling::daily(&config.log_dir, &config.file_name);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let layer: Box<dyn LayerTrait<S> + Send + Sync> = match config.format {
        LogFormat::Json => Box::new(fmt::layer().json().with_writer(writer)),
        _ => Box::new(
            fmt::layer()
                .with_ansi(false)
                .with_target(config.with_target)
                .with_writer(writer),
        ),
    };

    (layer, guard)
}
