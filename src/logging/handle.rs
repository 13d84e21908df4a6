use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing_appender::non_blocking::WorkerGuard;

/// Метрики для LoggingHandle.
#[derive(Debug, Default)]
pub struct LoggingMetrics {
    /// Флаг активного shutdown
    pub shutdown_in_progress: AtomicBool,
    /// Кол-во flush операций
    pub flush_count: AtomicU64,
}

/// Handle для управления lifecycle логирования.
///
/// Владеет `WorkerGuard` файлового sink'а: пока handle жив, события
/// дописываются в файл.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    pub metrics: Arc<LoggingMetrics>,
    /// Timeout для flush при shutdown (по умолчанию 5 секунд)
    flush_timeout: Duration,
}

impl LoggingMetrics {
    pub fn record_flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::Relaxed)
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        self.shutdown_in_progress.load(Ordering::Acquire)
    }

    fn start_shutdown(&self) {
        self.shutdown_in_progress.store(true, Ordering::Release);
    }
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            metrics: Arc::new(LoggingMetrics::default()),
            flush_timeout: Duration::from_secs(5),
        }
    }

    /// Устанавливает custom flush timeout.
    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Graceful shutdown: сбрасывает буфер файлового sink'а.
    pub fn shutdown(mut self) {
        self.metrics.start_shutdown();
        tracing::info!(
            timeout_secs = self.flush_timeout.as_secs(),
            "Initiating logging shutdown"
        );

        let start = Instant::now();
        if self.file_guard.take().is_some() {
            self.metrics.record_flush();
        }
        let elapsed = start.elapsed();

        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: Logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if !self.metrics.is_shutdown_in_progress() && self.file_guard.is_some() {
            eprintln!(
                "WARNING: LoggingHandle dropped without explicit shutdown(). \
                 Call .shutdown() for graceful cleanup."
            )
        }
    }
}
