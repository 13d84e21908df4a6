use std::time::Duration;

use serde::{Deserialize, Serialize};

use config::{Config, ConfigError, Environment};

/// Верхняя граница размера пула рабочих потоков узла по умолчанию.
const MAX_DEFAULT_WORKERS: usize = 16;

/// Настройки middleware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Период вызова `spin_once` в цикле узла, мс.
    pub spin_period_ms: u64,
    /// Размер пула рабочих потоков узла.
    pub worker_threads: usize,
    /// Ёмкость буфера каждого канала шины в памяти.
    pub bus_capacity: usize,
    /// Таймаут захвата именованной блокировки, мс; 0 = ждать бесконечно.
    pub lock_timeout_ms: u64,
    /// Имя документа discovery.
    pub discovery_document: String,
}

impl Settings {
    /// Загружает настройки: значения по умолчанию + переменные окружения
    /// с префиксом `GRAPHBUS_`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("GRAPHBUS")
    }

    pub fn load_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let cfg = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("spin_period_ms", defaults.spin_period_ms as i64)?
            .set_default("worker_threads", defaults.worker_threads as i64)?
            .set_default("bus_capacity", defaults.bus_capacity as i64)?
            .set_default("lock_timeout_ms", defaults.lock_timeout_ms as i64)?
            .set_default("discovery_document", defaults.discovery_document)?
            // Добавляем переменные окружения с префиксом
            .add_source(Environment::with_prefix(prefix).try_parsing(true))
            .build()?;

        // Десериализуем конфигурацию в нашу структуру
        let mut settings: Self = cfg.try_deserialize()?;
        settings.worker_threads = settings.worker_threads.max(1);
        Ok(settings)
    }

    pub fn spin_period(&self) -> Duration {
        Duration::from_millis(self.spin_period_ms)
    }

    /// `None` означает бесконечное ожидание.
    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_ms > 0).then(|| Duration::from_millis(self.lock_timeout_ms))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            spin_period_ms: 10,
            worker_threads: num_cpus::get().clamp(1, MAX_DEFAULT_WORKERS),
            bus_capacity: 1024,
            lock_timeout_ms: 0,
            discovery_document: "comm_graph".to_string(),
        }
    }
}
