use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Допустимые уровни логирования.
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень (`trace`..`error`).
    pub level: String,
    /// Уровни для отдельных target'ов, например `graphbus::backend = "debug"`.
    pub module_levels: BTreeMap<String, String>,
    pub console_enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_names: bool,
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: BTreeMap::new(),
            console_enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_names: true,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_name: "graphbus.log".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Переопределения из окружения: `GRAPHBUS_LOG_LEVEL`,
    /// `GRAPHBUS_LOG_DIR`, `GRAPHBUS_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("GRAPHBUS_LOG_LEVEL") {
            self.level = level.to_lowercase();
        }
        if let Ok(dir) = std::env::var("GRAPHBUS_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
            self.file_enabled = true;
        }
        if let Ok(format) = std::env::var("GRAPHBUS_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "json" => self.format = LogFormat::Json,
                "pretty" => self.format = LogFormat::Pretty,
                "compact" => self.format = LogFormat::Compact,
                other => eprintln!("Unknown GRAPHBUS_LOG_FORMAT '{other}', keeping {:?}", self.format),
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(format!("invalid log level '{}'", self.level));
        }
        for (target, level) in &self.module_levels {
            if !LEVELS.contains(&level.as_str()) {
                return Err(format!("invalid log level '{level}' for target '{target}'"));
            }
        }
        if self.file_enabled && self.file_name.is_empty() {
            return Err("file logging enabled with an empty file name".to_string());
        }
        Ok(())
    }

    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if self.file_enabled {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`: базовый уровень + уровни target'ов.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = vec![self.level.clone()];
        parts.extend(
            self.module_levels
                .iter()
                .map(|(target, level)| format!("{target}={level}")),
        );
        parts.join(",")
    }
}
