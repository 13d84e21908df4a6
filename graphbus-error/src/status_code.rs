use std::fmt;

/// Коды статуса ошибок graphbus.
///
/// # Диапазоны:
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных
/// - 5xxx: Хранилище документов, блокировки, граф топологии
/// - 6xxx: Шина сообщений
/// - 9xxx: Узлы, endpoints, callback groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 1xxx: Общие ошибки ===
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    TypeError = 2002,
    InvalidData = 2004,

    // === 5xxx: Хранилище ===
    StorageUnavailable = 5000,
    SerializationFailed = 5002,
    LockError = 5004,
    LockTimeout = 5005,
    GraphError = 5006,

    // === 6xxx: Шина сообщений ===
    BusUnavailable = 6000,
    Timeout = 6002,

    // === 9xxx: Middleware ===
    MalformedTopic = 9000,
    NodeNotDeclared = 9001,
    NodeDestroyed = 9002,
    EndpointDestroyed = 9003,
    NotInCallbackGroup = 9004,
    AlreadySpinning = 9005,
    NodeAlreadyDeclared = 9006,
}

/// Уровень, на котором стоит логировать ошибку с данным кодом.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Рекомендуемый уровень логирования.
    ///
    /// Гонки с уничтожением endpoint'а ожидаемы и идут в `Debug`, ошибки
    /// ввода пользователя в `Info`, отказы backend'а в `Error`.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::NotFound
            | Self::EndpointDestroyed
            | Self::NodeDestroyed => LogLevel::Debug,
            Self::InvalidArgs
            | Self::TypeError
            | Self::InvalidData
            | Self::MalformedTopic => LogLevel::Info,
            Self::Internal
            | Self::StorageUnavailable
            | Self::BusUnavailable
            | Self::GraphError => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}
