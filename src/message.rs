//! Конверт сообщения, передаваемого по шине.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use graphbus_error::{BackendError, GraphBusResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Последний выданный штамп времени, микросекунды от эпохи.
static LAST_TIMESTAMP_MICROS: AtomicU64 = AtomicU64::new(0);

/// Текущее время в секундах от эпохи.
///
/// Внутри процесса значения строго возрастают, даже если часы не успели
/// сдвинуться между вызовами.
pub fn now_timestamp() -> f64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    let mut last = LAST_TIMESTAMP_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_TIMESTAMP_MICROS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next as f64 / 1_000_000.0,
            Err(current) => last = current,
        }
    }
}

/// Конверт: метаданные + полезная нагрузка.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Секунды от эпохи.
    pub timestamp: f64,
    pub msg_type: String,
    pub parent_node_ref: String,
    pub publisher_id: String,
    pub msg: Value,
}

impl Envelope {
    pub fn new(
        msg_type: impl Into<String>,
        parent_node_ref: impl Into<String>,
        publisher_id: impl Into<String>,
        msg: Value,
    ) -> Self {
        Self {
            timestamp: now_timestamp(),
            msg_type: msg_type.into(),
            parent_node_ref: parent_node_ref.into(),
            publisher_id: publisher_id.into(),
            msg,
        }
    }

    pub fn encode(&self) -> GraphBusResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| BackendError::codec("envelope", e).into())
    }

    pub fn decode(bytes: &[u8]) -> GraphBusResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| BackendError::codec("envelope", e).into())
    }

    /// Десериализует полезную нагрузку в конкретный тип.
    pub fn payload_as<T: DeserializeOwned>(&self) -> GraphBusResult<T> {
        T::deserialize(&self.msg).map_err(|e| BackendError::codec(self.msg_type.clone(), e).into())
    }
}
