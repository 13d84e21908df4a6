//! Внешние коллабораторы middleware.
//!
//! Ядро (узлы, endpoints, discovery) работает только через четыре трейта:
//!
//! - [`DocumentStore`]: get/set структурированного значения по имени
//!   (документ discovery, записи разделяемых переменных);
//! - [`MessageBus`] + [`BusReceiver`]: publish/subscribe доставка;
//! - [`LockManager`]: именованная взаимоисключающая блокировка,
//!   реентерабельная для владельца;
//! - [`GraphStore`]: property-граф топологии.
//!
//! [`Backend`] собирает их в один клонируемый набор. Реализации в памяти
//! позволяют запускать много узлов в одном процессе так, будто это разные
//! процессы с общим backend'ом.

pub mod broker;
pub mod graph;
pub mod lock;
pub mod store;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use graphbus_error::GraphBusResult;
use serde_json::Value;

pub use broker::*;
pub use graph::*;
pub use lock::*;
pub use store::*;

use crate::config::Settings;

/// Хранилище структурированных документов по имени.
pub trait DocumentStore: Send + Sync {
    fn get(
        &self,
        name: &str,
    ) -> GraphBusResult<Option<Value>>;

    fn set(
        &self,
        name: &str,
        value: Value,
    ) -> GraphBusResult<()>;

    fn exists(
        &self,
        name: &str,
    ) -> GraphBusResult<bool>;

    /// Удаляет документ. Возвращает `true`, если он существовал.
    fn del(
        &self,
        name: &str,
    ) -> GraphBusResult<bool>;
}

/// Шина сообщений.
pub trait MessageBus: Send + Sync {
    /// Публикует payload в топик. Возвращает число получателей.
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> GraphBusResult<usize>;

    /// Открывает выделенный канал получения для топика.
    fn subscribe(
        &self,
        topic: &str,
    ) -> GraphBusResult<Box<dyn BusReceiver>>;
}

/// Приёмник сообщений одного подписчика.
///
/// Отписка происходит при `Drop`.
pub trait BusReceiver: Send {
    /// Возвращает не более одного ожидающего payload за вызов.
    fn poll(&mut self) -> GraphBusResult<Option<Bytes>>;

    fn topic(&self) -> &str;
}

/// Менеджер именованных блокировок.
///
/// Блокировка реентерабельна для потока-владельца и блокирует всех
/// остальных. `timeout = None` ждёт бесконечно.
pub trait LockManager: Send + Sync {
    fn acquire(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> GraphBusResult<()>;

    fn release(
        &self,
        name: &str,
    ) -> GraphBusResult<()>;
}

/// Набор сервисов backend'а, разделяемый узлами и endpoints.
#[derive(Clone)]
pub struct Backend {
    store: Arc<dyn DocumentStore>,
    bus: Arc<dyn MessageBus>,
    locks: Arc<dyn LockManager>,
    graph: Arc<dyn GraphStore>,
    lock_timeout: Option<Duration>,
}

impl Backend {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        bus: Arc<dyn MessageBus>,
        locks: Arc<dyn LockManager>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            store,
            bus,
            locks,
            graph,
            lock_timeout: None,
        }
    }

    /// Backend целиком в памяти процесса с настройками по умолчанию.
    pub fn in_memory() -> Self {
        Self::in_memory_with(&Settings::default())
    }

    /// Backend в памяти с ёмкостью шины и таймаутом блокировок из
    /// настроек.
    pub fn in_memory_with(settings: &Settings) -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(Broker::new(settings.bus_capacity)),
            Arc::new(InMemoryLocks::new()),
            Arc::new(InMemoryGraph::new()),
        )
        .with_lock_timeout(settings.lock_timeout())
    }

    pub fn with_lock_timeout(
        mut self,
        timeout: Option<Duration>,
    ) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn bus(&self) -> &dyn MessageBus {
        self.bus.as_ref()
    }

    pub fn graph(&self) -> &dyn GraphStore {
        self.graph.as_ref()
    }

    pub fn locks(&self) -> &dyn LockManager {
        self.locks.as_ref()
    }

    /// Захватывает именованную блокировку; она освобождается при `Drop`
    /// возвращённого guard'а.
    pub fn lock(
        &self,
        name: &str,
    ) -> GraphBusResult<LockGuard> {
        LockGuard::acquire(self.locks.clone(), name, self.lock_timeout)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Тест проверяет, что клоны `Backend` разделяют одни и те же сервисы.
    #[test]
    fn test_clones_share_services() {
        let a = Backend::in_memory();
        let b = a.clone();

        a.store().set("doc", json!({"k": 1})).unwrap();
        assert_eq!(b.store().get("doc").unwrap(), Some(json!({"k": 1})));

        let mut rx = b.bus().subscribe("/t").unwrap();
        assert_eq!(a.bus().publish("/t", Bytes::from_static(b"x")).unwrap(), 1);
        assert_eq!(rx.poll().unwrap(), Some(Bytes::from_static(b"x")));
    }

    #[test]
    fn test_lock_guard_is_reentrant() {
        let backend = Backend::in_memory();
        let outer = backend.lock("comm_graph").unwrap();
        let inner = backend.lock("comm_graph").unwrap();
        drop(inner);
        drop(outer);

        // После освобождения блокировку может взять другой поток.
        let b = backend.clone();
        std::thread::spawn(move || {
            let _g = b.lock("comm_graph").unwrap();
        })
        .join()
        .unwrap();
    }
}
