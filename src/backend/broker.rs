use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use bytes::Bytes;
use dashmap::DashMap;
use graphbus_error::{BackendError, GraphBusResult};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

use super::{BusReceiver, MessageBus};

type ChannelKey = Arc<str>;

/// Сообщение, доставляемое шиной.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: Arc<str>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(
        topic: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Брокер Pub/Sub сообщений в памяти процесса.
///
/// Поддерживает:
/// - Точные подписки по имени топика
/// - Автоматическое удаление пустых каналов при публикации
/// - Статистику публикаций и ошибок отправки
pub struct Broker {
    /// Топики → `Sender`
    channels: Arc<DashMap<ChannelKey, broadcast::Sender<Message>>>,
    /// Ёмкость буфера каждого `broadcast::channel`
    default_capacity: usize,
    /// Общее количество вызовов `publish`
    pub publish_count: AtomicUsize,
    /// Количество неудачных `send` (нет подписчиков)
    pub send_error_count: AtomicUsize,
}

/// Подписка на конкретный топик.
///
/// Отписка происходит автоматически при `Drop`.
pub struct Subscription {
    /// Топик, на который подписаны.
    pub topic: Arc<str>,
    inner: broadcast::Receiver<Message>,
}

impl Broker {
    /// Создаёт новый `Broker` с заданной буферной ёмкостью.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            default_capacity: default_capacity.max(1),
            publish_count: AtomicUsize::new(0),
            send_error_count: AtomicUsize::new(0),
        }
    }

    /// Подписка на топик (точное совпадение).
    pub fn subscribe_topic(
        &self,
        topic: &str,
    ) -> Subscription {
        let key: Arc<str> = Arc::from(topic);
        let tx = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.default_capacity).0)
            .clone();
        Subscription {
            topic: key,
            inner: tx.subscribe(),
        }
    }

    /// Публикация payload в топик.
    ///
    /// Если в канале нет подписчиков, увеличивает `send_error_count` и
    /// удаляет канал. Возвращает число получателей.
    pub fn publish_payload(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let Some(entry) = self.channels.get(topic) else {
            return 0;
        };
        let tx = entry.value().clone();
        let key = entry.key().clone();
        drop(entry);

        let delivered = match tx.send(Message::new(key.clone(), payload)) {
            Ok(n) => n,
            Err(_) => {
                self.send_error_count.fetch_add(1, Ordering::Relaxed);
                0
            }
        };
        if tx.receiver_count() == 0 {
            self.channels
                .remove_if(&key, |_, sender| sender.receiver_count() == 0);
        }
        delivered
    }

    /// Количество активных каналов.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn has_channel(
        &self,
        topic: &str,
    ) -> bool {
        self.channels.contains_key(topic)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MessageBus for Broker {
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> GraphBusResult<usize> {
        Ok(self.publish_payload(topic, payload))
    }

    fn subscribe(
        &self,
        topic: &str,
    ) -> GraphBusResult<Box<dyn BusReceiver>> {
        Ok(Box::new(self.subscribe_topic(topic)))
    }
}

impl Subscription {
    /// Пытается получить сообщение без блокировки.
    ///
    /// Отставший приёмник пропускает потерянные сообщения с предупреждением.
    pub fn try_next(&mut self) -> GraphBusResult<Option<Message>> {
        loop {
            match self.inner.try_recv() {
                Ok(msg) => return Ok(Some(msg)),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged, messages dropped");
                }
                Err(TryRecvError::Closed) => {
                    return Err(BackendError::Bus {
                        topic: self.topic.to_string(),
                        reason: "channel closed".to_string(),
                    }
                    .into())
                }
            }
        }
    }

    /// Количество сообщений в очереди на получение.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl BusReceiver for Subscription {
    fn poll(&mut self) -> GraphBusResult<Option<Bytes>> {
        Ok(self.try_next()?.map(|msg| msg.payload))
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
