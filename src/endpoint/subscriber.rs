use std::sync::atomic::{AtomicU64, Ordering};

use graphbus_error::GraphBusResult;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::{new_endpoint_id, run_isolated, Endpoint, EndpointContext, Registration};
use crate::{
    backend::BusReceiver,
    discovery::{EndpointDescriptor, EndpointKind},
    message::Envelope,
    topic::check_topic,
};

type PayloadFn = dyn Fn(Value) -> anyhow::Result<()> + Send + Sync;
type EnvelopeFn = dyn Fn(Value, &Envelope) -> anyhow::Result<()> + Send + Sync;

/// Пользовательский callback подписчика.
///
/// Форма выбирается при построении: только payload или payload + конверт.
pub enum SubscriberCallback {
    Payload(Box<PayloadFn>),
    WithEnvelope(Box<EnvelopeFn>),
}

impl SubscriberCallback {
    pub fn payload<F>(f: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Payload(Box::new(f))
    }

    pub fn with_envelope<F>(f: F) -> Self
    where
        F: Fn(Value, &Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::WithEnvelope(Box::new(f))
    }

    /// Callback, получающий payload, десериализованный в `T`.
    pub fn typed<T, F>(f: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::payload(move |value| f(serde_json::from_value(value)?))
    }

    fn call(
        &self,
        envelope: Envelope,
    ) -> anyhow::Result<()> {
        match self {
            Self::Payload(f) => f(envelope.msg),
            Self::WithEnvelope(f) => {
                let msg = envelope.msg.clone();
                f(msg, &envelope)
            }
        }
    }
}

/// Subscriber: выделенный канал получения, привязанный к топику.
pub struct Subscriber {
    id: String,
    topic: String,
    msg_type: String,
    qos: Option<String>,
    ctx: EndpointContext,
    callback: SubscriberCallback,
    receiver: Mutex<Option<Box<dyn BusReceiver>>>,
    received: AtomicU64,
    registration: Registration,
}

impl Subscriber {
    /// Подписывается на топик и регистрирует subscriber в discovery.
    pub fn new(
        ctx: EndpointContext,
        topic: &str,
        msg_type: impl Into<String>,
        callback: SubscriberCallback,
        qos: Option<String>,
    ) -> GraphBusResult<Self> {
        let topic = check_topic(topic)?;
        let receiver = ctx.backend.bus().subscribe(&topic)?;
        let subscriber = Self {
            id: new_endpoint_id(),
            topic,
            msg_type: msg_type.into(),
            qos,
            ctx,
            callback,
            receiver: Mutex::new(Some(receiver)),
            received: AtomicU64::new(0),
            registration: Registration::default(),
        };
        subscriber.declare()?;
        Ok(subscriber)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// Количество сообщений, переданных в callback.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl Endpoint for Subscriber {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::Subscriber
    }

    fn descriptor(&self) -> EndpointDescriptor {
        EndpointDescriptor::Subscriber {
            id: self.id.clone(),
            topic: self.topic.clone(),
            msg_type: self.msg_type.clone(),
            qos: self.qos.clone(),
        }
    }

    /// Забирает не более одного сообщения и передаёт его в callback.
    ///
    /// Ошибки и паники callback'а логируются и не выходят наружу.
    fn spin(&self) -> GraphBusResult<()> {
        self.registration.ensure_declared(&self.id)?;

        let bytes = {
            let mut receiver = self.receiver.lock();
            match receiver.as_mut() {
                Some(rx) => rx.poll()?,
                None => None,
            }
        };
        let Some(bytes) = bytes else {
            return Ok(());
        };

        let envelope = match Envelope::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic = %self.topic, endpoint_id = %self.id, error = %e, "undecodable message dropped");
                return Ok(());
            }
        };

        self.received.fetch_add(1, Ordering::Relaxed);
        run_isolated(&self.id, "subscriber", || self.callback.call(envelope));
        Ok(())
    }

    fn declare(&self) -> GraphBusResult<()> {
        {
            let mut receiver = self.receiver.lock();
            if receiver.is_none() {
                *receiver = Some(self.ctx.backend.bus().subscribe(&self.topic)?);
            }
        }
        self.registration.declare(&self.ctx, &self.descriptor())
    }

    /// Снимает регистрацию и отписывается от шины.
    fn destroy(&self) -> GraphBusResult<()> {
        self.registration.destroy(&self.ctx, &self.descriptor())?;
        self.receiver.lock().take();
        Ok(())
    }

    fn is_declared(&self) -> bool {
        self.registration.is_declared()
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("msg_type", &self.msg_type)
            .field("received", &self.received())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use graphbus_error::StatusCode;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::{backend::Backend, endpoint::tests_support::context};

    fn publish_raw(
        ctx: &EndpointContext,
        topic: &str,
        msg: Value,
    ) {
        let env = Envelope::new("test", "other", "p", msg);
        ctx.backend
            .bus()
            .publish(topic, env.encode().unwrap())
            .unwrap();
    }

    /// Тест проверяет, что spin доставляет ровно одно сообщение за вызов.
    #[test]
    fn test_spin_drains_one_message() {
        let ctx = context(Backend::in_memory(), "", "a");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = Subscriber::new(
            ctx.clone(),
            "/t",
            "i64",
            SubscriberCallback::payload(move |v| {
                sink.lock().push(v);
                Ok(())
            }),
            None,
        )
        .unwrap();

        publish_raw(&ctx, "/t", json!(1));
        publish_raw(&ctx, "/t", json!(2));

        sub.spin().unwrap();
        assert_eq!(*seen.lock(), vec![json!(1)]);
        sub.spin().unwrap();
        sub.spin().unwrap();
        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
        assert_eq!(sub.received(), 2);
    }

    #[test]
    fn test_with_envelope_callback() {
        let ctx = context(Backend::in_memory(), "", "a");
        let from = Arc::new(Mutex::new(String::new()));
        let sink = from.clone();
        let sub = Subscriber::new(
            ctx.clone(),
            "/t",
            "String",
            SubscriberCallback::with_envelope(move |_, env| {
                *sink.lock() = env.parent_node_ref.clone();
                Ok(())
            }),
            None,
        )
        .unwrap();

        publish_raw(&ctx, "/t", json!("x"));
        sub.spin().unwrap();
        assert_eq!(*from.lock(), "other");
    }

    #[test]
    fn test_typed_callback() {
        #[derive(Deserialize)]
        struct Pose {
            x: f64,
        }

        let ctx = context(Backend::in_memory(), "", "a");
        let xs = Arc::new(Mutex::new(Vec::new()));
        let sink = xs.clone();
        let sub = Subscriber::new(
            ctx.clone(),
            "/pose",
            "Pose",
            SubscriberCallback::typed(move |p: Pose| {
                sink.lock().push(p.x);
                Ok(())
            }),
            None,
        )
        .unwrap();

        publish_raw(&ctx, "/pose", json!({"x": 4.5}));
        // Нагрузка неверной формы: ошибка callback'а изолирована.
        publish_raw(&ctx, "/pose", json!("not a pose"));
        sub.spin().unwrap();
        sub.spin().unwrap();
        assert_eq!(*xs.lock(), vec![4.5]);
    }

    /// Тест проверяет изоляцию паники и ошибок callback'а.
    #[test]
    fn test_callback_failures_are_isolated() {
        let ctx = context(Backend::in_memory(), "", "a");
        let sub = Subscriber::new(
            ctx.clone(),
            "/t",
            "i64",
            SubscriberCallback::payload(|v| {
                if v == json!(0) {
                    panic!("zero");
                }
                anyhow::bail!("always fails")
            }),
            None,
        )
        .unwrap();

        publish_raw(&ctx, "/t", json!(0));
        publish_raw(&ctx, "/t", json!(1));
        assert!(sub.spin().is_ok());
        assert!(sub.spin().is_ok());
        assert_eq!(sub.received(), 2);
    }

    #[test]
    fn test_undecodable_payload_dropped() {
        let ctx = context(Backend::in_memory(), "", "a");
        let sub = Subscriber::new(
            ctx.clone(),
            "/t",
            "i64",
            SubscriberCallback::payload(|_| Ok(())),
            None,
        )
        .unwrap();

        ctx.backend
            .bus()
            .publish("/t", Bytes::from_static(b"garbage"))
            .unwrap();
        assert!(sub.spin().is_ok());
        assert_eq!(sub.received(), 0);
    }

    /// Тест проверяет, что destroy отписывает от шины.
    #[test]
    fn test_destroy_unsubscribes() {
        let ctx = context(Backend::in_memory(), "", "a");
        let sub = Subscriber::new(
            ctx.clone(),
            "/t",
            "i64",
            SubscriberCallback::payload(|_| Ok(())),
            None,
        )
        .unwrap();

        sub.destroy().unwrap();
        assert_eq!(ctx.backend.bus().publish("/t", Bytes::new()).unwrap(), 0);
        assert_eq!(
            sub.spin().unwrap_err().status_code(),
            StatusCode::EndpointDestroyed
        );

        sub.declare().unwrap();
        publish_raw(&ctx, "/t", json!(7));
        sub.spin().unwrap();
        assert_eq!(sub.received(), 1);
    }
}
