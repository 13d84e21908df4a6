use std::mem;

use graphbus_error::{BackendError, GraphBusResult};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{trace, warn};

use super::{new_endpoint_id, Endpoint, EndpointContext, Registration};
use crate::{
    discovery::{EndpointDescriptor, EndpointKind},
    message::Envelope,
    topic::check_topic,
};

/// Publisher: отправляет конверты в топик сразу или через кеш.
///
/// Кеш не ограничен; `spin` отправляет его целиком в порядке поступления.
pub struct Publisher {
    id: String,
    topic: String,
    msg_type: String,
    qos: Option<String>,
    ctx: EndpointContext,
    cache: Mutex<Vec<Envelope>>,
    registration: Registration,
}

impl Publisher {
    /// Строит publisher и регистрирует его в discovery.
    ///
    /// Топик без ведущего `/` отклоняется сразу.
    pub fn new(
        ctx: EndpointContext,
        topic: &str,
        msg_type: impl Into<String>,
        qos: Option<String>,
    ) -> GraphBusResult<Self> {
        let publisher = Self {
            id: new_endpoint_id(),
            topic: check_topic(topic)?,
            msg_type: msg_type.into(),
            qos,
            ctx,
            cache: Mutex::new(Vec::new()),
            registration: Registration::default(),
        };
        publisher.declare()?;
        Ok(publisher)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// Количество сообщений, ждущих `spin`.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    /// Публикует сообщение: `instant` отправляет сразу, иначе сообщение
    /// ждёт следующего `spin`.
    pub fn publish<T: Serialize + ?Sized>(
        &self,
        msg: &T,
        instant: bool,
    ) -> GraphBusResult<()> {
        self.registration.ensure_declared(&self.id)?;

        let payload = serde_json::to_value(msg)
            .map_err(|e| BackendError::codec(self.msg_type.clone(), e))?;
        let envelope = Envelope::new(
            self.msg_type.clone(),
            self.ctx.node_ref.clone(),
            self.id.clone(),
            payload,
        );

        if instant {
            self.send(&envelope)
        } else {
            self.cache.lock().push(envelope);
            Ok(())
        }
    }

    fn send(
        &self,
        envelope: &Envelope,
    ) -> GraphBusResult<()> {
        let receivers = self
            .ctx
            .backend
            .bus()
            .publish(&self.topic, envelope.encode()?)?;
        trace!(topic = %self.topic, endpoint_id = %self.id, receivers, "message sent");
        Ok(())
    }
}

impl Endpoint for Publisher {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::Publisher
    }

    fn descriptor(&self) -> EndpointDescriptor {
        EndpointDescriptor::Publisher {
            id: self.id.clone(),
            topic: self.topic.clone(),
            msg_type: self.msg_type.clone(),
            qos: self.qos.clone(),
        }
    }

    /// Отправляет кеш в порядке поступления и очищает его.
    ///
    /// Первая неудачная отправка прерывает вызов; неотправленный остаток
    /// отбрасывается.
    fn spin(&self) -> GraphBusResult<()> {
        self.registration.ensure_declared(&self.id)?;

        let pending = mem::take(&mut *self.cache.lock());
        let total = pending.len();
        for (sent, envelope) in pending.iter().enumerate() {
            if let Err(e) = self.send(envelope) {
                warn!(
                    topic = %self.topic,
                    endpoint_id = %self.id,
                    dropped = total - sent,
                    error = %e,
                    "publish failed, remaining cached messages dropped"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    fn declare(&self) -> GraphBusResult<()> {
        self.registration.declare(&self.ctx, &self.descriptor())
    }

    fn destroy(&self) -> GraphBusResult<()> {
        self.registration.destroy(&self.ctx, &self.descriptor())?;
        Ok(())
    }

    fn is_declared(&self) -> bool {
        self.registration.is_declared()
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("msg_type", &self.msg_type)
            .field("cached", &self.cached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use graphbus_error::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::{
        backend::{Backend, BusReceiver},
        discovery::DiscoveryGraph,
        endpoint::tests_support::context,
    };

    fn drain(rx: &mut Box<dyn BusReceiver>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(bytes) = rx.poll().unwrap() {
            out.push(Envelope::decode(&bytes).unwrap());
        }
        out
    }

    /// Тест проверяет немедленную отправку.
    #[test]
    fn test_instant_publish() {
        let ctx = context(Backend::in_memory(), "ns", "a");
        let mut rx = ctx.backend.bus().subscribe("/chatter").unwrap();
        let publisher = Publisher::new(ctx, "/chatter", "String", None).unwrap();

        publisher.publish("hello", true).unwrap();
        let got = drain(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].msg, json!("hello"));
        assert_eq!(got[0].parent_node_ref, "a");
        assert_eq!(got[0].publisher_id, publisher.id());
        assert_eq!(publisher.cached(), 0);
    }

    /// Тест проверяет, что кеш отправляется по spin в порядке поступления.
    #[test]
    fn test_cached_publish_flushed_in_order() {
        let ctx = context(Backend::in_memory(), "ns", "a");
        let mut rx = ctx.backend.bus().subscribe("/chatter").unwrap();
        let publisher = Publisher::new(ctx, "/chatter", "i64", None).unwrap();

        for i in 0..3 {
            publisher.publish(&i, false).unwrap();
        }
        assert_eq!(publisher.cached(), 3);
        assert!(drain(&mut rx).is_empty());

        publisher.spin().unwrap();
        let got: Vec<_> = drain(&mut rx).into_iter().map(|e| e.msg).collect();
        assert_eq!(got, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(publisher.cached(), 0);
    }

    #[test]
    fn test_malformed_topic_fails_fast() {
        let ctx = context(Backend::in_memory(), "ns", "a");
        let err = Publisher::new(ctx, "chatter", "String", None).err().unwrap();
        assert_eq!(err.status_code(), StatusCode::MalformedTopic);
    }

    /// Тест проверяет, что publisher без зарегистрированного узла не
    /// строится.
    #[test]
    fn test_requires_declared_node() {
        let backend = Backend::in_memory();
        let ctx = EndpointContext {
            discovery: DiscoveryGraph::new(backend.clone(), "comm_graph"),
            backend,
            node_ref: "ghost".into(),
            namespace: String::new(),
            node_address: "/ghost".into(),
        };
        let err = Publisher::new(ctx, "/t", "String", None).err().unwrap();
        assert_eq!(err.status_code(), StatusCode::NodeNotDeclared);
    }

    #[test]
    fn test_publish_after_destroy_fails() {
        let ctx = context(Backend::in_memory(), "ns", "a");
        let publisher = Publisher::new(ctx.clone(), "/t", "String", None).unwrap();
        publisher.destroy().unwrap();
        publisher.destroy().unwrap();

        let err = publisher.publish("late", true).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::EndpointDestroyed);
        assert!(ctx.discovery.endpoints(&ctx.node_address).unwrap().is_empty());
    }
}
