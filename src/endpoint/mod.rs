//! Endpoints: единицы коммуникации и периодической работы узла.
//!
//! Каждый endpoint умеет `spin`, `declare` и `destroy`. `declare`
//! регистрирует описание (и ребро топологии) под адресом узла-владельца,
//! `destroy` снимает регистрацию. Вид endpoint'а выражен тегированным
//! [`EndpointHandle`], поэтому фильтрация по виду это обычный `match`.

pub mod publisher;
pub mod shared_variable;
pub mod subscriber;
pub mod timer;

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use graphbus_error::{EndpointError, GraphBusResult};
pub use publisher::*;
pub use shared_variable::*;
pub use subscriber::*;
pub use timer::*;
use tracing::error;

pub use crate::discovery::{EndpointDescriptor, EndpointKind};
use crate::{backend::Backend, discovery::DiscoveryGraph};

/// Общий интерфейс endpoints.
pub trait Endpoint: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> EndpointKind;

    /// Текущее описание для документа discovery.
    fn descriptor(&self) -> EndpointDescriptor;

    /// Одна дискретная единица работы.
    fn spin(&self) -> GraphBusResult<()>;

    /// Регистрирует endpoint в discovery.
    fn declare(&self) -> GraphBusResult<()>;

    /// Снимает регистрацию. Повторный вызов ничего не делает.
    fn destroy(&self) -> GraphBusResult<()>;

    fn is_declared(&self) -> bool;
}

/// Всё, что endpoint получает от узла-владельца при построении.
#[derive(Clone, Debug)]
pub struct EndpointContext {
    pub backend: Backend,
    pub discovery: DiscoveryGraph,
    pub node_ref: String,
    pub namespace: String,
    pub node_address: String,
}

/// Тегированная ссылка на endpoint любого вида.
#[derive(Clone)]
pub enum EndpointHandle {
    Publisher(Arc<Publisher>),
    Subscriber(Arc<Subscriber>),
    SharedVariable(Arc<SharedVariable>),
    Timer(Arc<Timer>),
}

impl EndpointHandle {
    pub fn as_endpoint(&self) -> &dyn Endpoint {
        match self {
            Self::Publisher(p) => p.as_ref(),
            Self::Subscriber(s) => s.as_ref(),
            Self::SharedVariable(v) => v.as_ref(),
            Self::Timer(t) => t.as_ref(),
        }
    }

    pub fn id(&self) -> &str {
        self.as_endpoint().id()
    }

    pub fn kind(&self) -> EndpointKind {
        self.as_endpoint().kind()
    }

    pub fn spin(&self) -> GraphBusResult<()> {
        self.as_endpoint().spin()
    }

    pub fn destroy(&self) -> GraphBusResult<()> {
        self.as_endpoint().destroy()
    }

    pub fn as_publisher(&self) -> Option<&Arc<Publisher>> {
        match self {
            Self::Publisher(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_subscriber(&self) -> Option<&Arc<Subscriber>> {
        match self {
            Self::Subscriber(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_shared_variable(&self) -> Option<&Arc<SharedVariable>> {
        match self {
            Self::SharedVariable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timer(&self) -> Option<&Arc<Timer>> {
        match self {
            Self::Timer(t) => Some(t),
            _ => None,
        }
    }
}

impl std::fmt::Debug for EndpointHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}

macro_rules! impl_into_handle {
    ($($variant:ident),*) => {
        $(
            impl From<Arc<$variant>> for EndpointHandle {
                fn from(e: Arc<$variant>) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

impl_into_handle!(Publisher, Subscriber, SharedVariable, Timer);

/// Флаг регистрации endpoint'а в discovery.
#[derive(Debug, Default)]
pub(crate) struct Registration {
    declared: AtomicBool,
}

impl Registration {
    pub(crate) fn is_declared(&self) -> bool {
        self.declared.load(Ordering::Acquire)
    }

    pub(crate) fn declare(
        &self,
        ctx: &EndpointContext,
        descriptor: &EndpointDescriptor,
    ) -> GraphBusResult<()> {
        ctx.discovery
            .declare_endpoint(&ctx.node_address, &ctx.namespace, descriptor)?;
        self.declared.store(true, Ordering::Release);
        Ok(())
    }

    /// Возвращает `false`, если endpoint уже был снят с регистрации.
    pub(crate) fn destroy(
        &self,
        ctx: &EndpointContext,
        descriptor: &EndpointDescriptor,
    ) -> GraphBusResult<bool> {
        if !self.is_declared() {
            return Ok(false);
        }
        ctx.discovery
            .undeclare_endpoint(&ctx.node_address, descriptor)?;
        self.declared.store(false, Ordering::Release);
        Ok(true)
    }

    pub(crate) fn ensure_declared(
        &self,
        endpoint_id: &str,
    ) -> GraphBusResult<()> {
        if self.is_declared() {
            Ok(())
        } else {
            Err(EndpointError::EndpointDestroyed {
                endpoint_id: endpoint_id.to_string(),
            }
            .into())
        }
    }
}

/// Новый идентификатор endpoint'а.
pub(crate) fn new_endpoint_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Текст паники из её payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Выполняет пользовательский callback, изолируя ошибки и паники.
///
/// Возвращает `true`, если callback завершился успешно.
pub(crate) fn run_isolated<F>(
    endpoint_id: &str,
    what: &str,
    f: F,
) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(endpoint_id, error = %format!("{e:#}"), "{what} callback failed");
            false
        }
        Err(payload) => {
            error!(
                endpoint_id,
                panic = %panic_message(payload.as_ref()),
                "{what} callback panicked"
            );
            false
        }
    }
}
