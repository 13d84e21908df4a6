//! Узел: владелец endpoints, групп обратных вызовов и spin-цикла.
//!
//! При построении узел регистрируется в discovery под адресом
//! `/<namespace>/<ref>` и объявляет локальную переменную `spin_state`,
//! через которую его spin-цикл можно остановить, в том числе из другого
//! процесса. Каждый вид endpoint'а по умолчанию попадает в свою группу.

mod options;
mod spin;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use dashmap::DashMap;
use graphbus_error::{bail, GenericError, GraphBusResult, NodeError, ResultExt, StatusCode};
pub use options::*;
use parking_lot::{Condvar, Mutex, RwLock};
use rayon::ThreadPool;
use tracing::{debug, error, info, warn};

use crate::{
    async_timer::{join_unless_current, AsyncTimer, StopSignal},
    backend::Backend,
    callback_group::{CallbackGroup, CallbackGroupPolicy},
    discovery::DiscoveryGraph,
    endpoint::{
        Endpoint, EndpointContext, EndpointHandle, Publisher, Scope, SharedVariable,
        SharedVariableDecl, Subscriber, SubscriberCallback, Timer, VariableType,
    },
    logging::log_failure,
    topic::{random_ref, topic_path},
};

pub const DEFAULT_PUBLISHER_GROUP: &str = "default_publisher_callback_group";
pub const DEFAULT_SUBSCRIBER_GROUP: &str = "default_subscriber_callback_group";
pub const DEFAULT_SHARED_VARIABLE_GROUP: &str = "default_shared_variable_callback_group";
pub const DEFAULT_TIMER_GROUP: &str = "default_timer_callback_group";

/// Имя локальной переменной-флага spin-цикла.
pub const SPIN_STATE: &str = "spin_state";

pub struct Node {
    node_ref: String,
    namespace: String,
    address: String,
    backend: Backend,
    discovery: DiscoveryGraph,
    options: NodeOptions,
    declared: AtomicBool,
    groups: RwLock<Vec<Arc<CallbackGroup>>>,
    pool: RwLock<Option<Arc<ThreadPool>>>,
    spin_state: Arc<SharedVariable>,
    /// Сигнал остановки текущей spin-сессии; у каждой сессии свой.
    stop: Mutex<Arc<StopSignal>>,
    /// `true`, пока spin-цикл не завершился полностью.
    loop_running: Mutex<bool>,
    loop_idle: Condvar,
    spin_thread: Mutex<Option<JoinHandle<()>>>,
    async_timers: DashMap<String, Arc<AsyncTimer>>,
}

impl Node {
    /// Строит узел и регистрирует его в discovery.
    pub fn new(
        backend: Backend,
        options: NodeOptions,
    ) -> GraphBusResult<Arc<Self>> {
        let node_ref = options.node_ref.clone().unwrap_or_else(random_ref);
        let namespace = options.namespace.clone();
        let address = topic_path([namespace.as_str(), node_ref.as_str()]);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.worker_threads)
            .thread_name({
                let node_ref = node_ref.clone();
                move |i| format!("graphbus-{node_ref}-{i}")
            })
            .build()
            .map_err(|e| GenericError::new(StatusCode::Internal, format!("worker pool: {e}")))?;

        let discovery = DiscoveryGraph::new(
            backend.clone(),
            DiscoveryGraph::document_name(&namespace, &options.discovery_document),
        );
        discovery
            .register_node(&address, &node_ref, &namespace)
            .context(format!("register node {address}"))?;

        let ctx = EndpointContext {
            backend: backend.clone(),
            discovery: discovery.clone(),
            node_ref: node_ref.clone(),
            namespace: namespace.clone(),
            node_address: address.clone(),
        };
        let spin_state_decl = SharedVariableDecl::new(SPIN_STATE, false)
            .scope(Scope::Local)
            .variable_type(VariableType::Bool)
            .descriptor(format!("Spin state of node {node_ref}"))
            .override_existing(true);
        let spin_state = match SharedVariable::new(ctx, spin_state_decl) {
            Ok(variable) => Arc::new(variable),
            Err(e) => {
                if let Err(cleanup) = discovery.unregister_node(&address) {
                    warn!(node = %address, error = %cleanup, "cleanup after failed construction");
                }
                return Err(e);
            }
        };

        let groups = vec![
            Arc::new(CallbackGroup::new(
                DEFAULT_PUBLISHER_GROUP,
                CallbackGroupPolicy::Reentrant,
            )),
            Arc::new(CallbackGroup::new(
                DEFAULT_SUBSCRIBER_GROUP,
                CallbackGroupPolicy::MutuallyExclusive,
            )),
            Arc::new(CallbackGroup::new(
                DEFAULT_SHARED_VARIABLE_GROUP,
                CallbackGroupPolicy::Reentrant,
            )),
            Arc::new(CallbackGroup::new(
                DEFAULT_TIMER_GROUP,
                CallbackGroupPolicy::Reentrant,
            )),
        ];
        groups[2].add(spin_state.clone());

        info!(node = %address, namespace = %namespace, "node declared");

        Ok(Arc::new(Self {
            node_ref,
            namespace,
            address,
            backend,
            discovery,
            options,
            declared: AtomicBool::new(true),
            groups: RwLock::new(groups),
            pool: RwLock::new(Some(Arc::new(pool))),
            spin_state,
            stop: Mutex::new(Arc::new(StopSignal::default())),
            loop_running: Mutex::new(false),
            loop_idle: Condvar::new(),
            spin_thread: Mutex::new(None),
            async_timers: DashMap::new(),
        }))
    }

    pub fn node_ref(&self) -> &str {
        &self.node_ref
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Адрес узла: `/<namespace>/<ref>`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn discovery(&self) -> &DiscoveryGraph {
        &self.discovery
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn is_declared(&self) -> bool {
        self.declared.load(Ordering::Acquire)
    }

    /// Переменная-флаг spin-цикла.
    pub fn spin_state(&self) -> &Arc<SharedVariable> {
        &self.spin_state
    }

    fn ensure_declared(&self) -> GraphBusResult<()> {
        if self.is_declared() {
            Ok(())
        } else {
            Err(NodeError::NodeDestroyed {
                node: self.address.clone(),
            }
            .into())
        }
    }

    fn context(&self) -> EndpointContext {
        EndpointContext {
            backend: self.backend.clone(),
            discovery: self.discovery.clone(),
            node_ref: self.node_ref.clone(),
            namespace: self.namespace.clone(),
            node_address: self.address.clone(),
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Группы обратных вызовов
    ////////////////////////////////////////////////////////////////////////////

    pub fn callback_groups(&self) -> Vec<Arc<CallbackGroup>> {
        self.groups.read().clone()
    }

    pub fn callback_group(
        &self,
        name: &str,
    ) -> Option<Arc<CallbackGroup>> {
        self.groups.read().iter().find(|g| g.name() == name).cloned()
    }

    /// Создаёт пользовательскую группу. Группа с тем же именем
    /// возвращается как есть.
    pub fn create_callback_group(
        &self,
        name: &str,
        policy: CallbackGroupPolicy,
    ) -> GraphBusResult<Arc<CallbackGroup>> {
        self.ensure_declared()?;
        let mut groups = self.groups.write();
        if let Some(existing) = groups.iter().find(|g| g.name() == name) {
            if existing.policy() != policy {
                warn!(node = %self.address, group = name, "callback group exists with another policy");
            }
            return Ok(existing.clone());
        }
        let group = Arc::new(CallbackGroup::new(name, policy));
        groups.push(group.clone());
        debug!(node = %self.address, group = name, ?policy, "callback group created");
        Ok(group)
    }

    fn resolve_group(
        &self,
        name: Option<&str>,
        default: &str,
    ) -> GraphBusResult<Arc<CallbackGroup>> {
        let name = name.unwrap_or(default);
        match self.callback_group(name) {
            Some(group) => Ok(group),
            None => bail!(StatusCode::NotFound, "callback group '{}' not found", name),
        }
    }

    /// Снимает регистрацию endpoint'а и убирает его из первой группы,
    /// где он найден.
    fn destroy_endpoint(
        &self,
        endpoint: &dyn Endpoint,
    ) -> GraphBusResult<()> {
        endpoint.destroy()?;
        for group in self.callback_groups() {
            if group.remove(endpoint.id()).is_ok() {
                return Ok(());
            }
        }
        warn!(
            node = %self.address,
            endpoint_id = endpoint.id(),
            "endpoint is not a member of any callback group"
        );
        Ok(())
    }

    fn collect<T>(
        &self,
        pick: impl Fn(&EndpointHandle) -> Option<&Arc<T>>,
    ) -> Vec<Arc<T>> {
        self.groups
            .read()
            .iter()
            .flat_map(|g| g.endpoints())
            .filter_map(|e| pick(&e).cloned())
            .collect()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Publishers
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_publisher(
        &self,
        topic: &str,
        msg_type: &str,
        qos: Option<String>,
        group: Option<&str>,
    ) -> GraphBusResult<Arc<Publisher>> {
        self.ensure_declared()?;
        let group = self.resolve_group(group, DEFAULT_PUBLISHER_GROUP)?;
        let publisher = Arc::new(Publisher::new(self.context(), topic, msg_type, qos)?);
        group.add(publisher.clone());
        debug!(node = %self.address, topic = publisher.topic(), "publisher created");
        Ok(publisher)
    }

    pub fn destroy_publisher(
        &self,
        publisher: &Publisher,
    ) -> GraphBusResult<()> {
        self.destroy_endpoint(publisher)
    }

    pub fn publishers(&self) -> Vec<Arc<Publisher>> {
        self.collect(EndpointHandle::as_publisher)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Subscribers
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_subscription(
        &self,
        topic: &str,
        msg_type: &str,
        callback: SubscriberCallback,
        qos: Option<String>,
        group: Option<&str>,
    ) -> GraphBusResult<Arc<Subscriber>> {
        self.ensure_declared()?;
        let group = self.resolve_group(group, DEFAULT_SUBSCRIBER_GROUP)?;
        let subscriber = Arc::new(Subscriber::new(
            self.context(),
            topic,
            msg_type,
            callback,
            qos,
        )?);
        group.add(subscriber.clone());
        debug!(node = %self.address, topic = subscriber.topic(), "subscription created");
        Ok(subscriber)
    }

    pub fn destroy_subscription(
        &self,
        subscriber: &Subscriber,
    ) -> GraphBusResult<()> {
        self.destroy_endpoint(subscriber)
    }

    pub fn subscriptions(&self) -> Vec<Arc<Subscriber>> {
        self.collect(EndpointHandle::as_subscriber)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Shared variables
    ////////////////////////////////////////////////////////////////////////////

    /// Объявляет переменную.
    ///
    /// Если узел уже держит переменную с тем же полным именем, возвращается
    /// она; с `override_existing` новое значение записывается через неё.
    pub fn declare_shared_variable(
        &self,
        decl: SharedVariableDecl,
        group: Option<&str>,
    ) -> GraphBusResult<Arc<SharedVariable>> {
        self.ensure_declared()?;
        let full_name = decl.full_name(&self.namespace, &self.node_ref);
        if let Some(existing) = self
            .shared_variables()
            .into_iter()
            .find(|v| v.full_name() == full_name)
        {
            if decl.override_existing {
                existing.set_value(decl.value, true)?;
            }
            return Ok(existing);
        }

        let group = self.resolve_group(group, DEFAULT_SHARED_VARIABLE_GROUP)?;
        let variable = Arc::new(SharedVariable::new(self.context(), decl)?);
        group.add(variable.clone());
        debug!(node = %self.address, name = variable.full_name(), "shared variable declared");
        Ok(variable)
    }

    /// Объявляет пачку переменных; `prefix` добавляется к каждому имени.
    pub fn declare_shared_variables(
        &self,
        decls: Vec<SharedVariableDecl>,
        prefix: &str,
    ) -> GraphBusResult<Vec<Arc<SharedVariable>>> {
        decls
            .into_iter()
            .map(|mut decl| {
                if !prefix.is_empty() {
                    decl.name = topic_path([prefix, decl.name.as_str()]);
                }
                self.declare_shared_variable(decl, None)
            })
            .collect()
    }

    /// Снимает описание переменной. Запись в хранилище остаётся.
    pub fn undeclare_shared_variable(
        &self,
        variable: &SharedVariable,
    ) -> GraphBusResult<()> {
        self.destroy_endpoint(variable)
    }

    pub fn shared_variables(&self) -> Vec<Arc<SharedVariable>> {
        self.collect(EndpointHandle::as_shared_variable)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Timers
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_timer<F>(
        &self,
        name: &str,
        period: Duration,
        callback: F,
        group: Option<&str>,
    ) -> GraphBusResult<Arc<Timer>>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ensure_declared()?;
        let group = self.resolve_group(group, DEFAULT_TIMER_GROUP)?;
        let timer = Arc::new(Timer::new(self.context(), name, period, callback)?);
        group.add(timer.clone());
        Ok(timer)
    }

    pub fn destroy_timer(
        &self,
        timer: &Timer,
    ) -> GraphBusResult<()> {
        self.destroy_endpoint(timer)
    }

    pub fn timers(&self) -> Vec<Arc<Timer>> {
        self.collect(EndpointHandle::as_timer)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Async timers
    ////////////////////////////////////////////////////////////////////////////

    /// Запускает свободно бегущий таймер, принадлежащий узлу.
    pub fn create_async_timer<F>(
        &self,
        name: Option<String>,
        period: Duration,
        callback: F,
    ) -> GraphBusResult<Arc<AsyncTimer>>
    where
        F: Fn() -> anyhow::Result<()> + Send + 'static,
    {
        self.ensure_declared()?;
        let timer = Arc::new(AsyncTimer::start(name, period, callback)?);
        if let Some(previous) = self
            .async_timers
            .insert(timer.name().to_string(), timer.clone())
        {
            previous.cancel();
        }
        Ok(timer)
    }

    /// Останавливает и забывает таймер. `false`, если такого нет.
    pub fn destroy_async_timer(
        &self,
        name: &str,
    ) -> bool {
        match self.async_timers.remove(name) {
            Some((_, timer)) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    pub fn async_timers(&self) -> Vec<Arc<AsyncTimer>> {
        self.async_timers.iter().map(|e| e.value().clone()).collect()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Уничтожение
    ////////////////////////////////////////////////////////////////////////////

    /// Останавливает spin, уничтожает все endpoints и снимает узел с
    /// регистрации. Повторный вызов ничего не делает.
    ///
    /// Ошибка уничтожения отдельного endpoint'а не прерывает процесс:
    /// возвращается первая из них.
    pub fn destroy(&self) -> GraphBusResult<()> {
        if !self.declared.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.stop.lock().trigger();
        let spin_thread = self.spin_thread.lock().take();
        if let Some(handle) = spin_thread {
            join_unless_current(handle, "spin");
        }

        let timers: Vec<String> = self.async_timers.iter().map(|e| e.key().clone()).collect();
        for name in timers {
            self.destroy_async_timer(&name);
        }

        let mut first_error = None;
        for group in self.callback_groups() {
            for endpoint in group.drain() {
                if let Err(e) = endpoint.destroy() {
                    log_failure!(
                        e,
                        node = %self.address,
                        endpoint_id = endpoint.id(),
                        "endpoint destroy failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        self.discovery.unregister_node(&self.address)?;
        self.pool.write().take();
        info!(node = %self.address, "node destroyed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.is_declared() {
            if let Err(e) = self.destroy() {
                error!(node = %self.address, error = %e, "destroy on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("declared", &self.is_declared())
            .field("groups", &self.groups.read().len())
            .finish()
    }
}
