use std::{fmt, sync::Arc, time::Duration};

use graphbus_error::GraphBusResult;

use crate::{config::Settings, endpoint::SharedVariable};

/// Параметры построения узла.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// `None` генерирует случайный ref из 8 символов.
    pub node_ref: Option<String>,
    pub namespace: String,
    pub discovery_document: String,
    pub worker_threads: usize,
    pub spin_period: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl NodeOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            node_ref: None,
            namespace: String::new(),
            discovery_document: settings.discovery_document.clone(),
            worker_threads: settings.worker_threads.max(1),
            spin_period: settings.spin_period(),
        }
    }

    pub fn node_ref(
        mut self,
        node_ref: impl Into<String>,
    ) -> Self {
        self.node_ref = Some(node_ref.into());
        self
    }

    pub fn namespace(
        mut self,
        namespace: impl Into<String>,
    ) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn worker_threads(
        mut self,
        threads: usize,
    ) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn spin_period(
        mut self,
        period: Duration,
    ) -> Self {
        self.spin_period = period;
        self
    }
}

type Predicate = dyn Fn() -> bool + Send + Sync;

/// Дополнительное условие продолжения spin-цикла.
#[derive(Clone)]
pub enum SpinCondition {
    /// Крутиться, пока переменная равна `true`.
    SharedVariable(Arc<SharedVariable>),
    /// Крутиться, пока предикат возвращает `true`.
    Predicate(Arc<Predicate>),
}

impl SpinCondition {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub(crate) fn holds(&self) -> GraphBusResult<bool> {
        match self {
            Self::SharedVariable(variable) => Ok(variable.get_value(true)?.as_bool().unwrap_or(false)),
            Self::Predicate(f) => Ok(f()),
        }
    }
}

impl fmt::Debug for SpinCondition {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::SharedVariable(v) => f.debug_tuple("SharedVariable").field(&v.full_name()).finish(),
            Self::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// Режим spin: период, необязательное условие и отдельный поток.
#[derive(Debug, Clone, Default)]
pub struct SpinOptions {
    /// `None` берёт период из [`NodeOptions`].
    pub period: Option<Duration>,
    pub condition: Option<SpinCondition>,
    pub threaded: bool,
}

impl SpinOptions {
    pub fn period(
        mut self,
        period: Duration,
    ) -> Self {
        self.period = Some(period);
        self
    }

    pub fn condition(
        mut self,
        condition: SpinCondition,
    ) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn threaded(
        mut self,
        threaded: bool,
    ) -> Self {
        self.threaded = threaded;
        self
    }
}
