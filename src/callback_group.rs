//! Группы обратных вызовов.
//!
//! Группа владеет упорядоченным набором endpoints и определяет, могут ли
//! их `spin` выполняться одновременно.

use std::sync::Arc;

use graphbus_error::{EndpointError, GraphBusResult};
use parking_lot::{Mutex, RwLock};
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use crate::{endpoint::EndpointHandle, logging::log_failure};

/// Политика исполнения группы.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackGroupPolicy {
    /// Endpoints вызываются строго по очереди, в порядке добавления.
    MutuallyExclusive,
    /// Каждый endpoint отправляется в пул потоков без ожидания.
    Reentrant,
}

pub struct CallbackGroup {
    name: String,
    policy: CallbackGroupPolicy,
    endpoints: RwLock<Vec<EndpointHandle>>,
    exclusive: Mutex<()>,
}

impl CallbackGroup {
    pub fn new(
        name: impl Into<String>,
        policy: CallbackGroupPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            endpoints: RwLock::new(Vec::new()),
            exclusive: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> CallbackGroupPolicy {
        self.policy
    }

    pub fn add(
        &self,
        endpoint: impl Into<EndpointHandle>,
    ) {
        self.endpoints.write().push(endpoint.into());
    }

    /// Убирает endpoint из группы по идентификатору.
    pub fn remove(
        &self,
        endpoint_id: &str,
    ) -> GraphBusResult<EndpointHandle> {
        let mut endpoints = self.endpoints.write();
        match endpoints.iter().position(|e| e.id() == endpoint_id) {
            Some(index) => Ok(endpoints.remove(index)),
            None => Err(EndpointError::NotInCallbackGroup {
                endpoint_id: endpoint_id.to_string(),
            }
            .into()),
        }
    }

    pub fn contains(
        &self,
        endpoint_id: &str,
    ) -> bool {
        self.endpoints.read().iter().any(|e| e.id() == endpoint_id)
    }

    /// Снимок endpoints группы в порядке добавления.
    pub fn endpoints(&self) -> Vec<EndpointHandle> {
        self.endpoints.read().clone()
    }

    /// Забирает все endpoints, оставляя группу пустой.
    pub fn drain(&self) -> Vec<EndpointHandle> {
        std::mem::take(&mut *self.endpoints.write())
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Один проход по группе.
    ///
    /// `MutuallyExclusive` выполняет `spin` endpoints последовательно на
    /// текущем потоке, и два прохода одной группы не перекрываются.
    /// `Reentrant` отправляет каждый `spin` в `pool` и не ждёт завершения.
    pub fn spin(
        &self,
        pool: &ThreadPool,
    ) {
        let endpoints = self.endpoints();
        match self.policy {
            CallbackGroupPolicy::MutuallyExclusive => {
                let _turn = self.exclusive.lock();
                for endpoint in &endpoints {
                    spin_logged(&self.name, endpoint);
                }
            }
            CallbackGroupPolicy::Reentrant => {
                let group: Arc<str> = Arc::from(self.name.as_str());
                for endpoint in endpoints {
                    let group = group.clone();
                    pool.spawn(move || spin_logged(&group, &endpoint));
                }
            }
        }
    }
}

fn spin_logged(
    group: &str,
    endpoint: &EndpointHandle,
) {
    if let Err(e) = endpoint.spin() {
        log_failure!(
            e,
            group,
            endpoint_id = %endpoint.id(),
            kind = %endpoint.kind(),
            "endpoint spin failed"
        );
    }
}

impl std::fmt::Debug for CallbackGroup {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CallbackGroup")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("endpoints", &self.len())
            .finish()
    }
}
