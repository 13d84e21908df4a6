use std::fmt;

use graphbus_error::{BackendError, EndpointError, GraphBusResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{new_endpoint_id, Endpoint, EndpointContext, Registration};
use crate::{
    discovery::{EndpointDescriptor, EndpointKind},
    message::now_timestamp,
    topic::topic_path,
};

/// Область видимости переменной: общая для пространства имён или
/// приватная для узла.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Global,
    Local,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Local => "local",
        }
    }
}

/// Объявленный тип значения переменной.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    Unspecified,
    Int,
    Float,
    Str,
    Bool,
}

impl VariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
        }
    }

    /// Проверяет значение на соответствие типу. `null` допустим всегда.
    pub fn accepts(
        &self,
        value: &Value,
    ) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            Self::Unspecified => true,
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_f64(),
            Self::Str => value.is_string(),
            Self::Bool => value.is_boolean(),
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Запись переменной в хранилище документов, по полному имени.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedVariableRecord {
    pub timestamp: f64,
    pub variable_type: VariableType,
    #[serde(default)]
    pub descriptor: String,
    pub setter_id: String,
    pub value: Value,
}

/// Параметры объявления переменной.
#[derive(Debug, Clone, Deserialize)]
pub struct SharedVariableDecl {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub variable_type: VariableType,
    #[serde(default)]
    pub descriptor: String,
    /// Перезаписать уже существующую запись начальным значением.
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

impl SharedVariableDecl {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            scope: Scope::Global,
            variable_type: VariableType::Unspecified,
            descriptor: String::new(),
            override_existing: false,
        }
    }

    pub fn scope(
        mut self,
        scope: Scope,
    ) -> Self {
        self.scope = scope;
        self
    }

    pub fn variable_type(
        mut self,
        variable_type: VariableType,
    ) -> Self {
        self.variable_type = variable_type;
        self
    }

    pub fn descriptor(
        mut self,
        descriptor: impl Into<String>,
    ) -> Self {
        self.descriptor = descriptor.into();
        self
    }

    pub fn override_existing(
        mut self,
        yes: bool,
    ) -> Self {
        self.override_existing = yes;
        self
    }

    /// Полное имя записи: `namespace` + (`node_ref` для local) + `name`.
    pub fn full_name(
        &self,
        namespace: &str,
        node_ref: &str,
    ) -> String {
        match self.scope {
            Scope::Global => topic_path([namespace, self.name.as_str()]),
            Scope::Local => topic_path([namespace, node_ref, self.name.as_str()]),
        }
    }
}

#[derive(Debug)]
struct LocalState {
    current: SharedVariableRecord,
    pending: Option<SharedVariableRecord>,
}

/// Переменная, разделяемая между узлами через хранилище документов.
///
/// Конфликты разрешаются по метке времени: запись применяется, только
/// если она строго новее сохранённой. Порядок блокировок: сначала
/// именованная блокировка записи, затем локальное состояние.
pub struct SharedVariable {
    id: String,
    name: String,
    full_name: String,
    scope: Scope,
    variable_type: VariableType,
    descriptor: String,
    ctx: EndpointContext,
    state: Mutex<LocalState>,
    registration: Registration,
}

impl SharedVariable {
    pub fn new(
        ctx: EndpointContext,
        decl: SharedVariableDecl,
    ) -> GraphBusResult<Self> {
        let full_name = decl.full_name(&ctx.namespace, &ctx.node_ref);
        if !decl.variable_type.accepts(&decl.value) {
            return Err(EndpointError::TypeMismatch {
                name: full_name,
                expected: decl.variable_type.to_string(),
            }
            .into());
        }

        let initial = SharedVariableRecord {
            timestamp: now_timestamp(),
            variable_type: decl.variable_type,
            descriptor: decl.descriptor.clone(),
            setter_id: ctx.node_ref.clone(),
            value: decl.value,
        };

        let current = {
            let _guard = ctx.backend.lock(&full_name)?;
            match read_record(&ctx, &full_name)? {
                Some(stored) if !decl.override_existing => {
                    debug!(name = %full_name, "adopting existing shared variable");
                    stored
                }
                _ => {
                    write_record(&ctx, &full_name, &initial)?;
                    initial
                }
            }
        };

        let variable_type = match decl.variable_type {
            VariableType::Unspecified => current.variable_type,
            declared => declared,
        };

        let variable = Self {
            id: new_endpoint_id(),
            name: decl.name,
            full_name,
            scope: decl.scope,
            variable_type,
            descriptor: decl.descriptor,
            ctx,
            state: Mutex::new(LocalState {
                current,
                pending: None,
            }),
            registration: Registration::default(),
        };
        variable.declare()?;
        Ok(variable)
    }

    /// Имя, под которым переменная объявлена в узле.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn variable_type(&self) -> VariableType {
        self.variable_type
    }

    /// Есть ли отложенная запись, ожидающая `spin`.
    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Локальное значение; `spin = true` сначала сверяется с хранилищем.
    pub fn get_value(
        &self,
        spin: bool,
    ) -> GraphBusResult<Value> {
        if spin {
            self.reconcile()?;
        }
        Ok(self.state.lock().current.value.clone())
    }

    /// Локальная запись целиком.
    pub fn get_raw_value(
        &self,
        spin: bool,
    ) -> GraphBusResult<SharedVariableRecord> {
        if spin {
            self.reconcile()?;
        }
        Ok(self.state.lock().current.clone())
    }

    /// Записывает значение.
    ///
    /// Возвращает `false`, если значение не прошло проверку типа или если
    /// мгновенная запись оказалась старше сохранённой.
    pub fn set_value(
        &self,
        value: impl Into<Value>,
        instant: bool,
    ) -> GraphBusResult<bool> {
        self.registration.ensure_declared(&self.id)?;

        let value = value.into();
        if !self.variable_type.accepts(&value) {
            warn!(
                name = %self.full_name,
                expected = %self.variable_type,
                "type mismatch, write dropped"
            );
            return Ok(false);
        }

        let record = SharedVariableRecord {
            timestamp: now_timestamp(),
            variable_type: self.variable_type,
            descriptor: self.descriptor.clone(),
            setter_id: self.ctx.node_ref.clone(),
            value,
        };

        if !instant {
            self.state.lock().pending = Some(record);
            return Ok(true);
        }

        let _guard = self.ctx.backend.lock(&self.full_name)?;
        let stored = read_record(&self.ctx, &self.full_name)?;
        let mut state = self.state.lock();
        state.pending = None;
        if is_newer(&record, stored.as_ref()) {
            write_record(&self.ctx, &self.full_name, &record)?;
            state.current = record;
            Ok(true)
        } else {
            debug!(name = %self.full_name, "instant write superseded by a newer record");
            if let Some(stored) = stored {
                state.current = stored;
            }
            Ok(false)
        }
    }

    /// Сверка с хранилищем по правилу last-write-wins.
    fn reconcile(&self) -> GraphBusResult<()> {
        let _guard = self.ctx.backend.lock(&self.full_name)?;
        let stored = read_record(&self.ctx, &self.full_name)?;
        let mut state = self.state.lock();

        match state.pending.take() {
            Some(pending) if is_newer(&pending, stored.as_ref()) => {
                write_record(&self.ctx, &self.full_name, &pending)?;
                state.current = pending;
            }
            pending => {
                if pending.is_some() {
                    debug!(name = %self.full_name, "stale pending write discarded");
                }
                if let Some(stored) = stored {
                    state.current = stored;
                }
            }
        }
        Ok(())
    }
}

fn is_newer(
    record: &SharedVariableRecord,
    stored: Option<&SharedVariableRecord>,
) -> bool {
    stored.map_or(true, |s| record.timestamp > s.timestamp)
}

fn read_record(
    ctx: &EndpointContext,
    full_name: &str,
) -> GraphBusResult<Option<SharedVariableRecord>> {
    match ctx.backend.store().get(full_name)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| BackendError::codec(full_name, e).into()),
        None => Ok(None),
    }
}

fn write_record(
    ctx: &EndpointContext,
    full_name: &str,
    record: &SharedVariableRecord,
) -> GraphBusResult<()> {
    let value = serde_json::to_value(record).map_err(|e| BackendError::codec(full_name, e))?;
    ctx.backend.store().set(full_name, value)
}

impl Endpoint for SharedVariable {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::SharedVariable
    }

    fn descriptor(&self) -> EndpointDescriptor {
        EndpointDescriptor::SharedVariable {
            id: self.id.clone(),
            name: self.full_name.clone(),
            scope: self.scope,
            variable_type: self.variable_type,
            descriptor: self.descriptor.clone(),
        }
    }

    fn spin(&self) -> GraphBusResult<()> {
        self.registration.ensure_declared(&self.id)?;
        self.reconcile()
    }

    fn declare(&self) -> GraphBusResult<()> {
        self.registration.declare(&self.ctx, &self.descriptor())
    }

    /// Снимает описание и ребро; сама запись в хранилище остаётся.
    fn destroy(&self) -> GraphBusResult<()> {
        self.registration.destroy(&self.ctx, &self.descriptor())?;
        Ok(())
    }

    fn is_declared(&self) -> bool {
        self.registration.is_declared()
    }
}

impl fmt::Debug for SharedVariable {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SharedVariable")
            .field("id", &self.id)
            .field("full_name", &self.full_name)
            .field("scope", &self.scope)
            .field("variable_type", &self.variable_type)
            .finish()
    }
}
