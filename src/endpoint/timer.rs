use std::time::Duration;

use graphbus_error::GraphBusResult;

use super::{new_endpoint_id, run_isolated, Endpoint, EndpointContext, Registration};
use crate::discovery::{EndpointDescriptor, EndpointKind};

type TimerFn = dyn Fn() -> anyhow::Result<()> + Send + Sync;

/// Timer: вызывает callback один раз за каждый `spin`.
///
/// Сам время не отсчитывает, период нужен только для discovery.
pub struct Timer {
    id: String,
    name: String,
    period: Duration,
    ctx: EndpointContext,
    callback: Box<TimerFn>,
    registration: Registration,
}

impl Timer {
    pub fn new<F>(
        ctx: EndpointContext,
        name: impl Into<String>,
        period: Duration,
        callback: F,
    ) -> GraphBusResult<Self>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let timer = Self {
            id: new_endpoint_id(),
            name: name.into(),
            period,
            ctx,
            callback: Box::new(callback),
            registration: Registration::default(),
        };
        timer.declare()?;
        Ok(timer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Endpoint for Timer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::Timer
    }

    fn descriptor(&self) -> EndpointDescriptor {
        EndpointDescriptor::Timer {
            id: self.id.clone(),
            name: self.name.clone(),
            period_secs: self.period.as_secs_f64(),
        }
    }

    fn spin(&self) -> GraphBusResult<()> {
        self.registration.ensure_declared(&self.id)?;
        run_isolated(&self.id, "timer", || (self.callback)());
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

impl std::fmt::Debug for Timer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("period", &self.period)
            .finish()
    }
}
