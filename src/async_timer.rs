//! Периодический таймер на собственном потоке.
//!
//! В отличие от [`Timer`](crate::endpoint::Timer), который срабатывает
//! только при `spin`, `AsyncTimer` сам отсчитывает период и вызывает
//! callback до `cancel()`.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use graphbus_error::{GraphBusResult, NodeError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::{endpoint::run_isolated, topic::random_ref};

/// Сигнал остановки фонового цикла: флаг под мьютексом и `Condvar`.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    /// Ждёт не дольше `period`. Возвращает `true`, если пришёл стоп.
    pub(crate) fn wait(
        &self,
        period: Duration,
    ) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cvar.wait_for(&mut stopped, period);
        }
        *stopped
    }

    pub(crate) fn trigger(&self) {
        *self.stopped.lock() = true;
        self.cvar.notify_all();
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.stopped.lock()
    }
}

/// Ожидает завершения потока, если это не текущий поток.
pub(crate) fn join_unless_current(
    handle: JoinHandle<()>,
    what: &str,
) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        error!(what, "background thread panicked");
    }
}

/// Свободно бегущий периодический таймер.
pub struct AsyncTimer {
    name: String,
    period: Duration,
    stop: Arc<StopSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncTimer {
    /// Запускает поток таймера. Первый вызов callback'а через `period`.
    ///
    /// `name = None` генерирует случайное имя.
    pub fn start<F>(
        name: Option<String>,
        period: Duration,
        callback: F,
    ) -> GraphBusResult<Self>
    where
        F: Fn() -> anyhow::Result<()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(NodeError::InvalidSpinPeriod {
                reason: "timer period must be positive".to_string(),
            }
            .into());
        }

        let name = name.unwrap_or_else(random_ref);
        let stop = Arc::new(StopSignal::default());
        let signal = stop.clone();
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(format!("graphbus-timer-{name}"))
            .spawn(move || {
                while !signal.wait(period) {
                    run_isolated(&thread_name, "async timer", &callback);
                }
                debug!(timer = %thread_name, "async timer stopped");
            })?;

        Ok(Self {
            name,
            period,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.is_triggered()
    }

    /// Останавливает таймер и дожидается потока. Повторный вызов ничего не
    /// делает.
    pub fn cancel(&self) {
        self.stop.trigger();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            join_unless_current(handle, "async timer");
        }
    }
}

impl Drop for AsyncTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for AsyncTimer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("AsyncTimer")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
