use std::{
    sync::{Arc, Weak},
    thread,
    time::Duration,
};

use graphbus_error::{GraphBusResult, NodeError, StackError};
use tracing::{info, warn};

use super::{Node, SpinCondition, SpinOptions};
use crate::{
    async_timer::{join_unless_current, StopSignal},
    endpoint::Endpoint,
    logging::log_failure,
};

impl Node {
    /// Запускает spin-цикл.
    ///
    /// Цикл раз в период вызывает [`Node::spin_once`] и завершается, когда
    /// `spin_state` становится `false`, когда нарушается `condition` или
    /// по [`Node::stop`]. С `threaded` цикл уходит в отдельный поток и
    /// вызов возвращается сразу, иначе блокирует до завершения.
    ///
    /// Если предыдущий цикл уже остановлен, но ещё не вышел, вызов ждёт
    /// его выхода: два цикла одного узла никогда не работают вместе.
    pub fn spin(
        self: &Arc<Self>,
        options: SpinOptions,
    ) -> GraphBusResult<()> {
        self.ensure_declared()?;
        let period = options.period.unwrap_or(self.options.spin_period);
        if period.is_zero() {
            return Err(NodeError::InvalidSpinPeriod {
                reason: "spin period must be positive".to_string(),
            }
            .into());
        }

        let signal = self.begin_session(period)?;

        info!(
            node = %self.address,
            period_ms = period.as_millis() as u64,
            threaded = options.threaded,
            conditional = options.condition.is_some(),
            "spin started"
        );

        if !options.threaded {
            let result = self.spin_loop(&signal, period, options.condition.as_ref());
            self.finish_spin();
            return result;
        }

        let weak = Arc::downgrade(self);
        let session = signal.clone();
        let spawned = thread::Builder::new()
            .name(format!("graphbus-spin-{}", self.node_ref))
            .spawn(move || threaded_spin_loop(weak, session, period, options.condition));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.finish_spin();
                return Err(e.into());
            }
        };

        // Предыдущий цикл уже вышел, его поток только завершается.
        let previous = self.spin_thread.lock().replace(handle);
        if let Some(previous) = previous {
            join_unless_current(previous, "spin");
        }
        Ok(())
    }

    /// Один проход: каждая группа отправляется в пул узла без ожидания.
    pub fn spin_once(&self) -> GraphBusResult<()> {
        self.ensure_declared()?;
        let pool = self.pool.read().clone().ok_or_else(|| NodeError::NodeDestroyed {
            node: self.address.clone(),
        })?;
        for group in self.callback_groups() {
            let worker_pool = pool.clone();
            pool.spawn(move || group.spin(&worker_pool));
        }
        Ok(())
    }

    /// Останавливает spin-цикл этого узла.
    pub fn stop(&self) -> GraphBusResult<()> {
        self.stop.lock().trigger();
        if self.spin_state.is_declared() {
            self.spin_state.set_value(false, true)?;
        }
        Ok(())
    }

    /// Ждёт завершения spin-цикла, запущенного с `threaded`.
    pub fn join(&self) -> GraphBusResult<()> {
        let handle = self.spin_thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                return Err(NodeError::SpinThreadPanicked {
                    node: self.address.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Значение `spin_state` после сверки с хранилищем.
    pub fn is_spinning(&self) -> GraphBusResult<bool> {
        Ok(self.spin_state.get_value(true)?.as_bool().unwrap_or(false))
    }

    /// Дожидается выхода предыдущего цикла и открывает новую сессию с
    /// собственным сигналом остановки.
    fn begin_session(
        &self,
        period: Duration,
    ) -> GraphBusResult<Arc<StopSignal>> {
        let mut running = self.loop_running.lock();
        while *running {
            if self.is_spinning()? {
                return Err(self.already_spinning());
            }
            self.loop_idle.wait_for(&mut running, period);
        }

        let _guard = self.backend.lock(&self.address)?;
        if self.is_spinning()? {
            return Err(self.already_spinning());
        }
        self.spin_state.set_value(true, true)?;

        let signal = Arc::new(StopSignal::default());
        *self.stop.lock() = signal.clone();
        *running = true;
        Ok(signal)
    }

    fn already_spinning(&self) -> StackError {
        NodeError::AlreadySpinning {
            node: self.address.clone(),
        }
        .into()
    }

    fn spin_loop(
        &self,
        signal: &StopSignal,
        period: Duration,
        condition: Option<&SpinCondition>,
    ) -> GraphBusResult<()> {
        while self.spin_step(signal, condition)? {
            if signal.wait(period) {
                break;
            }
        }
        Ok(())
    }

    /// Проверяет условия продолжения и делает один `spin_once`.
    fn spin_step(
        &self,
        signal: &StopSignal,
        condition: Option<&SpinCondition>,
    ) -> GraphBusResult<bool> {
        if signal.is_triggered() || !self.is_declared() || !self.is_spinning()? {
            return Ok(false);
        }
        if let Some(condition) = condition {
            if !condition.holds()? {
                return Ok(false);
            }
        }
        self.spin_once()?;
        Ok(true)
    }

    /// Сбрасывает `spin_state` и отмечает цикл завершённым, чтобы узел
    /// можно было запустить снова.
    fn finish_spin(&self) {
        if self.spin_state.is_declared() {
            if let Err(e) = self.spin_state.set_value(false, true) {
                warn!(node = %self.address, error = %e, "spin_state reset failed");
            }
        }
        *self.loop_running.lock() = false;
        self.loop_idle.notify_all();
        info!(node = %self.address, "spin stopped");
    }
}

/// Цикл фонового потока. Держит узел только на время одного шага, чтобы
/// `Drop` узла мог сработать во время вращения.
fn threaded_spin_loop(
    node: Weak<Node>,
    signal: Arc<StopSignal>,
    period: Duration,
    condition: Option<SpinCondition>,
) {
    loop {
        let Some(strong) = node.upgrade() else {
            return;
        };
        let keep_going = match strong.spin_step(&signal, condition.as_ref()) {
            Ok(keep_going) => keep_going,
            Err(e) => {
                log_failure!(e, node = %strong.address, "spin loop aborted");
                false
            }
        };
        if !keep_going {
            strong.finish_spin();
            return;
        }
        drop(strong);

        if signal.wait(period) {
            if let Some(strong) = node.upgrade() {
                strong.finish_spin();
            }
            return;
        }
    }
}
