//! Узел-часы: публикует симулированное время строкой
//! `YYYY-MM-DD HH:MM:SS.ffffff` в топик `/<ref>`.
//!
//! Симулированное время = начальная точка + прошедшее реальное время,
//! умноженное на `time_factor`.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use graphbus_error::{ensure, GraphBusResult, StatusCode};

use crate::{
    async_timer::AsyncTimer,
    backend::Backend,
    endpoint::Publisher,
    node::{Node, NodeOptions},
    topic::topic_path,
};

pub const CLOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const CLOCK_TIMER: &str = "clock_timer";

#[derive(Debug, Clone)]
pub struct ClockOptions {
    pub node_ref: String,
    pub namespace: String,
    /// Начальная точка симулированного времени.
    pub start: NaiveDateTime,
    /// Период публикации.
    pub clock_rate: Duration,
    /// Скорость симуляции (1.0 = реальное время).
    pub time_factor: f64,
}

impl Default for ClockOptions {
    fn default() -> Self {
        Self {
            node_ref: "Clock".to_string(),
            namespace: String::new(),
            start: NaiveDate::from_ymd_opt(1, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            clock_rate: Duration::from_millis(10),
            time_factor: 1.0,
        }
    }
}

/// Часы симуляции без привязки к узлу.
#[derive(Debug, Clone)]
pub struct SimClock {
    real_start: Instant,
    sim_start: NaiveDateTime,
    time_factor: f64,
}

impl SimClock {
    pub fn new(
        sim_start: NaiveDateTime,
        time_factor: f64,
    ) -> Self {
        Self {
            real_start: Instant::now(),
            sim_start,
            time_factor,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.at(self.real_start.elapsed())
    }

    /// Симулированное время после `elapsed` реального.
    pub fn at(
        &self,
        elapsed: Duration,
    ) -> NaiveDateTime {
        let micros = (elapsed.as_secs_f64() * self.time_factor * 1e6) as i64;
        self.sim_start
            .checked_add_signed(TimeDelta::microseconds(micros))
            .unwrap_or(NaiveDateTime::MAX)
    }

    pub fn format(time: &NaiveDateTime) -> String {
        time.format(CLOCK_TIME_FORMAT).to_string()
    }
}

/// Узел, публикующий симулированное время.
pub struct ClockNode {
    node: Arc<Node>,
    publisher: Arc<Publisher>,
    clock: Arc<SimClock>,
    clock_rate: Duration,
}

impl ClockNode {
    pub fn new(
        backend: Backend,
        options: ClockOptions,
    ) -> GraphBusResult<Self> {
        ensure!(
            options.time_factor.is_finite() && options.time_factor >= 0.0,
            StatusCode::InvalidArgs,
            "time_factor must be a finite non-negative number, got {}",
            options.time_factor
        );

        let node = Node::new(
            backend,
            NodeOptions::default()
                .node_ref(options.node_ref.clone())
                .namespace(options.namespace),
        )?;
        let topic = topic_path([options.node_ref.as_str()]);
        let publisher = node.create_publisher(&topic, "String", None, None)?;

        Ok(Self {
            node,
            publisher,
            clock: Arc::new(SimClock::new(options.start, options.time_factor)),
            clock_rate: options.clock_rate,
        })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn topic(&self) -> &str {
        self.publisher.topic()
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Публикует текущее симулированное время и возвращает его строку.
    pub fn tick(&self) -> GraphBusResult<String> {
        publish_now(&self.publisher, &self.clock)
    }

    /// Запускает публикацию с периодом `clock_rate` на таймере узла.
    pub fn run(&self) -> GraphBusResult<Arc<AsyncTimer>> {
        let publisher = self.publisher.clone();
        let clock = self.clock.clone();
        self.node
            .create_async_timer(Some(CLOCK_TIMER.to_string()), self.clock_rate, move || {
                publish_now(&publisher, &clock)?;
                Ok(())
            })
    }

    pub fn stop(&self) -> bool {
        self.node.destroy_async_timer(CLOCK_TIMER)
    }
}

fn publish_now(
    publisher: &Publisher,
    clock: &SimClock,
) -> GraphBusResult<String> {
    let stamp = SimClock::format(&clock.now());
    publisher.publish(stamp.as_str(), true)?;
    Ok(stamp)
}
