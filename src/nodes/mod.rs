//! Готовые узлы.

pub mod clock;

pub use clock::*;
