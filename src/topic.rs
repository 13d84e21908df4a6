//! Канонические пути топиков и адресов узлов.
//!
//! Путь собирается из сегментов, разделённых `/`: пустые куски
//! отбрасываются, поэтому в результате нет двойных и завершающих
//! разделителей (`["ns", "node1", "leaf"]` → `/ns/node1/leaf`).

use graphbus_error::{EndpointError, GraphBusResult};

/// Разделитель сегментов пути.
pub const SEPARATOR: char = '/';

/// Собирает канонический путь из сегментов. Пустой ввод даёт `/`.
pub fn topic_path<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut path = String::new();
    for segment in segments {
        for piece in segment.as_ref().split(SEPARATOR).filter(|p| !p.is_empty()) {
            path.push(SEPARATOR);
            path.push_str(piece);
        }
    }
    if path.is_empty() {
        path.push(SEPARATOR);
    }
    path
}

/// Проверяет топик endpoint'а и возвращает его каноническую форму.
///
/// Топик обязан начинаться с `/` и содержать хотя бы один сегмент.
pub fn check_topic(topic: &str) -> GraphBusResult<String> {
    if !topic.starts_with(SEPARATOR) {
        return Err(EndpointError::MalformedTopic {
            topic: topic.to_string(),
            reason: format!("must start with '{SEPARATOR}'"),
        }
        .into());
    }

    let canonical = topic_path([topic]);
    if canonical.len() == 1 {
        return Err(EndpointError::MalformedTopic {
            topic: topic.to_string(),
            reason: "has no segments".to_string(),
        }
        .into());
    }
    Ok(canonical)
}

/// Генерирует случайный ref узла из 8 буквенно-цифровых символов.
pub fn random_ref() -> String {
    (0..8).map(|_| fastrand::alphanumeric()).collect()
}
