use serde::{Deserialize, Serialize};

use crate::endpoint::{Scope, VariableType};

/// Вид endpoint'а.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Publisher,
    Subscriber,
    SharedVariable,
    Timer,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
            Self::SharedVariable => "shared_variable",
            Self::Timer => "timer",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Описание endpoint'а в документе discovery.
///
/// Сериализуется с тегом `type`, например
/// `{"type": "publisher", "id": "...", "topic": "/chatter", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointDescriptor {
    Publisher {
        id: String,
        topic: String,
        msg_type: String,
        #[serde(default)]
        qos: Option<String>,
    },
    Subscriber {
        id: String,
        topic: String,
        msg_type: String,
        #[serde(default)]
        qos: Option<String>,
    },
    SharedVariable {
        id: String,
        name: String,
        scope: Scope,
        variable_type: VariableType,
        #[serde(default)]
        descriptor: String,
    },
    Timer {
        id: String,
        name: String,
        period_secs: f64,
    },
}

impl EndpointDescriptor {
    pub fn id(&self) -> &str {
        match self {
            Self::Publisher { id, .. }
            | Self::Subscriber { id, .. }
            | Self::SharedVariable { id, .. }
            | Self::Timer { id, .. } => id,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Publisher { .. } => EndpointKind::Publisher,
            Self::Subscriber { .. } => EndpointKind::Subscriber,
            Self::SharedVariable { .. } => EndpointKind::SharedVariable,
            Self::Timer { .. } => EndpointKind::Timer,
        }
    }

    /// Топик (pub/sub) или имя (shared variable, timer).
    pub fn target(&self) -> &str {
        match self {
            Self::Publisher { topic, .. } | Self::Subscriber { topic, .. } => topic,
            Self::SharedVariable { name, .. } | Self::Timer { name, .. } => name,
        }
    }
}
