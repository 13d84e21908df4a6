/// Free-running periodic timers on their own thread.
pub mod async_timer;
/// Shared-state backend: document store, message bus, locks, topology graph.
pub mod backend;
/// Callback groups: MutuallyExclusive and Reentrant scheduling of endpoints.
pub mod callback_group;
/// Settings loading (defaults + `GRAPHBUS_*` environment).
pub mod config;
/// Discovery document and topology graph registration protocol.
pub mod discovery;
/// Endpoints: Publisher, Subscriber, SharedVariable, Timer.
pub mod endpoint;
/// Structured logging (console/file sinks, filters).
pub mod logging;
/// Message envelope and monotonic timestamps.
pub mod message;
/// Node: endpoint factories and the spin scheduler.
pub mod node;
/// Ready-made nodes.
pub mod nodes;
/// Canonical topic paths.
pub mod topic;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

pub use async_timer::AsyncTimer;
pub use backend::{
    Backend, Broker, BusReceiver, DocumentStore, GraphStore, InMemoryGraph, InMemoryLocks,
    InMemoryStore, LockGuard, LockManager, MessageBus,
};
pub use callback_group::{CallbackGroup, CallbackGroupPolicy};
pub use config::Settings;
pub use discovery::{DiscoveryDocument, DiscoveryGraph, EndpointDescriptor, EndpointKind};
pub use endpoint::{
    Endpoint, EndpointHandle, Publisher, Scope, SharedVariable, SharedVariableDecl,
    SharedVariableRecord, Subscriber, SubscriberCallback, Timer, VariableType,
};
pub use graphbus_error::{GraphBusResult, StackError, StatusCode};
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
pub use message::Envelope;
pub use node::{Node, NodeOptions, SpinCondition, SpinOptions};
pub use nodes::{ClockNode, ClockOptions};
pub use topic::{check_topic, topic_path};
