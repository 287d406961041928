//! # Lifecycle Events
//!
//! Orchestration, stage, task and recovery lifecycle events delivered to
//! registered observers and broadcast subscribers in emission order.

pub mod publisher;
pub mod types;

pub use publisher::{
    EventPublisher, EventPublisherStats, EventRecorder, LifecycleObserver, PublishError,
    PublishedEvent,
};
pub use types::LifecycleEvent;
