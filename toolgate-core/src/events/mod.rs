//! Lifecycle events and their delivery
//!
//! - [`lifecycle`]: the event types emitted around invocations
//! - [`bus`]: the publishing boundary and in-process backends
//! - [`emitter`]: non-blocking, failure-isolated emission

pub mod bus;
pub mod emitter;
pub mod lifecycle;

pub use bus::{BusError, BusMessage, EventBus, LocalBus, TracingBus};
pub use emitter::{EventEmitter, EventTopics};
pub use lifecycle::{LifecycleEvent, LifecycleEventType};
