//! Delivery Pipeline (spec.md §4.H) — one ordered FIFO per destination,
//! turning parsed transcript content and status updates into platform
//! messages: merging consecutive content runs, converting status messages
//! into content in place, retrying transient errors, and respecting flood
//! control.

pub mod error;
pub mod manager;
pub mod marker;
pub mod queue;
pub mod sink;
pub mod types;

pub use error::{PlatformError, Result};
pub use manager::DeliveryPipeline;
pub use marker::{rewrite_markers, LinkResolver};
pub use queue::{DestinationWorker, PaneStatusSource};
pub use sink::DeliverySink;
pub use types::{ContentKind, ContentTask, DeliveryTask, MessageId, StatusMessageInfo, StatusUpdateTask};
