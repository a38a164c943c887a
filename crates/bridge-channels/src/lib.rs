pub mod channel;
pub mod error;
pub mod manager;
pub mod router;
pub mod types;

pub use channel::Channel;
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use router::{ChatKind, ChatProbe, ChatRouter, InboundContext, LifecycleRegistrar, Router, SendKwargs, TopicRouter};
pub use types::{ChannelStatus, InboundMessage, MessageFormat, OutboundMessage};
