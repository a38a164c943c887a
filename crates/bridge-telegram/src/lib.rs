pub mod adapter;
pub mod allow;
pub mod error;
pub mod handler;
pub mod probe;
pub mod send;
pub mod sink;

pub use adapter::TelegramAdapter;
pub use error::TelegramError;
pub use handler::WindowOpener;
pub use probe::TelegramChatProbe;
pub use sink::TelegramSink;
