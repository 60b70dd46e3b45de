pub mod config;
pub mod monitor;
pub mod poll;
pub mod push;
pub mod session;

pub use config::{ClientConfig, ConfigError, TransportKind, DEFAULT_POLL_INTERVAL};
pub use monitor::{LiveState, Monitor, MonitorStats};
pub use poll::{Fetch, FetchError, HttpFetcher, PollTransport, MIN_POLL_INTERVAL};
pub use push::PushTransport;
pub use session::{Session, SessionEvent, ShutdownSignal, Transport};
