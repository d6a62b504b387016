pub mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod logbuf;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::BridgeConfig;
pub use session::{Session, SessionEvent};
