pub mod config;
pub mod session;

pub use config::ClientConfig;
pub use session::{SessionGuard, SessionStats, SessionTracker};
