// Real-time room synchronization: history snapshot plus live channel,
// merged into one duplicate-free timeline per mounted view.

pub mod config;
pub mod connection;
pub mod history;
pub mod merge;
pub mod session;

pub use config::SyncConfig;
pub use session::{RoomSession, ViewState};
