//! Scout Core - Shared types, wire protocol, and configuration
//!
//! This crate contains the foundational types used across the Scout daemon
//! and its clients. It has no dependencies on networking, storage, or
//! filesystem-walking code.

pub mod config;
pub mod error;
pub mod messages;
pub mod paths;
pub mod types;

pub use config::{DaemonConfig, FolderRegistry, IndexConfig, ListenConfig, WatchConfig};
pub use error::*;
pub use messages::*;
pub use types::*;

/// Default WebSocket port the daemon listens on
pub const DEFAULT_PORT: u16 = 9763;

/// Maximum path length in bytes accepted from clients
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum inbound message size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
