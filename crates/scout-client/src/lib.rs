//! Scout Client - daemon sync adapter
//!
//! Connects to a running daemon over its persistent WebSocket protocol,
//! issues commands, and reconstructs local state purely from snapshot
//! broadcasts. The adapter never derives state from command responses: a
//! response is only an ack, and the change it caused arrives through the
//! same `fmdm.update` push every other client receives.

pub mod adapter;

pub use adapter::{
    ClientError, ClientSyncAdapter, ConnectionStatus, ReconnectConfig, REQUEST_TIMEOUT,
};
