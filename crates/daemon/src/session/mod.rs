//! Terminal sessions.
//!
//! One session per WebSocket connection: a process on its own pty, the
//! bridge that joins it to the connection, and the keepalive that keeps the
//! connection from idling out.

pub mod bridge;
pub mod keepalive;
pub mod pty;

pub use bridge::{
    BridgeConfig, CloseReason, SessionBridge, SessionReport, SessionState, TransportEvent,
};
pub use keepalive::KeepaliveMonitor;
pub use pty::{
    OutputReceiver, PtyHandle, PtyProcess, SessionError, SessionId, SessionStatus, SpawnOptions,
};
