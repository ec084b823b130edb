//! # WebTerm Daemon Library
//!
//! Runs an interactive program on a pseudo-terminal for every browser that
//! connects, and bridges the terminal to the browser over a WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        WebServer (axum)                      │
//! │   GET /  → redirect      GET /term → upgrade     * → files   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  per connection                                              │
//! │  ┌──────────────┐   ControlFrame   ┌──────────────────────┐  │
//! │  │   WebSocket  │ ───────────────▶ │      PtyProcess      │  │
//! │  │              │ ◀─────────────── │  (write / resize)    │  │
//! │  └──────────────┘   OutputEncoder  └──────────────────────┘  │
//! │          ▲                                                   │
//! │          └──── KeepaliveMonitor (ping every 30s)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, WebServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!
//!     let shutdown = CancellationToken::new();
//!     WebServer::new(config, shutdown).run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY processes, session bridging and keepalive
//! - [`server`]: HTTP routes and WebSocket acceptor

pub mod config;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;
pub use server::WebServer;
pub use session::{
    BridgeConfig, CloseReason, PtyHandle, PtyProcess, SessionBridge, SessionError, SessionId,
    SessionReport, SessionStatus, SpawnOptions,
};
