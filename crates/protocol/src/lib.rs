//! # WebTerm Protocol Library
//!
//! This crate defines the messages exchanged between the browser terminal
//! and the WebTerm daemon over a single WebSocket connection.
//!
//! ## Overview
//!
//! One duplex stream carries two logical channels:
//!
//! - **Terminal input**: raw keystrokes and pasted text, forwarded to the
//!   child process byte-for-byte
//! - **Terminal control**: structured JSON commands (currently only resize)
//!
//! In the other direction the daemon sends process output, keepalive pings
//! and a final close frame.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Browser terminal (xterm.js et al.)    │
//! ├─────────────────────────────────────────┤
//! │  ControlFrame::decode │ OutputEncoder   │  inbound │ outbound
//! ├─────────────────────────────────────────┤
//! │        WebSocket (text / binary)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ControlFrame, OutboundFrame, OutputEncoder, OutputEncoding};
//!
//! // Inbound: classify a client message
//! let frame = ControlFrame::decode(br#"{"type":"resize","cols":120,"rows":40}"#);
//! assert_eq!(frame, ControlFrame::Resize { cols: 120, rows: 40 });
//!
//! let frame = ControlFrame::decode(b"ls\n");
//! assert_eq!(frame, ControlFrame::RawInput(b"ls\n".to_vec()));
//!
//! // Outbound: frame a chunk of process output
//! let mut encoder = OutputEncoder::new(OutputEncoding::Text);
//! let out = encoder.encode(b"hello\r\n");
//! assert_eq!(out, Some(OutboundFrame::Text("hello\r\n".to_string())));
//! ```
//!
//! ## Modules
//!
//! - [`control`]: Inbound control frame decoding
//! - [`framing`]: Outbound frame types and the output encoder
//! - [`error`]: Error types

pub mod control;
pub mod error;
pub mod framing;

pub use control::{ControlFrame, ResizeRequest, MAX_DIMENSION, RESIZE_TYPE};
pub use error::{ProtocolError, Result};
pub use framing::{OutboundFrame, OutputEncoder, OutputEncoding};
