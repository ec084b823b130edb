//! Outbound framing of process output.
//!
//! The pty produces arbitrary byte chunks. Reads can split a multi-byte UTF-8
//! sequence across two chunks, so text framing keeps the incomplete tail of
//! one chunk and prepends it to the next. Invalid sequences are replaced with
//! U+FFFD. Binary framing passes chunks through untouched.
//!
//! Concatenating the frames produced for a stream of chunks always yields the
//! same text (or bytes) as decoding the whole stream at once.

use serde::{Deserialize, Serialize};

/// A frame sent from the daemon to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Terminal output as UTF-8 text.
    Text(String),
    /// Terminal output as raw bytes.
    Binary(Vec<u8>),
    /// Keepalive ping; the peer answers with a pong.
    Ping(Vec<u8>),
    /// Orderly close of the connection.
    Close,
}

impl OutboundFrame {
    /// Number of payload bytes carried by the frame.
    pub fn payload_len(&self) -> usize {
        match self {
            OutboundFrame::Text(s) => s.len(),
            OutboundFrame::Binary(b) | OutboundFrame::Ping(b) => b.len(),
            OutboundFrame::Close => 0,
        }
    }
}

/// How process output is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// UTF-8 text frames.
    ///
    /// Lossy: byte sequences that are not valid UTF-8 reach the browser as
    /// U+FFFD. Programs that emit other encodings or raw binary need
    /// [`OutputEncoding::Binary`].
    #[default]
    Text,
    /// Binary frames with the exact pty bytes.
    Binary,
}

/// Longest possible incomplete UTF-8 sequence held between chunks.
const MAX_PENDING: usize = 3;

/// Stateful encoder turning output chunks into frames.
#[derive(Debug, Default)]
pub struct OutputEncoder {
    encoding: OutputEncoding,
    pending: Vec<u8>,
}

impl OutputEncoder {
    /// Create an encoder for the given wire encoding.
    pub fn new(encoding: OutputEncoding) -> Self {
        Self {
            encoding,
            pending: Vec::with_capacity(MAX_PENDING),
        }
    }

    /// Returns the number of bytes held back waiting for the rest of a
    /// UTF-8 sequence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Encode one chunk of process output.
    ///
    /// Returns `None` when there is nothing to send yet, which happens for
    /// empty chunks and for text chunks consisting only of an incomplete
    /// sequence.
    pub fn encode(&mut self, chunk: &[u8]) -> Option<OutboundFrame> {
        match self.encoding {
            OutputEncoding::Binary => {
                (!chunk.is_empty()).then(|| OutboundFrame::Binary(chunk.to_vec()))
            }
            OutputEncoding::Text => {
                let text = self.decode_text(chunk);
                (!text.is_empty()).then_some(OutboundFrame::Text(text))
            }
        }
    }

    /// Flush any held-back bytes at end of stream.
    pub fn finish(&mut self) -> Option<OutboundFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        Some(OutboundFrame::Text(
            String::from_utf8_lossy(&pending).into_owned(),
        ))
    }

    fn decode_text(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = &input[..];

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk.
                            self.pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }

        out
    }
}
