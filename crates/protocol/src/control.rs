//! Inbound control frame decoding.
//!
//! Every message the browser sends is either a structured control command or
//! raw terminal input. Control commands are JSON objects with a `type`
//! discriminator; the only command currently defined is resize:
//!
//! ```json
//! {"type": "resize", "cols": 120, "rows": 40}
//! ```
//!
//! Anything that is not a fully valid control command is terminal input and
//! is forwarded verbatim, including payloads that look like JSON but fail
//! validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Discriminator value of the resize command.
pub const RESIZE_TYPE: &str = "resize";

/// Largest accepted terminal dimension (the pty winsize fields are 16-bit).
pub const MAX_DIMENSION: u64 = u16::MAX as u64;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Resize the terminal to the given dimensions. Both are non-zero.
    Resize {
        /// Terminal width in columns.
        cols: u16,
        /// Terminal height in rows.
        rows: u16,
    },
    /// Raw bytes for the child's input stream.
    RawInput(Vec<u8>),
}

/// Wire representation of a resize command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    /// Always [`RESIZE_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Terminal width in columns.
    pub cols: u16,
    /// Terminal height in rows.
    pub rows: u16,
}

impl ResizeRequest {
    /// Create a resize request.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            kind: RESIZE_TYPE.to_string(),
            cols,
            rows,
        }
    }

    /// Serialize to the JSON text sent over the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ControlFrame {
    /// Classify one inbound message payload.
    ///
    /// Returns [`ControlFrame::Resize`] only for a JSON object whose `type` is
    /// `"resize"` and whose `cols` and `rows` are both integers in
    /// `1..=65535`. Integers may be JSON numbers or decimal strings. Every
    /// other payload becomes [`ControlFrame::RawInput`] carrying the original
    /// bytes unchanged.
    pub fn decode(payload: &[u8]) -> Self {
        match Self::parse_resize(payload) {
            Some((cols, rows)) => ControlFrame::Resize { cols, rows },
            None => ControlFrame::RawInput(payload.to_vec()),
        }
    }

    fn parse_resize(payload: &[u8]) -> Option<(u16, u16)> {
        // Cheap reject before handing keystrokes to the JSON parser.
        let text = std::str::from_utf8(payload).ok()?;
        if !text.trim_start().starts_with('{') {
            return None;
        }

        let value: Value = serde_json::from_str(text).ok()?;
        let object = value.as_object()?;

        if object.get("type")?.as_str()? != RESIZE_TYPE {
            return None;
        }

        let cols = parse_dimension(object.get("cols")?)?;
        let rows = parse_dimension(object.get("rows")?)?;
        Some((cols, rows))
    }
}

/// Parse one dimension field, accepting a JSON integer or a decimal string.
fn parse_dimension(value: &Value) -> Option<u16> {
    let n = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            s.parse::<u64>().ok()?
        }
        _ => return None,
    };

    if n == 0 || n > MAX_DIMENSION {
        return None;
    }
    u16::try_from(n).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(payload: &[u8]) -> ControlFrame {
        ControlFrame::RawInput(payload.to_vec())
    }

    #[test]
    fn test_decode_resize() {
        let frame = ControlFrame::decode(br#"{"type":"resize","cols":120,"rows":40}"#);
        assert_eq!(frame, ControlFrame::Resize { cols: 120, rows: 40 });
    }

    #[test]
    fn test_decode_resize_with_whitespace_and_extra_fields() {
        let payload = br#"  { "rows": 24, "type": "resize", "cols": 80, "px": 3 }"#;
        assert_eq!(
            ControlFrame::decode(payload),
            ControlFrame::Resize { cols: 80, rows: 24 }
        );
    }

    #[test]
    fn test_decode_resize_with_string_dimensions() {
        let payload = br#"{"type":"resize","cols":"100","rows":" 30 "}"#;
        assert_eq!(
            ControlFrame::decode(payload),
            ControlFrame::Resize { cols: 100, rows: 30 }
        );
    }

    #[test]
    fn test_decode_plain_text_is_raw() {
        assert_eq!(ControlFrame::decode(b"ls\n"), raw(b"ls\n"));
    }

    #[test]
    fn test_decode_control_sequences_are_raw() {
        assert_eq!(ControlFrame::decode(b"\x03"), raw(b"\x03"));
        assert_eq!(ControlFrame::decode(b"\x1b[A"), raw(b"\x1b[A"));
    }

    #[test]
    fn test_decode_empty_payload_is_raw() {
        assert_eq!(ControlFrame::decode(b""), raw(b""));
    }

    #[test]
    fn test_decode_invalid_utf8_is_raw() {
        let payload = [0xff, 0xfe, b'{'];
        assert_eq!(ControlFrame::decode(&payload), raw(&payload));
    }

    #[test]
    fn test_decode_malformed_json_is_raw() {
        let payload = br#"{"type":"resize","cols":120,"rows":"#;
        assert_eq!(ControlFrame::decode(payload), raw(payload));
    }

    #[test]
    fn test_decode_other_type_is_raw() {
        let payload = br#"{"type":"input","data":"ls"}"#;
        assert_eq!(ControlFrame::decode(payload), raw(payload));
    }

    #[test]
    fn test_decode_missing_type_is_raw() {
        let payload = br#"{"cols":120,"rows":40}"#;
        assert_eq!(ControlFrame::decode(payload), raw(payload));
    }

    #[test]
    fn test_decode_non_numeric_cols_is_raw() {
        // Looks structured but fails validation: forwarded whole, not dropped.
        let payload = br#"{"type":"resize","cols":"wide","rows":40}"#;
        assert_eq!(ControlFrame::decode(payload), raw(payload));
    }

    #[test]
    fn test_decode_missing_rows_is_raw() {
        let payload = br#"{"type":"resize","cols":120}"#;
        assert_eq!(ControlFrame::decode(payload), raw(payload));
    }

    #[test]
    fn test_decode_zero_or_negative_dimensions_are_raw() {
        for payload in [
            &br#"{"type":"resize","cols":0,"rows":40}"#[..],
            &br#"{"type":"resize","cols":120,"rows":0}"#[..],
            &br#"{"type":"resize","cols":-1,"rows":40}"#[..],
            &br#"{"type":"resize","cols":"-5","rows":40}"#[..],
        ] {
            assert_eq!(ControlFrame::decode(payload), raw(payload));
        }
    }

    #[test]
    fn test_decode_fractional_dimensions_are_raw() {
        let payload = br#"{"type":"resize","cols":120.5,"rows":40}"#;
        assert_eq!(ControlFrame::decode(payload), raw(payload));
    }

    #[test]
    fn test_decode_oversized_dimensions_are_raw() {
        let payload = br#"{"type":"resize","cols":70000,"rows":40}"#;
        assert_eq!(ControlFrame::decode(payload), raw(payload));

        let payload = br#"{"type":"resize","cols":65535,"rows":1}"#;
        assert_eq!(
            ControlFrame::decode(payload),
            ControlFrame::Resize {
                cols: 65535,
                rows: 1
            }
        );
    }

    #[test]
    fn test_decode_json_non_object_is_raw() {
        for payload in [&b"[1,2,3]"[..], &b"42"[..], &b"\"resize\""[..], &b"null"[..]] {
            assert_eq!(ControlFrame::decode(payload), raw(payload));
        }
    }

    #[test]
    fn test_resize_request_json_decodes_as_resize() {
        let json = ResizeRequest::new(132, 43).to_json().unwrap();
        assert_eq!(json, r#"{"type":"resize","cols":132,"rows":43}"#);
        assert_eq!(
            ControlFrame::decode(json.as_bytes()),
            ControlFrame::Resize { cols: 132, rows: 43 }
        );
    }
}
