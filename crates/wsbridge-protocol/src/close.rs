//! Close codes and close frame payloads (RFC 6455 Section 7).
//!
//! A close payload is empty, or a big-endian `u16` status code followed by an
//! optional UTF-8 reason. A one-byte payload, a code that may not appear on
//! the wire, or a non-UTF-8 reason is a protocol error.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::FrameError;

/// Close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal,
    /// 1001: endpoint going away (server stop).
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1003: unsupported data.
    Unsupported,
    /// 1007: payload inconsistent with the message type (invalid UTF-8).
    InvalidPayload,
    /// 1008: policy violation.
    PolicyViolation,
    /// 1009: message too big.
    MessageTooBig,
    /// 1010: mandatory extension missing.
    MandatoryExtension,
    /// 1011: internal error.
    InternalError,
    /// 3000-4999: registered or private-use code.
    Other(u16),
}

impl CloseCode {
    /// Parse a code received on the wire.
    ///
    /// Returns `None` for codes an endpoint must never send (1004-1006,
    /// 1012-2999, anything outside 1000-4999).
    pub fn from_wire(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::ProtocolError),
            1003 => Some(Self::Unsupported),
            1007 => Some(Self::InvalidPayload),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooBig),
            1010 => Some(Self::MandatoryExtension),
            1011 => Some(Self::InternalError),
            3000..=4999 => Some(Self::Other(code)),
            _ => None,
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// Parsed close frame payload with a status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code.
    pub code: CloseCode,
    /// Reason text, possibly empty.
    pub reason: String,
}

impl CloseFrame {
    /// Close frame with a code and no reason.
    pub fn new(code: CloseCode) -> Self {
        Self {
            code,
            reason: String::new(),
        }
    }

    /// Close frame with a reason.
    pub fn with_reason(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse a close payload. An empty payload yields `None`.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>, FrameError> {
        match payload {
            [] => Ok(None),
            [_] => Err(FrameError::InvalidClosePayload),
            [hi, lo, rest @ ..] => {
                let raw = u16::from_be_bytes([*hi, *lo]);
                let code = CloseCode::from_wire(raw).ok_or(FrameError::InvalidCloseCode(raw))?;
                let reason = std::str::from_utf8(rest)
                    .map_err(|_| FrameError::InvalidClosePayload)?
                    .to_string();
                Ok(Some(Self { code, reason }))
            }
        }
    }

    /// Encode as a close frame payload.
    ///
    /// The reason is truncated on a char boundary so the payload stays within
    /// the 125-byte control frame limit.
    pub fn encode(&self) -> Bytes {
        let mut end = self.reason.len().min(123);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = BytesMut::with_capacity(2 + end);
        buf.put_u16(self.code.into());
        buf.put_slice(&self.reason.as_bytes()[..end]);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_payload_has_no_code() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);
    }

    #[test]
    fn one_byte_payload_is_invalid() {
        assert_matches!(
            CloseFrame::parse(&[0x03]),
            Err(FrameError::InvalidClosePayload)
        );
    }

    #[test]
    fn parses_code_and_reason() {
        let frame = CloseFrame::parse(&[0x03, 0xE8, b'b', b'y', b'e']).unwrap().unwrap();
        assert_eq!(frame.code, CloseCode::Normal);
        assert_eq!(frame.reason, "bye");
    }

    #[test]
    fn reserved_codes_are_rejected() {
        for raw in [0u16, 999, 1004, 1005, 1006, 1015, 2000, 5000] {
            let bytes = raw.to_be_bytes();
            assert_matches!(
                CloseFrame::parse(&bytes),
                Err(FrameError::InvalidCloseCode(c)) if c == raw
            );
        }
    }

    #[test]
    fn private_codes_are_accepted() {
        let frame = CloseFrame::parse(&4001u16.to_be_bytes()).unwrap().unwrap();
        assert_eq!(frame.code, CloseCode::Other(4001));
    }

    #[test]
    fn invalid_utf8_reason_is_rejected() {
        assert_matches!(
            CloseFrame::parse(&[0x03, 0xE8, 0xFF, 0xFE]),
            Err(FrameError::InvalidClosePayload)
        );
    }

    #[test]
    fn encode_writes_code_then_reason() {
        let bytes = CloseFrame::with_reason(CloseCode::GoingAway, "stop").encode();
        assert_eq!(&bytes[..], &[0x03, 0xE9, b's', b't', b'o', b'p']);
    }

    #[test]
    fn encode_truncates_long_reason_on_char_boundary() {
        let reason = "é".repeat(100);
        let bytes = CloseFrame::with_reason(CloseCode::Normal, reason).encode();
        assert!(bytes.len() <= 125);
        let parsed = CloseFrame::parse(&bytes).unwrap().unwrap();
        assert!(parsed.reason.chars().all(|c| c == 'é'));
    }

    #[test]
    fn display_is_numeric() {
        assert_eq!(CloseCode::MessageTooBig.to_string(), "1009");
    }
}
