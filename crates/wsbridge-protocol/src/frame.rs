//! Frame codec (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! The decoder is the server side: every inbound frame must be masked. It is
//! resumable, so a frame split across any number of reads decodes the same as
//! one delivered whole. The encoder writes unmasked frames with the smallest
//! length encoding.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::close::CloseCode;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// Text data.
    Text = 0x1,
    /// Binary data.
    Binary = 0x2,
    /// Connection close.
    Close = 0x8,
    /// Ping.
    Ping = 0x9,
    /// Pong.
    Pong = 0xA,
}

impl Opcode {
    /// Close, Ping or Pong.
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Parse the low nibble of the first header byte.
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(FrameError::InvalidOpcode(value)),
        }
    }
}

/// A single decoded (unmasked) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Payload with the mask already removed.
    pub payload: Bytes,
}

impl Frame {
    /// Final frame with the given opcode and payload.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }
}

/// Errors raised while decoding frames or reassembling messages.
///
/// Every variant except [`FrameError::Io`] maps to the close code sent to the
/// peer before the connection is dropped.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// RSV1-3 set without a negotiated extension.
    #[error("reserved bits set without extension")]
    ReservedBitsSet,
    /// Opcode in a reserved range.
    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),
    /// Client frame without the mask bit.
    #[error("client frame must be masked")]
    UnmaskedFrame,
    /// Control frame with FIN clear.
    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,
    /// Control frame payload over 125 bytes.
    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),
    /// 64-bit length with the most significant bit set.
    #[error("payload length has its most significant bit set")]
    LengthOverflow,
    /// Single frame payload over the message limit.
    #[error("frame payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge {
        /// Announced payload size.
        size: u64,
        /// Configured limit.
        max: usize,
    },
    /// Reassembled message over the message limit.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size the message would reach.
        size: usize,
        /// Configured limit.
        max: usize,
    },
    /// Continuation frame with no message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,
    /// New data frame while a fragmented message is still open.
    #[error("data frame received while a fragmented message is open")]
    ExpectedContinuation,
    /// Completed text message is not UTF-8.
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,
    /// Close payload of one byte, or a non-UTF-8 reason.
    #[error("invalid close frame payload")]
    InvalidClosePayload,
    /// Close code that may not appear on the wire.
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),
}

impl FrameError {
    /// Close code to report to the peer, `None` for transport failures.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Io(_) => None,
            Self::InvalidUtf8 => Some(CloseCode::InvalidPayload),
            Self::PayloadTooLarge { .. } | Self::MessageTooLarge { .. } => {
                Some(CloseCode::MessageTooBig)
            }
            _ => Some(CloseCode::ProtocolError),
        }
    }
}

/// Apply (or remove) a masking key in place.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a single final unmasked frame.
///
/// Used where one encoded buffer is shared between many connections.
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Bytes {
    let mut dst = BytesMut::with_capacity(payload.len() + 10);
    put_header(&mut dst, true, opcode, payload.len());
    dst.put_slice(payload);
    dst.freeze()
}

fn put_header(dst: &mut BytesMut, fin: bool, opcode: Opcode, len: usize) {
    let fin_bit = if fin { 0x80 } else { 0x00 };
    dst.put_u8(fin_bit | opcode as u8);
    if len <= 125 {
        dst.put_u8(len as u8);
    } else if len <= usize::from(u16::MAX) {
        dst.put_u8(126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(127);
        dst.put_u64(len as u64);
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Header,
    ExtendedLength {
        fin: bool,
        opcode: Opcode,
        bytes_needed: usize,
    },
    MaskKey {
        fin: bool,
        opcode: Opcode,
        payload_len: usize,
    },
    Payload {
        fin: bool,
        opcode: Opcode,
        mask_key: [u8; 4],
        payload_len: usize,
    },
}

/// Server-side frame codec.
#[derive(Debug)]
pub struct FrameCodec {
    max_payload_size: usize,
    state: DecodeState,
}

impl FrameCodec {
    /// Codec rejecting frames whose payload exceeds `max_payload_size`.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size,
            state: DecodeState::Header,
        }
    }

    /// Whether a frame is partially decoded.
    pub fn is_mid_frame(&self) -> bool {
        !matches!(self.state, DecodeState::Header)
    }

    fn check_len(&self, len: u64) -> Result<usize, FrameError> {
        if len > self.max_payload_size as u64 {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.max_payload_size,
            });
        }
        Ok(len as usize)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let (first, second) = (src[0], src[1]);
                    let fin = first & 0x80 != 0;
                    if first & 0x70 != 0 {
                        return Err(FrameError::ReservedBitsSet);
                    }
                    let opcode = Opcode::from_u8(first & 0x0F)?;
                    if second & 0x80 == 0 {
                        return Err(FrameError::UnmaskedFrame);
                    }
                    let len7 = second & 0x7F;
                    if opcode.is_control() {
                        if !fin {
                            return Err(FrameError::FragmentedControlFrame);
                        }
                        if usize::from(len7) > MAX_CONTROL_PAYLOAD {
                            return Err(FrameError::ControlFrameTooLarge(usize::from(len7)));
                        }
                    }
                    src.advance(2);
                    self.state = match len7 {
                        126 => DecodeState::ExtendedLength {
                            fin,
                            opcode,
                            bytes_needed: 2,
                        },
                        127 => DecodeState::ExtendedLength {
                            fin,
                            opcode,
                            bytes_needed: 8,
                        },
                        n => DecodeState::MaskKey {
                            fin,
                            opcode,
                            payload_len: self.check_len(u64::from(n))?,
                        },
                    };
                }
                DecodeState::ExtendedLength {
                    fin,
                    opcode,
                    bytes_needed,
                } => {
                    if src.len() < bytes_needed {
                        return Ok(None);
                    }
                    let len = if bytes_needed == 2 {
                        u64::from(src.get_u16())
                    } else {
                        src.get_u64()
                    };
                    if len & (1 << 63) != 0 {
                        return Err(FrameError::LengthOverflow);
                    }
                    self.state = DecodeState::MaskKey {
                        fin,
                        opcode,
                        payload_len: self.check_len(len)?,
                    };
                }
                DecodeState::MaskKey {
                    fin,
                    opcode,
                    payload_len,
                } => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let mut mask_key = [0u8; 4];
                    src.copy_to_slice(&mut mask_key);
                    self.state = DecodeState::Payload {
                        fin,
                        opcode,
                        mask_key,
                        payload_len,
                    };
                }
                DecodeState::Payload {
                    fin,
                    opcode,
                    mask_key,
                    payload_len,
                } => {
                    if src.len() < payload_len {
                        src.reserve(payload_len - src.len());
                        return Ok(None);
                    }
                    let mut payload = src.split_to(payload_len);
                    apply_mask(&mut payload, mask_key);
                    self.state = DecodeState::Header;
                    return Ok(Some(Frame {
                        fin,
                        opcode,
                        payload: payload.freeze(),
                    }));
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.reserve(frame.payload.len() + 10);
        put_header(dst, frame.fin, frame.opcode, frame.payload.len());
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Client-side encoding for tests: masked frame with explicit FIN and key.
#[cfg(test)]
pub(crate) fn encode_masked(fin: bool, opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let mut dst = BytesMut::new();
    put_header(&mut dst, fin, opcode, payload.len());
    dst[1] |= 0x80;
    dst.put_slice(&key);
    let mut body = payload.to_vec();
    apply_mask(&mut body, key);
    dst.put_slice(&body);
    dst.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    const KEY: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

    fn decode_all(codec: &mut FrameCodec, bytes: &[u8]) -> Vec<Frame> {
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn rfc_sample_masked_hello() {
        let bytes = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let frames = decode_all(&mut FrameCodec::new(1024), &bytes);
        assert_eq!(frames, vec![Frame::new(Opcode::Text, "Hello")]);
    }

    #[test]
    fn round_trip_length_boundaries() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let wire = encode_masked(true, Opcode::Binary, &payload, KEY);
            let mut codec = FrameCodec::new(1 << 20);
            let frames = decode_all(&mut codec, &wire);
            assert_eq!(frames.len(), 1, "len {len}");
            assert_eq!(&frames[0].payload[..], &payload[..], "len {len}");
            assert!(!codec.is_mid_frame());
        }
    }

    #[test]
    fn encoder_uses_smallest_length_form() {
        assert_eq!(&encode_frame(Opcode::Text, &[0; 125])[..2], &[0x81, 125]);
        assert_eq!(&encode_frame(Opcode::Text, &[0; 126])[..4], &[0x81, 126, 0, 126]);
        assert_eq!(
            &encode_frame(Opcode::Binary, &[0; 65535])[..4],
            &[0x82, 126, 0xFF, 0xFF]
        );
        assert_eq!(
            &encode_frame(Opcode::Binary, &[0; 65536])[..10],
            &[0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0]
        );
    }

    #[test]
    fn encoder_trait_matches_encode_frame() {
        let mut dst = BytesMut::new();
        FrameCodec::new(16)
            .encode(Frame::new(Opcode::Pong, "abc"), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &encode_frame(Opcode::Pong, b"abc")[..]);
    }

    #[test]
    fn resumes_across_split_reads() {
        let wire = encode_masked(true, Opcode::Text, &[b'x'; 300], KEY);
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            buf.put_u8(*byte);
            let decoded = codec.decode(&mut buf).unwrap();
            if i + 1 < wire.len() {
                assert!(decoded.is_none());
            } else {
                assert_eq!(decoded.unwrap().payload.len(), 300);
            }
        }
    }

    #[test]
    fn trailing_bytes_stay_in_buffer() {
        let mut wire = encode_masked(true, Opcode::Text, b"one", KEY);
        let second = encode_masked(true, Opcode::Text, b"two", KEY);
        wire.extend_from_slice(&second[..3]);
        let mut buf = BytesMut::from(&wire[..]);
        let mut codec = FrameCodec::new(1024);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().payload, "one");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.is_mid_frame());
        buf.put_slice(&second[3..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().payload, "two");
    }

    #[test]
    fn unmasked_frame_is_rejected() {
        let wire = encode_frame(Opcode::Text, b"hi");
        let err = FrameCodec::new(1024)
            .decode(&mut BytesMut::from(&wire[..]))
            .unwrap_err();
        assert_matches!(err, FrameError::UnmaskedFrame);
        assert_eq!(err.close_code(), Some(CloseCode::ProtocolError));
    }

    #[test]
    fn reserved_bits_are_rejected() {
        let mut wire = encode_masked(true, Opcode::Text, b"hi", KEY);
        wire[0] |= 0x40;
        assert_matches!(
            FrameCodec::new(1024).decode(&mut BytesMut::from(&wire[..])),
            Err(FrameError::ReservedBitsSet)
        );
    }

    #[test]
    fn reserved_opcode_is_rejected() {
        let mut wire = encode_masked(true, Opcode::Text, b"hi", KEY);
        wire[0] = 0x83;
        assert_matches!(
            FrameCodec::new(1024).decode(&mut BytesMut::from(&wire[..])),
            Err(FrameError::InvalidOpcode(0x3))
        );
    }

    #[test]
    fn fragmented_control_frame_is_rejected() {
        let wire = encode_masked(false, Opcode::Ping, b"", KEY);
        assert_matches!(
            FrameCodec::new(1024).decode(&mut BytesMut::from(&wire[..])),
            Err(FrameError::FragmentedControlFrame)
        );
    }

    #[test]
    fn oversized_control_frame_is_rejected() {
        let wire = encode_masked(true, Opcode::Ping, &[0; 126], KEY);
        assert_matches!(
            FrameCodec::new(1024).decode(&mut BytesMut::from(&wire[..])),
            Err(FrameError::ControlFrameTooLarge(126))
        );
    }

    #[test]
    fn length_with_msb_set_is_rejected() {
        let mut wire = vec![0x82, 0xFF];
        wire.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let err = FrameCodec::new(usize::MAX)
            .decode(&mut BytesMut::from(&wire[..]))
            .unwrap_err();
        assert_matches!(err, FrameError::LengthOverflow);
        assert_eq!(err.close_code(), Some(CloseCode::ProtocolError));
    }

    #[test]
    fn oversized_payload_rejected_before_buffering() {
        // Header only: the payload never arrives, the length alone is enough.
        let mut wire = vec![0x82, 0xFE];
        wire.extend_from_slice(&2000u16.to_be_bytes());
        let err = FrameCodec::new(1000)
            .decode(&mut BytesMut::from(&wire[..]))
            .unwrap_err();
        assert_matches!(err, FrameError::PayloadTooLarge { size: 2000, max: 1000 });
        assert_eq!(err.close_code(), Some(CloseCode::MessageTooBig));
    }

    #[test]
    fn mask_is_an_involution() {
        let mut data = b"payload".to_vec();
        apply_mask(&mut data, KEY);
        assert_ne!(&data, b"payload");
        apply_mask(&mut data, KEY);
        assert_eq!(&data, b"payload");
    }

    proptest! {
        #[test]
        fn any_split_point_decodes_identically(
            payload in proptest::collection::vec(any::<u8>(), 0..400),
            key in any::<[u8; 4]>(),
            split in 0usize..420,
        ) {
            let wire = encode_masked(true, Opcode::Binary, &payload, key);
            let split = split.min(wire.len());
            let mut codec = FrameCodec::new(1024);
            let mut buf = BytesMut::from(&wire[..split]);
            let first = codec.decode(&mut buf).unwrap();
            let frame = match first {
                Some(frame) => frame,
                None => {
                    buf.put_slice(&wire[split..]);
                    codec.decode(&mut buf).unwrap().unwrap()
                }
            };
            prop_assert_eq!(&frame.payload[..], &payload[..]);
            prop_assert!(buf.is_empty());
        }
    }
}
