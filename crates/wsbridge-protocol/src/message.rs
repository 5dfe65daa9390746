//! Message reassembly on top of [`FrameCodec`].
//!
//! Text and binary messages may arrive split over a first frame with FIN
//! clear followed by continuation frames. Control frames may interleave with
//! the fragments and are surfaced immediately without touching the partial
//! message.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::close::CloseFrame;
use crate::frame::{Frame, FrameCodec, FrameError, Opcode};

/// A complete message or control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Reassembled UTF-8 text.
    Text(String),
    /// Reassembled binary data.
    Binary(Bytes),
    /// Ping with its application data.
    Ping(Bytes),
    /// Pong with its application data.
    Pong(Bytes),
    /// Close, with the parsed code and reason if the payload had one.
    Close(Option<CloseFrame>),
}

#[derive(Debug)]
struct Fragment {
    opcode: Opcode,
    buf: BytesMut,
}

/// Decoder yielding [`Message`]s.
#[derive(Debug)]
pub struct MessageDecoder {
    frames: FrameCodec,
    max_message_size: usize,
    fragment: Option<Fragment>,
}

impl MessageDecoder {
    /// Decoder limiting both single frames and assembled messages to
    /// `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            frames: FrameCodec::new(max_message_size),
            max_message_size,
            fragment: None,
        }
    }

    /// Whether a fragmented message is waiting for continuation frames.
    pub fn has_partial_message(&self) -> bool {
        self.fragment.is_some()
    }

    fn accept(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        match frame.opcode {
            Opcode::Ping => Ok(Some(Message::Ping(frame.payload))),
            Opcode::Pong => Ok(Some(Message::Pong(frame.payload))),
            Opcode::Close => Ok(Some(Message::Close(CloseFrame::parse(&frame.payload)?))),
            Opcode::Text | Opcode::Binary => {
                if self.fragment.is_some() {
                    return Err(FrameError::ExpectedContinuation);
                }
                if frame.fin {
                    return complete(frame.opcode, frame.payload).map(Some);
                }
                trace!(opcode = ?frame.opcode, len = frame.payload.len(), "fragmented message started");
                self.fragment = Some(Fragment {
                    opcode: frame.opcode,
                    buf: BytesMut::from(&frame.payload[..]),
                });
                Ok(None)
            }
            Opcode::Continuation => {
                let Some(fragment) = self.fragment.as_mut() else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                let size = fragment.buf.len() + frame.payload.len();
                if size > self.max_message_size {
                    self.fragment = None;
                    return Err(FrameError::MessageTooLarge {
                        size,
                        max: self.max_message_size,
                    });
                }
                fragment.buf.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                match self.fragment.take() {
                    Some(Fragment { opcode, buf }) => complete(opcode, buf.freeze()).map(Some),
                    None => Ok(None),
                }
            }
        }
    }
}

fn complete(opcode: Opcode, payload: Bytes) -> Result<Message, FrameError> {
    if opcode == Opcode::Text {
        String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| FrameError::InvalidUtf8)
    } else {
        Ok(Message::Binary(payload))
    }
}

impl Decoder for MessageDecoder {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        while let Some(frame) = self.frames.decode(src)? {
            if let Some(message) = self.accept(frame)? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close::CloseCode;
    use crate::frame::encode_masked;
    use assert_matches::assert_matches;

    const KEY: [u8; 4] = [1, 2, 3, 4];

    fn wire(frames: &[(bool, Opcode, &[u8])]) -> BytesMut {
        let mut buf = BytesMut::new();
        for (fin, opcode, payload) in frames {
            buf.extend_from_slice(&encode_masked(*fin, *opcode, payload, KEY));
        }
        buf
    }

    fn drain(decoder: &mut MessageDecoder, buf: &mut BytesMut) -> Result<Vec<Message>, FrameError> {
        let mut out = Vec::new();
        while let Some(message) = decoder.decode(buf)? {
            out.push(message);
        }
        Ok(out)
    }

    #[test]
    fn single_frame_text() {
        let mut buf = wire(&[(true, Opcode::Text, b"hello")]);
        let messages = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap();
        assert_eq!(messages, vec![Message::Text("hello".into())]);
    }

    #[test]
    fn three_fragments_reassemble() {
        let mut buf = wire(&[
            (false, Opcode::Text, b"Hel"),
            (false, Opcode::Continuation, b"lo, "),
            (true, Opcode::Continuation, b"world"),
        ]);
        let mut decoder = MessageDecoder::new(1024);
        let messages = drain(&mut decoder, &mut buf).unwrap();
        assert_eq!(messages, vec![Message::Text("Hello, world".into())]);
        assert!(!decoder.has_partial_message());
    }

    #[test]
    fn ping_between_fragments_surfaces_first() {
        let mut buf = wire(&[
            (false, Opcode::Binary, b"ab"),
            (true, Opcode::Ping, b"p"),
            (true, Opcode::Continuation, b"cd"),
        ]);
        let messages = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap();
        assert_eq!(
            messages,
            vec![
                Message::Ping(Bytes::from_static(b"p")),
                Message::Binary(Bytes::from_static(b"abcd")),
            ]
        );
    }

    #[test]
    fn utf8_split_across_fragments_is_valid() {
        let euro = "€".as_bytes();
        let mut buf = wire(&[
            (false, Opcode::Text, &euro[..1]),
            (true, Opcode::Continuation, &euro[1..]),
        ]);
        let messages = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap();
        assert_eq!(messages, vec![Message::Text("€".into())]);
    }

    #[test]
    fn continuation_without_start_is_protocol_error() {
        let mut buf = wire(&[(true, Opcode::Continuation, b"x")]);
        let err = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap_err();
        assert_matches!(err, FrameError::UnexpectedContinuation);
        assert_eq!(err.close_code(), Some(CloseCode::ProtocolError));
    }

    #[test]
    fn new_data_frame_during_fragment_is_protocol_error() {
        let mut buf = wire(&[(false, Opcode::Text, b"a"), (true, Opcode::Text, b"b")]);
        assert_matches!(
            drain(&mut MessageDecoder::new(1024), &mut buf),
            Err(FrameError::ExpectedContinuation)
        );
    }

    #[test]
    fn assembled_size_over_limit_discards_accumulator() {
        let mut buf = wire(&[
            (false, Opcode::Binary, &[0; 6]),
            (true, Opcode::Continuation, &[0; 6]),
        ]);
        let mut decoder = MessageDecoder::new(10);
        let err = drain(&mut decoder, &mut buf).unwrap_err();
        assert_matches!(err, FrameError::MessageTooLarge { size: 12, max: 10 });
        assert_eq!(err.close_code(), Some(CloseCode::MessageTooBig));
        assert!(!decoder.has_partial_message());
    }

    #[test]
    fn invalid_utf8_text_maps_to_1007() {
        let mut buf = wire(&[(true, Opcode::Text, &[0xC3, 0x28])]);
        let err = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap_err();
        assert_matches!(err, FrameError::InvalidUtf8);
        assert_eq!(err.close_code(), Some(CloseCode::InvalidPayload));
    }

    #[test]
    fn invalid_utf8_binary_is_fine() {
        let mut buf = wire(&[(true, Opcode::Binary, &[0xC3, 0x28])]);
        let messages = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap();
        assert_eq!(messages, vec![Message::Binary(Bytes::from_static(&[0xC3, 0x28]))]);
    }

    #[test]
    fn close_frames_parse_payload() {
        let mut buf = wire(&[(true, Opcode::Close, &[0x03, 0xE8])]);
        let messages = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap();
        assert_eq!(
            messages,
            vec![Message::Close(Some(CloseFrame::new(CloseCode::Normal)))]
        );

        let mut buf = wire(&[(true, Opcode::Close, b"")]);
        let messages = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap();
        assert_eq!(messages, vec![Message::Close(None)]);

        let mut buf = wire(&[(true, Opcode::Close, &[0x03])]);
        assert_matches!(
            drain(&mut MessageDecoder::new(1024), &mut buf),
            Err(FrameError::InvalidClosePayload)
        );
    }

    #[test]
    fn pong_is_surfaced() {
        let mut buf = wire(&[(true, Opcode::Pong, b"hb")]);
        let messages = drain(&mut MessageDecoder::new(1024), &mut buf).unwrap();
        assert_eq!(messages, vec![Message::Pong(Bytes::from_static(b"hb"))]);
    }
}
