//! # wsbridge-protocol
//!
//! The RFC 6455 protocol engine, free of any I/O:
//!
//! - [`handshake`]: HTTP upgrade request parsing, validation, accept token,
//!   101 and rejection responses
//! - [`frame`]: resumable frame decoder and unmasked frame encoder
//!   (`tokio_util::codec`)
//! - [`message`]: fragmentation reassembly on top of the frame codec
//! - [`close`]: close codes and close frame payloads
//!
//! The server crate drives these over a `TcpStream`; every type here works on
//! plain byte buffers so the codec can be tested without sockets.

#![deny(unsafe_code)]

pub mod close;
pub mod frame;
pub mod handshake;
pub mod message;

pub use close::{CloseCode, CloseFrame};
pub use frame::{Frame, FrameCodec, FrameError, Opcode, apply_mask, encode_frame};
pub use handshake::{
    AcceptResponse, HandshakeError, HttpRequest, MAX_REQUEST_HEAD, compute_accept_key,
    find_head_end, reject_response, validate_upgrade,
};
pub use message::{Message, MessageDecoder};
