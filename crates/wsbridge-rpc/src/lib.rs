//! # wsbridge-rpc
//!
//! Application layer on top of `wsbridge-server`.
//!
//! - Requests: `{"id", "method", "params"}` text messages parsed into a typed
//!   [`HostCall`] and executed against a [`Host`]
//! - Replies: `{"id"}`, `{"id", "result"}` or `{"id", "error"}` sent back to
//!   the calling connection only
//! - Events: [`HostEvent`] serialized as `{"event", "params"}` and broadcast
//!   to every open connection

#![deny(unsafe_code)]

pub mod dispatch;
pub mod errors;
pub mod events;
pub mod host;
pub mod params;
pub mod types;

pub use dispatch::RpcDispatcher;
pub use errors::{HostError, RpcError};
pub use events::{EventPublisher, HostEvent};
pub use host::{Host, HostCall, ResultShape};
pub use params::parse_call;
pub use types::RpcReply;
