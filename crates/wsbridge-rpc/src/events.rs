//! Host events pushed to every open connection.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};
use wsbridge_server::{BroadcastReport, ConnectionRegistry};

/// Something that happened on the host.
///
/// Serializes as `{"event": <name>, "params": {...}}`. `None` in an optional
/// string field is written as `""`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "params", rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum HostEvent {
    /// Incoming chat message.
    Message {
        #[serde(rename = "type")]
        kind: i64,
        #[serde(serialize_with = "empty_if_none")]
        msgid: Option<String>,
        #[serde(serialize_with = "empty_if_none")]
        group: Option<String>,
        qq: String,
        content: String,
    },
    /// Someone asked to become a friend.
    FriendRequest { qq: String, message: String },
    /// Friendship added or removed.
    FriendChange {
        #[serde(rename = "type")]
        kind: i64,
        qq: String,
    },
    GroupMemberIncrease {
        #[serde(rename = "type")]
        kind: i64,
        group: String,
        qq: String,
        #[serde(serialize_with = "empty_if_none")]
        operator: Option<String>,
    },
    GroupMemberDecrease {
        #[serde(rename = "type")]
        kind: i64,
        group: String,
        qq: String,
        #[serde(serialize_with = "empty_if_none")]
        operator: Option<String>,
    },
    AdminChange {
        #[serde(rename = "type")]
        kind: i64,
        group: String,
        qq: String,
    },
    /// Join request or invitation; `seq` is needed to answer it.
    GroupRequest {
        #[serde(rename = "type")]
        kind: i64,
        group: String,
        qq: String,
        #[serde(serialize_with = "empty_if_none")]
        operator: Option<String>,
        #[serde(serialize_with = "empty_if_none")]
        message: Option<String>,
        #[serde(serialize_with = "empty_if_none")]
        seq: Option<String>,
    },
    /// Wallet transfer received.
    ReceiveMoney {
        #[serde(rename = "type")]
        kind: i64,
        #[serde(serialize_with = "empty_if_none")]
        group: Option<String>,
        qq: String,
        amount: String,
        #[serde(serialize_with = "empty_if_none")]
        message: Option<String>,
        id: String,
    },
}

#[allow(clippy::ref_option)]
fn empty_if_none<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or(""))
}

impl HostEvent {
    /// Wire name in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::FriendRequest { .. } => "friendRequest",
            Self::FriendChange { .. } => "friendChange",
            Self::GroupMemberIncrease { .. } => "groupMemberIncrease",
            Self::GroupMemberDecrease { .. } => "groupMemberDecrease",
            Self::AdminChange { .. } => "adminChange",
            Self::GroupRequest { .. } => "groupRequest",
            Self::ReceiveMoney { .. } => "receiveMoney",
        }
    }
}

/// Broadcasts host events as text frames.
#[derive(Clone)]
pub struct EventPublisher {
    registry: Arc<ConnectionRegistry>,
}

impl EventPublisher {
    /// Publisher over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize `event` once and queue it for every open connection.
    pub async fn publish(&self, event: &HostEvent) -> BroadcastReport {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(err) => {
                warn!(event = event.name(), error = %err, "failed to serialize event");
                return BroadcastReport::default();
            }
        };
        let report = self.registry.broadcast_text(&text).await;
        debug!(
            event = event.name(),
            delivered = report.delivered,
            pruned = report.pruned,
            "event published"
        );
        report
    }
}
