//! Request dispatch: text message in, reply to the same connection out.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::task;
use tracing::{debug, instrument, warn};
use wsbridge_core::ConnectionId;
use wsbridge_server::{ConnectionRegistry, MessageHandler};

use crate::errors::RpcError;
use crate::host::{Host, HostCall, ResultShape};
use crate::params::parse_call;
use crate::types::RpcReply;

/// Bytes of a request shown in debug logs.
const LOG_PREVIEW: usize = 128;

const IMAGE_PREFIX: &str = "[QQ:pic=";

/// Turns request messages into host calls and sends the replies.
pub struct RpcDispatcher {
    host: Arc<dyn Host>,
    registry: Arc<ConnectionRegistry>,
}

impl RpcDispatcher {
    /// Dispatcher replying through `registry`.
    pub fn new(host: Arc<dyn Host>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { host, registry }
    }

    /// Process one request. `None` means the text was not JSON and nothing
    /// is sent back.
    ///
    /// Trailing bytes after the first JSON value are ignored.
    pub async fn process(&self, payload: &str) -> Option<RpcReply> {
        let request = match serde_json::Deserializer::from_str(payload)
            .into_iter::<Value>()
            .next()?
        {
            Ok(value) => value,
            Err(err) => {
                warn!(line = err.line(), column = err.column(), "unparseable request: {err}");
                return None;
            }
        };

        let Some(id) = request.get("id").and_then(Value::as_str) else {
            counter!("rpc_errors_total", "error_type" => RpcError::MissingId.kind()).increment(1);
            return Some(RpcReply::error("", &RpcError::MissingId));
        };
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            counter!("rpc_errors_total", "error_type" => RpcError::MissingMethod.kind())
                .increment(1);
            return Some(RpcReply::error(id, &RpcError::MissingMethod));
        };
        debug!(id, method, "client call");
        counter!("rpc_requests_total", "method" => method.to_owned()).increment(1);

        let start = Instant::now();
        let reply = match self.call(method, request.get("params")).await {
            Ok(result) => result.map_or_else(
                || RpcReply::accepted(id),
                |value| RpcReply::success(id, value),
            ),
            Err(err) => {
                counter!(
                    "rpc_errors_total",
                    "method" => method.to_owned(),
                    "error_type" => err.kind()
                )
                .increment(1);
                debug!(id, method, error = %err, "call failed");
                RpcReply::error(id, &err)
            }
        };
        histogram!("rpc_request_duration_seconds", "method" => method.to_owned())
            .record(start.elapsed().as_secs_f64());
        Some(reply)
    }

    /// Validate and run one call. The host runs on the blocking pool.
    async fn call(&self, method: &str, params: Option<&Value>) -> Result<Option<Value>, RpcError> {
        let call = parse_call(method, params)?;
        let host = Arc::clone(&self.host);
        task::spawn_blocking(move || -> Result<Option<Value>, RpcError> {
            let output = host.execute(&call)?;
            Ok(shape_result(&call, output))
        })
        .await
        .map_err(|e| RpcError::Host(format!("host call failed: {e}")))?
    }
}

/// Reply value for `call` given the host's raw output. `None` for actions.
fn shape_result(call: &HostCall, output: String) -> Option<Value> {
    match call.result_shape() {
        ResultShape::Accept => None,
        ResultShape::Json => Some(serde_json::from_str(&output).unwrap_or(Value::Null)),
        ResultShape::Text => Some(Value::String(output)),
        ResultShape::ImageGuid => Some(Value::String(image_guid(&output).to_owned())),
    }
}

/// GUID out of `[QQ:pic=<GUID>]`: the prefix and the final byte are
/// dropped. Anything not shaped like that (or 100 bytes or longer) gives
/// `""`.
fn image_guid(text: &str) -> &str {
    if text.len() <= 9 || text.len() >= 100 || !text.starts_with(IMAGE_PREFIX) {
        return "";
    }
    text.get(IMAGE_PREFIX.len()..text.len() - 1).unwrap_or("")
}

fn preview(payload: &str) -> &str {
    if payload.len() <= LOG_PREVIEW {
        return payload;
    }
    let mut end = LOG_PREVIEW;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    &payload[..end]
}

#[async_trait]
impl MessageHandler for RpcDispatcher {
    #[instrument(skip_all, fields(conn_id = %connection_id))]
    async fn handle(&self, payload: String, connection_id: &ConnectionId) {
        debug!(payload = preview(&payload), "request");
        let Some(reply) = self.process(&payload).await else {
            return;
        };
        let text = match serde_json::to_string(&reply) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to serialize reply");
                return;
            }
        };
        if let Err(err) = self.registry.send_text(connection_id, &text).await {
            debug!(error = %err, "reply not delivered");
        }
    }
}
