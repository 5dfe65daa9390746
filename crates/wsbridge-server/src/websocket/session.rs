//! WebSocket session lifecycle: handles a single accepted socket from the
//! upgrade request through release.
//!
//! Each session runs two tasks. The session task reads, decodes and
//! dispatches; a writer task owns the write half and drains the connection's
//! outbound queue, interleaving heartbeat pings. Every frame written after the
//! upgrade goes through that queue, so writes never interleave.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use metrics::{counter, gauge, histogram};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, trace};
use wsbridge_core::ConnectionId;
use wsbridge_protocol::{
    CloseCode, CloseFrame, FrameError, HandshakeError, HttpRequest, MAX_REQUEST_HEAD, Message,
    MessageDecoder, Opcode, encode_frame, find_head_end, validate_upgrade,
};

use super::connection::{ClientConnection, ConnectionState, Outbound};
use super::handler::MessageHandler;
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;

/// How long the epilogue waits for queued frames and the close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// State shared by every session of one server.
pub(crate) struct SessionContext {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) shutdown: CancellationToken,
}

/// Why the receive loop ended.
#[derive(Debug)]
enum Exit {
    PeerClosed(Option<CloseFrame>),
    Protocol(FrameError),
    Eof,
    ReadError(std::io::Error),
    IdleTimeout,
    Cancelled,
    QueueRejected,
}

impl Exit {
    /// Close frame to send before releasing, if the transport can take one.
    fn close_frame(&self, server_stopping: bool) -> Option<Bytes> {
        let frame = match self {
            Self::PeerClosed(received) => Some(CloseFrame::new(
                received.as_ref().map_or(CloseCode::Normal, |f| f.code),
            )),
            Self::Protocol(err) => err
                .close_code()
                .map(|code| CloseFrame::with_reason(code, err.to_string())),
            Self::IdleTimeout => Some(CloseFrame::with_reason(CloseCode::GoingAway, "idle timeout")),
            Self::Cancelled if server_stopping => Some(CloseFrame::new(CloseCode::GoingAway)),
            Self::Cancelled | Self::Eof | Self::ReadError(_) | Self::QueueRejected => None,
        }?;
        Some(encode_frame(Opcode::Close, &frame.encode()))
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::PeerClosed(_) => "peer closed",
            Self::Protocol(_) => "protocol error",
            Self::Eof => "eof",
            Self::ReadError(_) => "read error",
            Self::IdleTimeout => "idle timeout",
            Self::Cancelled => "cancelled",
            Self::QueueRejected => "outbound queue rejected frame",
        }
    }
}

enum HeadRead {
    Complete(usize),
    Closed,
    TooLarge,
}

enum ReadFailure {
    Idle,
    Io(std::io::Error),
}

/// Run one accepted socket to completion.
///
/// 1. Reads and validates the upgrade request (bounded in time and bytes)
/// 2. Registers the connection and answers `101 Switching Protocols`
/// 3. Spawns the writer and runs the receive loop
/// 4. Unregisters, queues a close frame if appropriate, drains the writer
#[instrument(skip_all, fields(peer = %peer, conn_id = tracing::field::Empty))]
pub(crate) async fn run_session(mut stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) {
    let mut buf = BytesMut::with_capacity(4096);

    let head = tokio::select! {
        () = ctx.shutdown.cancelled() => return,
        read = tokio::time::timeout(
            ctx.config.handshake_timeout(),
            read_request_head(&mut stream, &mut buf),
        ) => match read {
            Ok(head) => head,
            Err(_) => {
                debug!("handshake timed out");
                return;
            }
        },
    };
    let head_len = match head {
        HeadRead::Complete(len) => len,
        HeadRead::Closed => {
            debug!("peer left before completing handshake");
            return;
        }
        HeadRead::TooLarge => {
            reject(&mut stream, &HandshakeError::HeadTooLarge).await;
            return;
        }
    };
    // Whatever follows the head is the start of the frame stream.
    let head = buf.split_to(head_len);

    let accepted = match HttpRequest::parse(&head)
        .and_then(|request| validate_upgrade(&request, &ctx.config.path))
    {
        Ok(accepted) => accepted,
        Err(err) => {
            reject(&mut stream, &err).await;
            return;
        }
    };

    let (tx, rx) = mpsc::channel(ctx.config.outbound_queue_capacity);
    let connection = Arc::new(ClientConnection::new(
        ConnectionId::new(),
        peer,
        tx,
        ctx.shutdown.child_token(),
    ));
    let _ = tracing::Span::current().record("conn_id", connection.id.as_str());

    if !ctx
        .registry
        .try_register(connection.clone(), ctx.config.max_connections)
        .await
    {
        reject(&mut stream, &HandshakeError::ConnectionLimit).await;
        return;
    }
    if let Err(e) = stream.write_all(&accepted.response_bytes()).await {
        debug!(error = %e, "failed to write upgrade response");
        let _ = ctx.registry.unregister(&connection.id).await;
        connection.set_state(ConnectionState::Closed);
        return;
    }

    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let (read_half, write_half) = stream.into_split();
    let writer = tokio::spawn(
        run_writer(
            write_half,
            rx,
            ctx.config.heartbeat_interval(),
            connection.cancel_token().clone(),
        )
        .in_current_span(),
    );

    let exit = receive_loop(read_half, buf, &connection, &ctx).await;

    let _ = ctx.registry.unregister(&connection.id).await;
    match &exit {
        Exit::Protocol(err) => {
            if let Some(code) = err.close_code() {
                counter!("ws_protocol_errors_total", "code" => code.to_string()).increment(1);
            }
            debug!(error = %err, "protocol error");
        }
        Exit::ReadError(err) => debug!(error = %err, "read failed"),
        _ => {}
    }
    let close = exit.close_frame(ctx.shutdown.is_cancelled());
    drain_writer(&connection, close, writer).await;
    connection.set_state(ConnectionState::Closed);

    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection.age().as_secs_f64());
    info!(reason = exit.reason(), "client disconnected");
}

async fn receive_loop(
    mut reader: OwnedReadHalf,
    mut buf: BytesMut,
    connection: &ClientConnection,
    ctx: &SessionContext,
) -> Exit {
    let mut decoder = MessageDecoder::new(ctx.config.max_message_size);
    let idle = ctx.config.idle_timeout();
    let cancel = connection.cancel_token();

    loop {
        // Drain every complete message already buffered before reading more.
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(message)) => {
                    if let Some(exit) = on_message(message, connection, ctx).await {
                        return exit;
                    }
                }
                Ok(None) => break,
                Err(err) => return Exit::Protocol(err),
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Exit::Cancelled,
            read = read_some(&mut reader, &mut buf, idle) => match read {
                Ok(0) => return Exit::Eof,
                Ok(_) => connection.touch(),
                Err(ReadFailure::Idle) => return Exit::IdleTimeout,
                Err(ReadFailure::Io(e)) => return Exit::ReadError(e),
            },
        }
    }
}

async fn on_message(
    message: Message,
    connection: &ClientConnection,
    ctx: &SessionContext,
) -> Option<Exit> {
    match message {
        Message::Text(text) => {
            trace!(len = text.len(), "text message");
            ctx.handler.handle(text, &connection.id).await;
        }
        Message::Binary(data) => debug!(len = data.len(), "discarding binary message"),
        Message::Ping(payload) => {
            if !connection.enqueue(encode_frame(Opcode::Pong, &payload)) {
                return Some(Exit::QueueRejected);
            }
        }
        Message::Pong(_) => trace!("pong received"),
        Message::Close(frame) => return Some(Exit::PeerClosed(frame)),
    }
    None
}

async fn read_some(
    reader: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    idle: Option<Duration>,
) -> Result<usize, ReadFailure> {
    if buf.capacity() - buf.len() < 1024 {
        buf.reserve(4096);
    }
    match idle {
        Some(limit) => tokio::time::timeout(limit, reader.read_buf(buf))
            .await
            .map_err(|_| ReadFailure::Idle)?
            .map_err(ReadFailure::Io),
        None => reader.read_buf(buf).await.map_err(ReadFailure::Io),
    }
}

async fn read_request_head<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut BytesMut) -> HeadRead {
    loop {
        if let Some(end) = find_head_end(buf) {
            return if end > MAX_REQUEST_HEAD {
                HeadRead::TooLarge
            } else {
                HeadRead::Complete(end)
            };
        }
        if buf.len() >= MAX_REQUEST_HEAD {
            return HeadRead::TooLarge;
        }
        match reader.read_buf(buf).await {
            Ok(0) | Err(_) => return HeadRead::Closed,
            Ok(_) => {}
        }
    }
}

async fn reject(stream: &mut TcpStream, err: &HandshakeError) {
    let status = err.status();
    debug!(status, error = %err, "rejecting upgrade");
    counter!("ws_handshake_rejections_total", "status" => status.to_string()).increment(1);
    let _ = stream.write_all(&err.response_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Queue the final item and wait (bounded) for the writer to finish.
async fn drain_writer(connection: &ClientConnection, close: Option<Bytes>, mut writer: JoinHandle<()>) {
    let drained = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, async {
        let _ = connection.enqueue_close(close).await;
        let _ = (&mut writer).await;
    })
    .await;
    if drained.is_err() {
        debug!("writer did not drain in time, aborting");
        writer.abort();
    }
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Outbound>,
    heartbeat: Option<Duration>,
    cancel: CancellationToken,
) {
    let mut ping_interval = heartbeat.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let ping = encode_frame(Opcode::Ping, b"");

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(Outbound::Frame(bytes)) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        debug!(error = %e, "write failed");
                        break;
                    }
                }
                Some(Outbound::Close(frame)) => {
                    if let Some(bytes) = frame {
                        let _ = writer.write_all(&bytes).await;
                    }
                    let _ = writer.shutdown().await;
                    return;
                }
                None => return,
            },
            () = next_tick(&mut ping_interval) => {
                if let Err(e) = writer.write_all(&ping).await {
                    debug!(error = %e, "ping write failed");
                    break;
                }
            }
        }
    }
    // The transport is gone; end the session too.
    cancel.cancel();
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
