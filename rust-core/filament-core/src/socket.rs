//! # WebSocket Sockets
//!
//! Upgrade handshake results, the typed [`Connection`] API, server-initiated
//! notifications and the duplex RPC transport.
//!
//! ## RPC transport
//!
//! A socket serving an RPC [`Service`] runs three loops that share one
//! cancellation token:
//!
//! - **receive**: read a frame, decode it with the negotiated codec, dispatch
//!   it and queue the response
//! - **send**: write queued responses and notifications
//! - **heartbeat**: ping the peer every interval, within the write deadline
//!
//! The first loop to stop cancels the others; once all three have returned
//! the socket is closed exactly once.

use crate::codec::Codec;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::rpc::{decode_request, Decoded, RpcError, RpcRequest, RpcResponse, Service};
use crate::server::ServerConfig;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Server-side stream of an upgraded connection
pub type ServerStream = WebSocketStream<TokioIo<Upgraded>>;

/// Handle for pushing notifications to a connected socket
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<RpcRequest>,
}

impl Notifier {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<RpcRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a `{method, params}` notification, waiting for buffer space
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the connection has gone away
    pub async fn notify(&self, method: impl Into<String>, params: Vec<Value>) -> Result<()> {
        self.tx
            .send(RpcRequest::notification(method, params))
            .await
            .map_err(|_| Error::Closed)
    }

    /// Queue a notification without waiting
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the connection has gone away or its buffer is full
    pub fn try_notify(&self, method: impl Into<String>, params: Vec<Value>) -> Result<()> {
        self.tx
            .try_send(RpcRequest::notification(method, params))
            .map_err(|_| Error::Closed)
    }

    /// Whether the connection has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Socket handle attached to a context after a successful upgrade
#[derive(Debug, Clone)]
pub struct Socket {
    codec: Codec,
    notifier: Notifier,
}

impl Socket {
    pub(crate) const fn new(codec: Codec, notifier: Notifier) -> Self {
        Self { codec, notifier }
    }

    /// Negotiated codec
    #[must_use]
    pub const fn codec(&self) -> Codec {
        self.codec
    }

    /// Notification handle for this connection
    #[must_use]
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

/// An accepted upgrade whose connection is not established yet
///
/// The `101` response has to be sent before the connection becomes
/// available, so the connection is awaited from a spawned task.
pub struct Upgrade {
    codec: Codec,
    on_upgrade: OnUpgrade,
    notifications: mpsc::Receiver<RpcRequest>,
}

impl std::fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgrade")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl Upgrade {
    pub(crate) const fn new(
        codec: Codec,
        on_upgrade: OnUpgrade,
        notifications: mpsc::Receiver<RpcRequest>,
    ) -> Self {
        Self {
            codec,
            on_upgrade,
            notifications,
        }
    }

    /// Negotiated codec
    #[must_use]
    pub const fn codec(&self) -> Codec {
        self.codec
    }

    /// Wait for the connection and wrap it in a typed [`Connection`]
    ///
    /// Notifications are not delivered on plain connections.
    ///
    /// # Errors
    ///
    /// Returns `Error::Hyper` if the upgrade did not complete
    pub async fn connect(self) -> Result<Connection<TokioIo<Upgraded>>> {
        let codec = self.codec;
        let (stream, _) = self.into_parts().await?;
        Ok(Connection::new(stream, codec))
    }

    pub(crate) async fn into_parts(self) -> Result<(ServerStream, mpsc::Receiver<RpcRequest>)> {
        let upgraded = self.on_upgrade.await?;
        let stream =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        Ok((stream, self.notifications))
    }
}

/// Wrap encoded bytes in the frame type the codec travels in
///
/// # Errors
///
/// Returns `Error::Encode` if a text codec produced invalid UTF-8
pub fn frame(codec: Codec, bytes: Vec<u8>) -> Result<Message> {
    if codec.is_text() {
        let text = String::from_utf8(bytes).map_err(|e| Error::Encode {
            media: codec.protocol(),
            reason: e.to_string(),
        })?;
        Ok(Message::text(text))
    } else {
        Ok(Message::binary(bytes))
    }
}

/// A WebSocket speaking one codec
pub struct Connection<S> {
    stream: WebSocketStream<S>,
    codec: Codec,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub const fn new(stream: WebSocketStream<S>, codec: Codec) -> Self {
        Self { stream, codec }
    }

    /// Negotiated codec
    #[must_use]
    pub const fn codec(&self) -> Codec {
        self.codec
    }

    /// Encode and send a value
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` or `Error::Socket` on failure
    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let message = frame(self.codec, self.codec.encode(value)?)?;
        self.stream.send(message).await?;
        Ok(())
    }

    /// Receive and decode the next data frame; `None` once the peer closed
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` or `Error::Socket` on failure
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        while let Some(message) = self.stream.next().await {
            match message? {
                message @ (Message::Text(_) | Message::Binary(_)) => {
                    return self.codec.decode(&message.into_data()).map(Some);
                }
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns `Error::Socket` if the close handshake could not be written
    pub async fn close(mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(())
            | Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Unwrap the underlying stream
    pub fn into_inner(self) -> WebSocketStream<S> {
        self.stream
    }
}

/// Liveness settings for RPC sockets
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    /// Time between pings
    pub interval: Duration,
    /// Time allowed for writing a ping
    pub deadline: Duration,
    /// Queued outbound responses before the receive loop waits
    pub buffer: usize,
}

impl Heartbeat {
    /// Take the settings from the server configuration
    #[must_use]
    pub const fn from_config(config: &ServerConfig) -> Self {
        Self {
            interval: config.heartbeat_interval,
            deadline: config.write_deadline,
            buffer: config.notification_buffer,
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

type SharedSink<S> = Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>;

/// Serve RPC calls over an established socket until it closes
///
/// `session` is the context method calls observe. Its token is replaced by
/// the connection's own token, a child of the original, so cancelling the
/// original stops the connection and methods see the connection end.
///
/// # Errors
///
/// Returns the error that terminated the connection, if any
pub async fn serve_rpc<S>(
    stream: WebSocketStream<S>,
    codec: Codec,
    service: Arc<Service>,
    mut session: Context,
    notifications: mpsc::Receiver<RpcRequest>,
    heartbeat: Heartbeat,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let token = session.token().child_token();
    session.replace_token(token.clone());
    let (sink, stream) = stream.split();
    let sink: SharedSink<S> = Arc::new(Mutex::new(sink));
    let (responses_tx, responses_rx) = mpsc::channel(heartbeat.buffer.max(1));

    let (received, sent, pinged) = tokio::join!(
        receive(stream, codec, &service, &session, responses_tx, token.clone()),
        send(Arc::clone(&sink), codec, responses_rx, notifications, token.clone()),
        ping(Arc::clone(&sink), heartbeat, token.clone()),
    );

    if let Err(err) = sink.lock().await.close().await {
        debug!(id = %session.uniq(), error = %err, "Socket close failed");
    }

    received.and(sent).and(pinged)
}

async fn receive<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    codec: Codec,
    service: &Service,
    session: &Context,
    responses: mpsc::Sender<RpcResponse>,
    token: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _stop = token.clone().drop_guard();
    loop {
        let frame = tokio::select! {
            () = token.cancelled() => return Ok(()),
            frame = stream.next() => frame,
        };
        let message = match frame {
            Some(message) => message?,
            None => return Ok(()),
        };
        let data = match message {
            Message::Text(_) | Message::Binary(_) => message.into_data(),
            Message::Close(_) => return Ok(()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        let reply = match decode_request(codec, &data) {
            Decoded::Request(request) => tokio::select! {
                () = token.cancelled() => return Ok(()),
                reply = service.call(session, request) => reply,
            },
            Decoded::Malformed { id, reason } => {
                debug!(id = %session.uniq(), reason = %reason, "Malformed RPC frame");
                id.map(|id| RpcResponse::failure(id, RpcError::parse_error()))
            }
            Decoded::Unreadable(err) => return Err(err),
        };

        if let Some(response) = reply {
            if responses.send(response).await.is_err() {
                return Ok(());
            }
        }
    }
}

async fn send<S>(
    sink: SharedSink<S>,
    codec: Codec,
    mut responses: mpsc::Receiver<RpcResponse>,
    mut notifications: mpsc::Receiver<RpcRequest>,
    token: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _stop = token.clone().drop_guard();
    loop {
        let bytes = tokio::select! {
            () = token.cancelled() => return Ok(()),
            Some(response) = responses.recv() => codec.encode(&response)?,
            Some(notification) = notifications.recv() => codec.encode(&notification)?,
            else => return Ok(()),
        };
        sink.lock().await.send(frame(codec, bytes)?).await?;
    }
}

async fn ping<S>(sink: SharedSink<S>, heartbeat: Heartbeat, token: CancellationToken) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _stop = token.clone().drop_guard();
    let start = tokio::time::Instant::now() + heartbeat.interval;
    let mut ticker = tokio::time::interval_at(start, heartbeat.interval);
    loop {
        tokio::select! {
            () = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        let write = async {
            sink.lock()
                .await
                .send(Message::Ping(Default::default()))
                .await
        };
        match tokio::time::timeout(heartbeat.deadline, write).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                return Err(Error::Heartbeat {
                    millis: heartbeat.deadline.as_millis(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_kinds() {
        assert!(matches!(frame(Codec::Json, b"{}".to_vec()), Ok(Message::Text(_))));
        assert!(matches!(frame(Codec::Cbor, vec![0xa0]), Ok(Message::Binary(_))));
        assert!(frame(Codec::Json, vec![0xff, 0xfe]).is_err());
    }

    #[tokio::test]
    async fn test_notifier_queues_notifications() {
        let (notifier, mut rx) = Notifier::channel(4);
        notifier.notify("tick", vec![json!(1)]).await.unwrap();
        let note = rx.recv().await.unwrap();
        assert_eq!(note.method, "tick");
        assert!(note.is_notification());
    }

    #[tokio::test]
    async fn test_notifier_reports_closed() {
        let (notifier, rx) = Notifier::channel(1);
        drop(rx);
        assert!(notifier.is_closed());
        assert!(matches!(
            notifier.notify("tick", vec![]).await,
            Err(Error::Closed)
        ));
    }

    fn waiting_service() -> Arc<Service> {
        Arc::new(Service::new().method("Wait", |ctx: &Context, (): ()| {
            let token = ctx.token().clone();
            async move {
                token.cancelled().await;
                Ok::<_, String>(true)
            }
        }))
    }

    #[tokio::test]
    async fn test_rpc_socket_ends_while_method_is_waiting() {
        let (server_io, client_io) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let (_notifier, notifications) = Notifier::channel(1);
        let heartbeat = Heartbeat {
            interval: Duration::from_millis(50),
            deadline: Duration::from_millis(50),
            buffer: 4,
        };

        let session = Context::from_request(crate::request::Request::default());
        let serving = tokio::spawn(serve_rpc(
            server,
            Codec::Json,
            waiting_service(),
            session,
            notifications,
            heartbeat,
        ));

        let call = RpcRequest::call(json!(1), "Wait", vec![]);
        let text = serde_json::to_string(&call).unwrap();
        client.send(Message::Text(text.into())).await.unwrap();
        drop(client);

        let finished = tokio::time::timeout(Duration::from_secs(3), serving).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_rpc_socket_stops_with_session_token() {
        let (server_io, _client_io) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let (_notifier, notifications) = Notifier::channel(1);

        let session = Context::from_request(crate::request::Request::default());
        let parent = session.token().clone();
        let serving = tokio::spawn(serve_rpc(
            server,
            Codec::Json,
            waiting_service(),
            session,
            notifications,
            Heartbeat::default(),
        ));

        parent.cancel();
        let finished = tokio::time::timeout(Duration::from_secs(3), serving).await;
        assert!(matches!(finished, Ok(Ok(_))));
    }

    #[test]
    fn test_heartbeat_defaults() {
        let heartbeat = Heartbeat::default();
        assert_eq!(heartbeat.interval, Duration::from_secs(30));
        assert_eq!(heartbeat.deadline, Duration::from_secs(10));
    }
}
