//! # WebSocket RPC Client
//!
//! Connects to an RPC endpoint, negotiates a codec through the WebSocket
//! sub-protocol, and correlates responses with calls by id. Notifications
//! pushed by the server while a call is in flight are queued and handed out
//! by [`Client::next_notification`].

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::rpc::{RpcRequest, RpcResponse};
use crate::socket::Connection;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tracing::debug;

/// WebSocket RPC client
#[derive(Debug)]
pub struct Client {
    conn: Connection<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    pending: VecDeque<RpcRequest>,
}

impl Client {
    /// Connect to `url` (`ws://host:port/path`), offering `codecs` in preference order
    ///
    /// With no codecs offered the server picks its first one, which is
    /// assumed to be JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Socket` if the connection or handshake fails and
    /// `Error::Protocol` if the server selected a codec that was not offered
    pub async fn connect(url: &str, codecs: &[Codec]) -> Result<Self> {
        let mut request = url.into_client_request()?;
        if !codecs.is_empty() {
            let offered = codecs
                .iter()
                .map(Codec::protocol)
                .collect::<Vec<_>>()
                .join(", ");
            let value = HeaderValue::from_str(&offered)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (stream, response) = connect_async(request).await?;
        let selected = response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        let codec = match selected {
            Some(protocol) => Codec::from_protocol(protocol)
                .filter(|c| codecs.is_empty() || codecs.contains(c))
                .ok_or_else(|| Error::Protocol(format!("server selected unknown sub-protocol {protocol}")))?,
            None => Codec::default(),
        };
        debug!(url = %url, codec = %codec, "Connected");

        Ok(Self {
            conn: Connection::new(stream, codec),
            next_id: 0,
            pending: VecDeque::new(),
        })
    }

    /// Negotiated codec
    #[must_use]
    pub const fn codec(&self) -> Codec {
        self.conn.codec()
    }

    /// Call `method` and wait for its response
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the server closed the connection first, or
    /// a transport/decoding error. A failed call is an `Ok` response with
    /// its `error` set.
    pub async fn call(&mut self, method: impl Into<String>, params: Vec<Value>) -> Result<RpcResponse> {
        self.next_id += 1;
        let id = Value::from(self.next_id);
        self.conn
            .send(&RpcRequest::call(id.clone(), method, params))
            .await?;

        loop {
            let message = self.conn.recv::<Value>().await?.ok_or(Error::Closed)?;
            if message.get("method").is_some() {
                self.pending.push_back(serde_json::from_value(message)?);
                continue;
            }
            let response: RpcResponse = serde_json::from_value(message)?;
            if response.id == id {
                return Ok(response);
            }
            debug!(id = %response.id, "Dropping response to an earlier call");
        }
    }

    /// Send a notification; the server never answers it
    ///
    /// # Errors
    ///
    /// Returns a transport or encoding error
    pub async fn notify(&mut self, method: impl Into<String>, params: Vec<Value>) -> Result<()> {
        self.conn
            .send(&RpcRequest::notification(method, params))
            .await
    }

    /// Next notification pushed by the server; `None` once the connection closed
    ///
    /// # Errors
    ///
    /// Returns a transport or decoding error
    pub async fn next_notification(&mut self) -> Result<Option<RpcRequest>> {
        if let Some(queued) = self.pending.pop_front() {
            return Ok(Some(queued));
        }
        while let Some(message) = self.conn.recv::<Value>().await? {
            if message.get("method").is_some() {
                return Ok(Some(serde_json::from_value(message)?));
            }
            debug!("Dropping response outside of a call");
        }
        Ok(None)
    }

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns `Error::Socket` if the close handshake could not be written
    pub async fn close(self) -> Result<()> {
        self.conn.close().await
    }
}
