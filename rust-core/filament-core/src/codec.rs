//! # Codecs & Media Types
//!
//! Content negotiation for request bodies and responses, and the binary/text
//! codecs spoken on RPC endpoints and sockets.
//!
//! | Codec     | Media type            | Sub-protocol | Frame  |
//! |-----------|-----------------------|--------------|--------|
//! | `Json`    | `application/json`    | `json`       | text   |
//! | `Cbor`    | `application/cbor`    | `cbor`       | binary |
//! | `MsgPack` | `application/msgpack` | `msgpack`    | binary |

use crate::error::{Error, Result};
use crate::json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Media types the framework understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MediaType {
    /// `application/json`
    #[default]
    Json,
    /// `application/xml` or `text/xml`
    Xml,
    /// `application/msgpack` or `application/x-msgpack`
    MsgPack,
    /// `application/cbor`
    Cbor,
    /// `application/x-www-form-urlencoded`
    Form,
    /// `text/plain`
    Text,
    /// `text/html`
    Html,
}

impl MediaType {
    /// Recognize a bare media type (lower-case, parameters stripped)
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "application/json" => Some(Self::Json),
            "application/xml" | "text/xml" => Some(Self::Xml),
            "application/msgpack" | "application/x-msgpack" | "application/vnd.msgpack" => {
                Some(Self::MsgPack)
            }
            "application/cbor" => Some(Self::Cbor),
            "application/x-www-form-urlencoded" => Some(Self::Form),
            "text/plain" => Some(Self::Text),
            "text/html" => Some(Self::Html),
            _ => None,
        }
    }

    /// Canonical media type string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::MsgPack => "application/msgpack",
            Self::Cbor => "application/cbor",
            Self::Form => "application/x-www-form-urlencoded",
            Self::Text => "text/plain",
            Self::Html => "text/html",
        }
    }

    /// `Content-Type` header value, with a charset for textual types
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json; charset=utf-8",
            Self::Xml => "application/xml; charset=utf-8",
            Self::Text => "text/plain; charset=utf-8",
            Self::Html => "text/html; charset=utf-8",
            other => other.as_str(),
        }
    }

    /// Structured codec for this media type, if any
    #[must_use]
    pub const fn codec(&self) -> Option<Codec> {
        match self {
            Self::Json => Some(Codec::Json),
            Self::Cbor => Some(Codec::Cbor),
            Self::MsgPack => Some(Codec::MsgPack),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire codec for RPC envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Codec {
    /// JSON, carried in text frames
    #[default]
    Json,
    /// CBOR, carried in binary frames
    Cbor,
    /// MessagePack, carried in binary frames
    MsgPack,
}

impl Codec {
    /// Every codec, in default preference order
    pub const ALL: [Self; 3] = [Self::Json, Self::Cbor, Self::MsgPack];

    /// WebSocket sub-protocol name
    #[must_use]
    pub const fn protocol(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Cbor => "cbor",
            Self::MsgPack => "msgpack",
        }
    }

    /// Look up a codec by sub-protocol name
    #[must_use]
    pub fn from_protocol(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.protocol() == name)
    }

    /// Media type used when the codec travels over plain HTTP
    #[must_use]
    pub const fn media_type(&self) -> MediaType {
        match self {
            Self::Json => MediaType::Json,
            Self::Cbor => MediaType::Cbor,
            Self::MsgPack => MediaType::MsgPack,
        }
    }

    /// Whether frames are text (otherwise binary)
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Json)
    }

    /// Encode a value
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if the value cannot be represented
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => json::to_json(value),
            Self::Cbor => to_cbor(value),
            Self::MsgPack => to_msgpack(value),
        }
    }

    /// Decode a value
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the bytes are malformed or do not fit `T`
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json => json::parse_json(bytes),
            Self::Cbor => from_cbor(bytes),
            Self::MsgPack => from_msgpack(bytes),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol())
    }
}

/// Encode a value as CBOR
///
/// # Errors
///
/// Returns `Error::Encode` on serializer failure
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| Error::Encode {
        media: "cbor",
        reason: e.to_string(),
    })?;
    Ok(out)
}

/// Decode a CBOR value
///
/// # Errors
///
/// Returns `Error::Decode` on malformed input
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| Error::Decode {
        media: "cbor",
        reason: e.to_string(),
    })
}

/// Encode a value as MessagePack, structs as maps
///
/// # Errors
///
/// Returns `Error::Encode` on serializer failure
pub fn to_msgpack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| Error::Encode {
        media: "msgpack",
        reason: e.to_string(),
    })
}

/// Decode a MessagePack value
///
/// # Errors
///
/// Returns `Error::Decode` on malformed input
pub fn from_msgpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::Decode {
        media: "msgpack",
        reason: e.to_string(),
    })
}

/// Encode a value as an XML document with the given root element
///
/// # Errors
///
/// Returns `Error::Encode` on serializer failure
pub fn to_xml<T: Serialize>(value: &T, root: &str) -> Result<Vec<u8>> {
    quick_xml::se::to_string_with_root(root, value)
        .map(String::into_bytes)
        .map_err(|e| Error::Encode {
            media: "xml",
            reason: e.to_string(),
        })
}

/// Decode an XML document
///
/// # Errors
///
/// Returns `Error::Decode` on malformed input
pub fn from_xml<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::Decode {
        media: "xml",
        reason: e.to_string(),
    })?;
    quick_xml::de::from_str(text).map_err(|e| Error::Decode {
        media: "xml",
        reason: e.to_string(),
    })
}

/// Decode a URL-encoded form into a structured value
///
/// Repeated names become arrays; every scalar is a string.
///
/// # Errors
///
/// Returns `Error::Decode` if the form does not fit `T`
pub fn from_form<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let value = crate::types::Params::parse(bytes).to_value();
    serde_json::from_value(value).map_err(|e| Error::Decode {
        media: "form",
        reason: e.to_string(),
    })
}
