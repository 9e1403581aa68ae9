//! Payload conversion between broker bytes and application types.
//!
//! Inbound types implement [`ListenerPayload`], which tells a listener
//! container how to decode a delivered body. Outbound types implement
//! [`OutboundPayload`]. Text and raw bytes pass through untouched; everything
//! else travels as JSON.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::message::ConsumedEnvelope;

pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Encodes and decodes payload bodies with a fixed charset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadCodec {
    charset: String,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self {
            charset: DEFAULT_CHARSET.to_string(),
        }
    }
}

impl PayloadCodec {
    /// Build a codec for `charset`. Only UTF-8 is supported.
    pub fn new(charset: &str) -> Result<Self, CodecError> {
        let normalized = charset.trim();
        if normalized.eq_ignore_ascii_case("UTF-8") || normalized.eq_ignore_ascii_case("UTF8") {
            Ok(Self::default())
        } else {
            Err(CodecError::UnsupportedCharset(charset.to_string()))
        }
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn encode_text(&self, text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }

    pub fn encode_structured<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    pub fn decode_text(&self, body: &[u8]) -> Result<String, CodecError> {
        std::str::from_utf8(body)
            .map(str::to_string)
            .map_err(|source| CodecError::InvalidText {
                charset: self.charset.clone(),
                source,
            })
    }

    pub fn decode_structured<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, CodecError> {
        let text = self.decode_text(body)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// How a listener wants its payload delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// The full envelope, unchanged
    Envelope,
    /// Raw body bytes
    Bytes,
    /// Body decoded as text
    Text,
    /// Body decoded from JSON
    Structured,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Envelope => "envelope",
            Self::Bytes => "bytes",
            Self::Text => "text",
            Self::Structured => "structured",
        };
        f.write_str(name)
    }
}

pub type DecodeFn<T> = fn(&PayloadCodec, &ConsumedEnvelope) -> Result<T, CodecError>;

/// Resolved payload type: the kind plus the function that produces `T`
pub struct PayloadType<T> {
    kind: PayloadKind,
    decode: DecodeFn<T>,
}

impl<T> Clone for PayloadType<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PayloadType<T> {}

impl<T> fmt::Debug for PayloadType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadType").field("kind", &self.kind).finish()
    }
}

impl<T> PayloadType<T> {
    pub fn new(kind: PayloadKind, decode: DecodeFn<T>) -> Self {
        Self { kind, decode }
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn decode(&self, codec: &PayloadCodec, envelope: &ConsumedEnvelope) -> Result<T, CodecError> {
        (self.decode)(codec, envelope)
    }
}

impl PayloadType<ConsumedEnvelope> {
    pub fn envelope() -> Self {
        Self::new(PayloadKind::Envelope, |_, envelope| Ok(envelope.clone()))
    }
}

impl PayloadType<String> {
    pub fn text() -> Self {
        Self::new(PayloadKind::Text, |codec, envelope| codec.decode_text(&envelope.body))
    }
}

impl PayloadType<Bytes> {
    pub fn bytes() -> Self {
        Self::new(PayloadKind::Bytes, |_, envelope| Ok(envelope.body.clone()))
    }
}

impl<T: DeserializeOwned> PayloadType<T> {
    pub fn structured() -> Self {
        Self::new(PayloadKind::Structured, decode_structured::<T>)
    }
}

fn decode_structured<T: DeserializeOwned>(
    codec: &PayloadCodec,
    envelope: &ConsumedEnvelope,
) -> Result<T, CodecError> {
    codec.decode_structured(&envelope.body)
}

fn decode_json<T: DeserializeOwned>(
    codec: &PayloadCodec,
    envelope: &ConsumedEnvelope,
) -> Result<Json<T>, CodecError> {
    codec.decode_structured(&envelope.body).map(Json)
}

/// A type a listener can receive
pub trait ListenerPayload: Sized + Send + 'static {
    fn payload_type() -> PayloadType<Self>;
}

impl ListenerPayload for ConsumedEnvelope {
    fn payload_type() -> PayloadType<Self> {
        PayloadType::envelope()
    }
}

impl ListenerPayload for String {
    fn payload_type() -> PayloadType<Self> {
        PayloadType::text()
    }
}

impl ListenerPayload for Bytes {
    fn payload_type() -> PayloadType<Self> {
        PayloadType::bytes()
    }
}

impl ListenerPayload for Vec<u8> {
    fn payload_type() -> PayloadType<Self> {
        PayloadType::new(PayloadKind::Bytes, |_, envelope| Ok(envelope.body.to_vec()))
    }
}

impl ListenerPayload for serde_json::Value {
    fn payload_type() -> PayloadType<Self> {
        PayloadType::structured()
    }
}

impl<T: DeserializeOwned + Send + 'static> ListenerPayload for Json<T> {
    fn payload_type() -> PayloadType<Self> {
        PayloadType::new(PayloadKind::Structured, decode_json::<T>)
    }
}

/// A type the messaging template can send
pub trait OutboundPayload {
    fn encode(&self, codec: &PayloadCodec) -> Result<Bytes, CodecError>;
}

impl OutboundPayload for str {
    fn encode(&self, codec: &PayloadCodec) -> Result<Bytes, CodecError> {
        Ok(codec.encode_text(self))
    }
}

impl OutboundPayload for String {
    fn encode(&self, codec: &PayloadCodec) -> Result<Bytes, CodecError> {
        Ok(codec.encode_text(self))
    }
}

impl OutboundPayload for [u8] {
    fn encode(&self, _codec: &PayloadCodec) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(self))
    }
}

impl OutboundPayload for Vec<u8> {
    fn encode(&self, _codec: &PayloadCodec) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(self))
    }
}

impl OutboundPayload for Bytes {
    fn encode(&self, _codec: &PayloadCodec) -> Result<Bytes, CodecError> {
        Ok(self.clone())
    }
}

impl OutboundPayload for serde_json::Value {
    fn encode(&self, codec: &PayloadCodec) -> Result<Bytes, CodecError> {
        codec.encode_structured(self)
    }
}

impl<T: Serialize> OutboundPayload for Json<T> {
    fn encode(&self, codec: &PayloadCodec) -> Result<Bytes, CodecError> {
        codec.encode_structured(&self.0)
    }
}

impl<T: OutboundPayload + ?Sized> OutboundPayload for &T {
    fn encode(&self, codec: &PayloadCodec) -> Result<Bytes, CodecError> {
        (**self).encode(codec)
    }
}

/// Marks a value as a JSON payload in either direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Implements [`ListenerPayload`] and [`OutboundPayload`] as JSON for the
/// given types.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct OrderCreated {
///     order_id: u64,
/// }
///
/// rocketmesh::structured_payload!(OrderCreated);
/// ```
#[macro_export]
macro_rules! structured_payload {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::codec::ListenerPayload for $ty {
                fn payload_type() -> $crate::codec::PayloadType<Self> {
                    $crate::codec::PayloadType::structured()
                }
            }

            impl $crate::codec::OutboundPayload for $ty {
                fn encode(
                    &self,
                    codec: &$crate::codec::PayloadCodec,
                ) -> ::std::result::Result<$crate::bytes::Bytes, $crate::error::CodecError> {
                    codec.encode_structured(self)
                }
            }
        )+
    };
}
