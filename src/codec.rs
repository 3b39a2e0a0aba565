//! The message codec seam between application types and wire payloads.
//!
//! A [`Connection`](crate::Connection) is parameterized by a codec rather
//! than a wire format: the codec decides how a typed message becomes bytes
//! and which frame kind carries it. [`JsonCodec`] covers structured
//! messages, [`RawCodec`] and [`TextCodec`] cover the byte-slice and string
//! cases without pulling serde into the path.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Which data frame kind carries a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Text frame (opcode 0x1).
    Text,
    /// Binary frame (opcode 0x2).
    Binary,
}

/// Serializes and deserializes application messages at the connection
/// boundary.
pub trait MessageCodec: Send + Sync + 'static {
    /// The application message type.
    type Message: Send + Sync + 'static;

    /// Serialize a message, choosing the frame kind that carries it.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationFailed` when the message cannot be
    /// encoded.
    fn encode(&self, msg: &Self::Message) -> Result<(MessageKind, Vec<u8>)>;

    /// Deserialize a fully reassembled (and decompressed) payload.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeserializationFailed` when the payload cannot be
    /// decoded.
    fn decode(&self, kind: MessageKind, payload: Vec<u8>) -> Result<Self::Message>;
}

/// JSON codec for any serde-serializable message type. JSON payloads ride
/// on text frames.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Message = T;

    fn encode(&self, msg: &T) -> Result<(MessageKind, Vec<u8>)> {
        let bytes =
            serde_json::to_vec(msg).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        Ok((MessageKind::Text, bytes))
    }

    fn decode(&self, _kind: MessageKind, payload: Vec<u8>) -> Result<T> {
        serde_json::from_slice(&payload).map_err(|e| Error::DeserializationFailed(e.to_string()))
    }
}

/// Pass-through codec for raw byte messages, carried on binary frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl MessageCodec for RawCodec {
    type Message = Vec<u8>;

    fn encode(&self, msg: &Vec<u8>) -> Result<(MessageKind, Vec<u8>)> {
        Ok((MessageKind::Binary, msg.clone()))
    }

    fn decode(&self, _kind: MessageKind, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(payload)
    }
}

/// UTF-8 string codec, carried on text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl MessageCodec for TextCodec {
    type Message = String;

    fn encode(&self, msg: &String) -> Result<(MessageKind, Vec<u8>)> {
        Ok((MessageKind::Text, msg.clone().into_bytes()))
    }

    fn decode(&self, _kind: MessageKind, payload: Vec<u8>) -> Result<String> {
        String::from_utf8(payload)
            .map_err(|_| Error::DeserializationFailed("payload is not valid UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        symbol: String,
        qty: f64,
    }

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec::<Order>::new();
        let order = Order {
            id: 42,
            symbol: "BTCUSD".into(),
            qty: 0.5,
        };

        let (kind, bytes) = codec.encode(&order).unwrap();
        assert_eq!(kind, MessageKind::Text);

        let decoded = codec.decode(kind, bytes).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn test_json_codec_decode_failure() {
        let codec = JsonCodec::<Order>::new();
        let result = codec.decode(MessageKind::Text, b"not json at all".to_vec());
        assert!(matches!(result, Err(Error::DeserializationFailed(_))));
    }

    #[test]
    fn test_raw_codec_passthrough() {
        let codec = RawCodec;
        let data = vec![0x00, 0xff, 0x80, 0x7f];

        let (kind, bytes) = codec.encode(&data).unwrap();
        assert_eq!(kind, MessageKind::Binary);
        assert_eq!(bytes, data);

        assert_eq!(codec.decode(kind, bytes).unwrap(), data);
    }

    #[test]
    fn test_text_codec_roundtrip() {
        let codec = TextCodec;
        let msg = "hello world".to_string();

        let (kind, bytes) = codec.encode(&msg).unwrap();
        assert_eq!(kind, MessageKind::Text);

        assert_eq!(codec.decode(kind, bytes).unwrap(), msg);
    }

    #[test]
    fn test_text_codec_invalid_utf8() {
        let codec = TextCodec;
        let result = codec.decode(MessageKind::Text, vec![0x80, 0x81]);
        assert!(matches!(result, Err(Error::DeserializationFailed(_))));
    }
}
