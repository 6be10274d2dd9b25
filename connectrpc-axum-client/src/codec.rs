//! The message codec interface callers plug in to (de)serialize RPC payloads.
//!
//! This crate never serializes a message itself — that's generated-stub
//! territory. [`MessageCodec`] is named instead of reusing the wire-level
//! `Codec`/`Compression` vocabulary from `connectrpc-axum-core`, which is
//! about compressing already-encoded bytes, not about turning a typed
//! message into bytes in the first place.

use std::marker::PhantomData;

use bytes::Bytes;

use crate::error::ClientError;

/// Encodes and decodes a single message type to and from the bytes carried
/// inside an envelope (or, for Connect unary, the whole request/response body).
pub trait MessageCodec<T>: Send + Sync {
    /// The wire name of this codec, e.g. `"json"` or `"proto"`. Sent as part
    /// of the `Content-Type` (Connect, gRPC-Web) or used verbatim in
    /// `application/grpc+<name>` (gRPC).
    fn name(&self) -> &'static str;

    fn encode(&self, message: &T) -> Result<Bytes, ClientError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, ClientError>;
}

/// A [`MessageCodec`] backed by `prost::Message`, for the `proto` wire format.
pub struct ProstCodec<T>(PhantomData<fn() -> T>);

impl<T> ProstCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ProstCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageCodec<T> for ProstCodec<T>
where
    T: prost::Message + Default,
{
    fn name(&self) -> &'static str {
        "proto"
    }

    fn encode(&self, message: &T) -> Result<Bytes, ClientError> {
        Ok(message.encode_to_vec().into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, ClientError> {
        T::decode(bytes).map_err(|e| ClientError::Decode(format!("failed to decode proto message: {e}")))
    }
}

/// A [`MessageCodec`] backed by `serde_json`, for the `json` wire format.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageCodec<T> for JsonCodec<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, message: &T) -> Result<Bytes, ClientError> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| ClientError::Encode(format!("failed to encode JSON message: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, ClientError> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::Decode(format!("failed to decode JSON message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prost::Message)]
    struct Ping {
        #[prost(string, tag = "1")]
        text: String,
    }

    #[test]
    fn json_codec_round_trips() {
        let codec = JsonCodec::<Ping>::new();
        let ping = Ping { text: "hello".into() };
        let bytes = codec.encode(&ping).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), ping);
    }

    #[test]
    fn proto_codec_round_trips() {
        let codec = ProstCodec::<Ping>::new();
        let ping = Ping { text: "hello".into() };
        let bytes = codec.encode(&ping).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), ping);
    }
}
