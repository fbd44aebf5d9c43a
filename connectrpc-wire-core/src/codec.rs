//! Message codecs: how a typed message becomes bytes and back.
//!
//! A [`Codec`] is selected by the content-subtype on the wire (`proto`,
//! `json`, ...). Codecs work on [`WireMessage`], an object-safe view that every
//! prost + serde message type gets for free, so the registry can hold them
//! behind `dyn`.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Code, ConnectError};

/// Codec name for binary protobuf.
pub const CODEC_NAME_PROTO: &str = "proto";
/// Codec name for protobuf JSON.
pub const CODEC_NAME_JSON: &str = "json";

/// Object-safe access to the encodings a message supports.
pub trait WireMessage: Send + Sync {
    fn encode_binary(&self) -> Vec<u8>;
    fn merge_binary(&mut self, data: &[u8]) -> Result<(), prost::DecodeError>;
    fn encode_json(&self) -> serde_json::Result<Vec<u8>>;
    fn replace_from_json(&mut self, data: &[u8]) -> serde_json::Result<()>;
}

impl<T> WireMessage for T
where
    T: prost::Message + Serialize + DeserializeOwned + Send + Sync,
{
    fn encode_binary(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn merge_binary(&mut self, data: &[u8]) -> Result<(), prost::DecodeError> {
        self.merge(data)
    }

    fn encode_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn replace_from_json(&mut self, data: &[u8]) -> serde_json::Result<()> {
        *self = serde_json::from_slice(data)?;
        Ok(())
    }
}

/// Failure reported by a codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The bytes do not describe a valid message.
    #[error("{0}")]
    Invalid(String),
    /// The codec itself failed.
    #[error("{0}")]
    Internal(String),
}

impl From<CodecError> for ConnectError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Invalid(message) => ConnectError::new(Code::InvalidArgument, message),
            CodecError::Internal(message) => ConnectError::new(Code::Internal, message),
        }
    }
}

/// A named marshal/unmarshal strategy.
pub trait Codec: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn marshal(&self, message: &dyn WireMessage) -> Result<Vec<u8>, CodecError>;
    fn unmarshal(&self, data: &[u8], message: &mut dyn WireMessage) -> Result<(), CodecError>;
}

/// Binary protobuf via prost.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoCodec;

impl Codec for ProtoCodec {
    fn name(&self) -> &str {
        CODEC_NAME_PROTO
    }

    fn marshal(&self, message: &dyn WireMessage) -> Result<Vec<u8>, CodecError> {
        Ok(message.encode_binary())
    }

    fn unmarshal(&self, data: &[u8], message: &mut dyn WireMessage) -> Result<(), CodecError> {
        message
            .merge_binary(data)
            .map_err(|e| CodecError::Invalid(e.to_string()))
    }
}

/// Protobuf JSON via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        CODEC_NAME_JSON
    }

    fn marshal(&self, message: &dyn WireMessage) -> Result<Vec<u8>, CodecError> {
        message
            .encode_json()
            .map_err(|e| CodecError::Internal(e.to_string()))
    }

    fn unmarshal(&self, data: &[u8], message: &mut dyn WireMessage) -> Result<(), CodecError> {
        if data.is_empty() {
            return Err(CodecError::Invalid(
                "zero-length payload is not a valid JSON object".into(),
            ));
        }
        message
            .replace_from_json(data)
            .map_err(|e| CodecError::Invalid(e.to_string()))
    }
}

/// A shared, type-erased codec.
#[derive(Clone)]
pub struct BoxedCodec(Arc<dyn Codec>);

impl BoxedCodec {
    pub fn new<C: Codec>(codec: C) -> Self {
        BoxedCodec(Arc::new(codec))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Whether the content is binary (and so must be base64'd in a GET query).
    pub fn is_binary(&self) -> bool {
        self.name() != CODEC_NAME_JSON
    }

    /// Marshal for sending. Any failure is internal.
    pub fn marshal(&self, message: &dyn WireMessage) -> Result<Bytes, ConnectError> {
        self.0
            .marshal(message)
            .map(Bytes::from)
            .map_err(|e| ConnectError::new(Code::Internal, format!("marshal message: {e}")))
    }

    /// Unmarshal a received payload.
    pub fn unmarshal(&self, data: &[u8], message: &mut dyn WireMessage) -> Result<(), ConnectError> {
        self.0
            .unmarshal(data, message)
            .map_err(|e| ConnectError::from(e).with_context("unmarshal message"))
    }
}

impl std::fmt::Debug for BoxedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedCodec").field(&self.name()).finish()
    }
}

/// Codecs keyed by name; `proto` and `json` by default.
#[derive(Clone, Debug)]
pub struct CodecRegistry {
    entries: Vec<BoxedCodec>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
        };
        registry.register(ProtoCodec).register(JsonCodec);
        registry
    }
}

impl CodecRegistry {
    /// A registry with no codecs at all.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a codec, replacing any with the same name.
    pub fn register<C: Codec>(&mut self, codec: C) -> &mut Self {
        let codec = BoxedCodec::new(codec);
        self.entries.retain(|c| c.name() != codec.name());
        self.entries.push(codec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&BoxedCodec> {
        self.entries.iter().find(|c| c.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|c| c.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        #[prost(int64, tag = "1")]
        #[serde(default)]
        number: i64,
        #[prost(string, tag = "2")]
        #[serde(default)]
        text: String,
    }

    struct FailCodec;

    impl Codec for FailCodec {
        fn name(&self) -> &str {
            "proto"
        }

        fn marshal(&self, _: &dyn WireMessage) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Internal("boom".into()))
        }

        fn unmarshal(&self, _: &[u8], _: &mut dyn WireMessage) -> Result<(), CodecError> {
            Err(CodecError::Internal("boom".into()))
        }
    }

    #[test]
    fn test_proto_round_trip() {
        let codec = BoxedCodec::new(ProtoCodec);
        let msg = Sample {
            number: 42,
            text: "hi".into(),
        };
        let bytes = codec.marshal(&msg).unwrap();
        let mut out = Sample::default();
        codec.unmarshal(&bytes, &mut out).unwrap();
        assert_eq!(out, msg);
    }

    #[test]
    fn test_json_uses_camel_case() {
        let codec = BoxedCodec::new(JsonCodec);
        let bytes = codec
            .marshal(&Sample {
                number: 1,
                text: "a".into(),
            })
            .unwrap();
        assert_eq!(&bytes[..], br#"{"number":1,"text":"a"}"#);

        let mut out = Sample::default();
        codec.unmarshal(br#"{"text":"b"}"#, &mut out).unwrap();
        assert_eq!(out.text, "b");
        assert_eq!(out.number, 0);
    }

    #[test]
    fn test_unmarshal_errors_are_invalid_argument() {
        let mut out = Sample::default();
        let err = BoxedCodec::new(JsonCodec).unmarshal(b"{", &mut out).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        let err = BoxedCodec::new(JsonCodec).unmarshal(b"", &mut out).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        let err = BoxedCodec::new(ProtoCodec).unmarshal(&[0xff], &mut out).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_failing_codec_is_internal() {
        let codec = BoxedCodec::new(FailCodec);
        let err = codec.marshal(&Sample::default()).unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(err.to_string().ends_with(": boom"));
        let mut out = Sample::default();
        let err = codec.unmarshal(b"", &mut out).unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn test_registry_replaces_by_name() {
        let mut registry = CodecRegistry::default();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["proto", "json"]);
        registry.register(FailCodec);
        assert_eq!(registry.names().collect::<Vec<_>>(), ["json", "proto"]);
        assert!(registry.get("proto").is_some());
        assert!(registry.get("xml").is_none());
    }
}
