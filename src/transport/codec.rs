//! Message codecs.
//!
//! A codec is passed to transports as an explicit `Arc<dyn Codec>` handle;
//! implementations are stateless and shared freely across tasks.

use super::protocol::ClusterMessage;
use crate::config::CodecKind;
use crate::error::CodecError;
use std::sync::Arc;

pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, message: &ClusterMessage) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<ClusterMessage, CodecError>;
}

/// Compact binary codec used on the wire by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode(&self, message: &ClusterMessage) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(message).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<ClusterMessage, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Human-readable codec, handy when sniffing traffic.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, message: &ClusterMessage) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<ClusterMessage, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

pub fn codec_for(kind: CodecKind) -> Arc<dyn Codec> {
    match kind {
        CodecKind::Bincode => Arc::new(BincodeCodec),
        CodecKind::Json => Arc::new(JsonCodec),
    }
}
