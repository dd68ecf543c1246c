//! Snapshot encodings.
//!
//! Stores only see opaque bytes; the engine picks how a partition snapshot
//! becomes those bytes. JSON is readable when debugging a stuck job, bincode
//! is compact and round-trips floats bit-for-bit.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Encoding used for checkpoint payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointCodec {
    /// `serde_json`
    Json,
    /// `bincode`
    #[default]
    Bincode,
}

impl CheckpointCodec {
    /// Encode a value to bytes
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CheckpointCodec::Json => Ok(serde_json::to_vec(value)?),
            CheckpointCodec::Bincode => Ok(bincode::serialize(value)?),
        }
    }

    /// Decode a value from bytes
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            CheckpointCodec::Json => Ok(serde_json::from_slice(data)?),
            CheckpointCodec::Bincode => Ok(bincode::deserialize(data)?),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CheckpointCodec::Json => "json",
            CheckpointCodec::Bincode => "bincode",
        }
    }
}

impl FromStr for CheckpointCodec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(CheckpointCodec::Json),
            "bincode" | "binary" => Ok(CheckpointCodec::Bincode),
            other => Err(format!("unknown checkpoint codec '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Snapshot {
        values: BTreeMap<u64, f64>,
        halted: Vec<bool>,
    }

    fn sample() -> Snapshot {
        let mut values = BTreeMap::new();
        values.insert(1, 0.1 + 0.2);
        values.insert(7, 0.030000001192092896);
        Snapshot {
            values,
            halted: vec![true, false],
        }
    }

    #[test]
    fn test_bincode_preserves_floats_exactly() {
        let codec = CheckpointCodec::Bincode;
        let bytes = codec.encode(&sample()).unwrap();
        let restored: Snapshot = codec.decode(&bytes).unwrap();
        assert_eq!(restored, sample());
    }

    #[test]
    fn test_json_payload_is_readable() {
        let codec = CheckpointCodec::Json;
        let bytes = codec.encode(&sample()).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("halted"));
        let restored: Snapshot = codec.decode(&bytes).unwrap();
        assert_eq!(restored, sample());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<Snapshot> = CheckpointCodec::Json.decode(b"not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_codec_names() {
        assert_eq!("JSON".parse::<CheckpointCodec>().unwrap(), CheckpointCodec::Json);
        assert_eq!("binary".parse::<CheckpointCodec>().unwrap(), CheckpointCodec::Bincode);
        assert!("msgpack".parse::<CheckpointCodec>().is_err());
        assert_eq!(CheckpointCodec::default().name(), "bincode");
    }
}
