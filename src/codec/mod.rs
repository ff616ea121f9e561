//! Codec adapter: serde encoding with an optional outer compression layer.
//!
//! Values cross the disk boundary as self-describing serde_json documents,
//! so a reader needs nothing beyond the column-set factory to round-trip
//! rows and metadata. Compression wraps the encoded bytes transparently and
//! never touches the frame layout; both peers of a file must agree on the
//! [`Compression`] choice.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Default Zstd compression level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Deserialize error: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Zstd,
    Lz4,
}

/// Stateless encode/decode pair configured once per file handle.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    compression: Compression,
}

impl Codec {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let raw = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
        match self.compression {
            Compression::None => Ok(raw),
            Compression::Zstd => zstd::encode_all(&raw[..], DEFAULT_ZSTD_LEVEL)
                .map_err(|e| CodecError::Compression(e.to_string())),
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(&raw)),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self.compression {
            Compression::None => serde_json::from_slice(bytes).map_err(CodecError::Deserialize),
            Compression::Zstd => {
                let raw = zstd::decode_all(bytes)
                    .map_err(|e| CodecError::Decompression(e.to_string()))?;
                serde_json::from_slice(&raw).map_err(CodecError::Deserialize)
            }
            Compression::Lz4 => {
                let raw = lz4_flex::decompress_size_prepended(bytes)
                    .map_err(|e| CodecError::Decompression(e.to_string()))?;
                serde_json::from_slice(&raw).map_err(CodecError::Deserialize)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        id: u64,
        name: String,
        tags: Vec<String>,
    }

    fn sample() -> Sample {
        Sample {
            id: 42,
            name: "meta".to_owned(),
            tags: vec!["a".to_owned(), "b".to_owned()],
        }
    }

    #[test]
    fn roundtrip_all_compressions() {
        for compression in [Compression::None, Compression::Zstd, Compression::Lz4] {
            let codec = Codec::new(compression);
            let bytes = codec.encode(&sample()).unwrap();
            let back: Sample = codec.decode(&bytes).unwrap();
            assert_eq!(back, sample());
        }
    }

    #[test]
    fn zstd_shrinks_repetitive_payload() {
        let codec = Codec::new(Compression::Zstd);
        let plain = Codec::new(Compression::None);
        let values: Vec<u64> = std::iter::repeat(7).take(4096).collect();
        let compressed = codec.encode(&values).unwrap();
        let raw = plain.encode(&values).unwrap();
        assert!(compressed.len() < raw.len() / 4);
    }

    #[test]
    fn garbage_input_is_a_decompression_error() {
        let codec = Codec::new(Compression::Zstd);
        let err = codec.decode::<Sample>(b"not a zstd stream").unwrap_err();
        assert!(matches!(err, CodecError::Decompression(_)));
    }
}
