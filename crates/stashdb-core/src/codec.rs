//! Array payload codec
//!
//! Serializes a single [`NdArray`] into the opaque byte payload handed to
//! the blob store, and back. The payload is a CBOR map:
//!
//! ```text
//! { "v": 1, "dtype": "f64", "shape": [2, 3], "data": h'...' }
//! ```
//!
//! `data` holds the little-endian element bytes. Encoding is deterministic
//! and `decode(encode(a)) == a` for every array. Compression and chunking
//! are left to the blob store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::array::{DType, NdArray};

/// Payload format version written by [`encode`]
pub const CODEC_VERSION: u8 = 1;

/// Errors from encoding or decoding an array payload
#[derive(Error, Debug)]
pub enum CodecError {
    /// Input is not a well-formed payload (not CBOR, truncated, wrong fields)
    #[error("Malformed array payload: {0}")]
    Malformed(String),

    /// Payload written by a newer codec
    #[error("Unsupported array payload version {0}")]
    UnsupportedVersion(u8),

    /// Element type name not recognized
    #[error("Unknown array dtype '{0}'")]
    UnknownDType(String),

    /// Element count does not fit in memory
    #[error("Array shape {shape:?} is too large")]
    ShapeOverflow { shape: Vec<usize> },

    /// Element data does not match shape and dtype
    #[error("Array of dtype {dtype} and shape {shape:?} needs {expected} bytes, got {actual}")]
    SizeMismatch {
        dtype: DType,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    v: u8,
    dtype: &'a str,
    shape: Vec<u64>,
    #[serde(with = "serde_bytes")]
    data: &'a [u8],
}

#[derive(Deserialize)]
struct Payload {
    v: u8,
    dtype: String,
    shape: Vec<u64>,
    data: serde_bytes::ByteBuf,
}

/// Encode an array into a blob payload
pub fn encode(array: &NdArray) -> Result<Vec<u8>, CodecError> {
    let payload = PayloadRef {
        v: CODEC_VERSION,
        dtype: array.dtype().name(),
        shape: array.shape().iter().map(|&d| d as u64).collect(),
        data: array.as_bytes(),
    };

    let mut out = Vec::with_capacity(array.nbytes() + 32);
    ciborium::into_writer(&payload, &mut out)
        .map_err(|e| CodecError::Malformed(format!("{:?}", e)))?;
    Ok(out)
}

/// Decode a blob payload back into an array
pub fn decode(bytes: &[u8]) -> Result<NdArray, CodecError> {
    let payload: Payload =
        ciborium::from_reader(bytes).map_err(|e| CodecError::Malformed(format!("{:?}", e)))?;

    if payload.v != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion(payload.v));
    }

    let dtype =
        DType::from_name(&payload.dtype).ok_or(CodecError::UnknownDType(payload.dtype))?;

    let shape = payload
        .shape
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| CodecError::Malformed("shape dimension exceeds usize".to_string()))?;

    NdArray::from_raw(dtype, shape, payload.data.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_float() {
        let arr = NdArray::from_vec(vec![1.0f64, 2.0, 3.0]);
        let bytes = encode(&arr).unwrap();
        assert_eq!(decode(&bytes).unwrap(), arr);
    }

    #[test]
    fn test_roundtrip_preserves_shape_and_dtype() {
        let arr = NdArray::from_shape_vec(vec![2, 2, 2], (0..8).collect::<Vec<i16>>()).unwrap();
        let decoded = decode(&encode(&arr).unwrap()).unwrap();
        assert_eq!(decoded.dtype(), DType::I16);
        assert_eq!(decoded.shape(), &[2, 2, 2]);
        assert_eq!(decoded.to_vec::<i16>().unwrap(), (0..8).collect::<Vec<i16>>());
    }

    #[test]
    fn test_roundtrip_empty_and_bool() {
        let empty = NdArray::from_vec(Vec::<f32>::new());
        assert_eq!(decode(&encode(&empty).unwrap()).unwrap(), empty);

        let flags = NdArray::from_bools(&[true, true, false]);
        assert_eq!(decode(&encode(&flags).unwrap()).unwrap(), flags);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let arr = NdArray::from_vec(vec![42u32, 7]);
        assert_eq!(encode(&arr).unwrap(), encode(&arr).unwrap());
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = encode(&NdArray::from_vec(vec![1.0f64; 16])).unwrap();
        let err = decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_garbage_payload() {
        assert!(matches!(decode(b"").unwrap_err(), CodecError::Malformed(_)));
        assert!(matches!(
            decode(b"definitely not cbor").unwrap_err(),
            CodecError::Malformed(_)
        ));
    }

    fn raw_payload(v: u8, dtype: &str, shape: Vec<u64>, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ciborium::into_writer(
            &PayloadRef {
                v,
                dtype,
                shape,
                data,
            },
            &mut out,
        )
        .unwrap();
        out
    }

    #[test]
    fn test_unknown_dtype() {
        let bytes = raw_payload(CODEC_VERSION, "c128", vec![1], &[0; 16]);
        assert!(matches!(decode(&bytes).unwrap_err(), CodecError::UnknownDType(d) if d == "c128"));
    }

    #[test]
    fn test_unsupported_version() {
        let bytes = raw_payload(9, "u8", vec![1], &[0]);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            CodecError::UnsupportedVersion(9)
        ));
    }

    #[test]
    fn test_inconsistent_data_length() {
        let bytes = raw_payload(CODEC_VERSION, "f64", vec![3], &[0; 16]);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            CodecError::SizeMismatch {
                expected: 24,
                actual: 16,
                ..
            }
        ));
    }
}
