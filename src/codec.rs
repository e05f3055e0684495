//! Portable text encoding of an [`EnrollmentSet`].
//!
//! Layout: `n` embeddings of 128 little-endian `f64`s, concatenated in
//! enrollment order, then base64 (standard alphabet, padded). The sample
//! count is recovered from the length alone.

use base64::{engine::general_purpose, Engine as _};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::{Embedding, EnrollmentSet, EMBEDDING_DIM};

/// Bytes occupied by one encoded embedding.
pub const EMBEDDING_BYTES: usize = EMBEDDING_DIM * std::mem::size_of::<f64>();

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("malformed profile: {reason}")]
    MalformedProfile { reason: String },
}

impl CodecError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedProfile {
            reason: reason.into(),
        }
    }
}

/// Encoded enrollment as stored by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedProfile(String);

impl EncodedProfile {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EncodedProfile {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl std::fmt::Display for EncodedProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn encode(set: &EnrollmentSet) -> EncodedProfile {
    let mut bytes = Vec::with_capacity(set.len() * EMBEDDING_BYTES);
    for embedding in set {
        for value in embedding.values() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    EncodedProfile(general_purpose::STANDARD.encode(bytes))
}

pub fn decode(profile: &EncodedProfile) -> Result<EnrollmentSet, CodecError> {
    let bytes = general_purpose::STANDARD
        .decode(profile.as_str().trim())
        .map_err(|err| CodecError::malformed(format!("invalid base64: {err}")))?;

    if bytes.len() % EMBEDDING_BYTES != 0 {
        return Err(CodecError::malformed(format!(
            "{} bytes is not a multiple of {EMBEDDING_BYTES}",
            bytes.len()
        )));
    }
    let samples = bytes.len() / EMBEDDING_BYTES;
    if samples == 0 {
        return Err(CodecError::malformed("profile holds no samples"));
    }

    let floats: Vec<f64> = bytes
        .chunks_exact(std::mem::size_of::<f64>())
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect();
    let matrix = Array2::from_shape_vec((samples, EMBEDDING_DIM), floats)
        .map_err(|err| CodecError::malformed(err.to_string()))?;

    let embeddings = matrix
        .rows()
        .into_iter()
        .map(|row| Embedding::new(row.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CodecError::malformed(err.to_string()))?;

    Ok(EnrollmentSet::from_trusted(embeddings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_set(n: usize) -> EnrollmentSet {
        let mut rng = rand::thread_rng();
        let embeddings = (0..n)
            .map(|_| {
                let values = (0..EMBEDDING_DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
                Embedding::new(values).unwrap()
            })
            .collect();
        EnrollmentSet::new(embeddings).unwrap()
    }

    #[test]
    fn round_trip_is_bit_exact() {
        for n in 5..=7 {
            let set = random_set(n);
            let decoded = decode(&encode(&set)).unwrap();
            assert_eq!(decoded.len(), n);
            for (a, b) in set.iter().zip(decoded.iter()) {
                let a_bits: Vec<u64> = a.values().iter().map(|v| v.to_bits()).collect();
                let b_bits: Vec<u64> = b.values().iter().map(|v| v.to_bits()).collect();
                assert_eq!(a_bits, b_bits);
            }
        }
    }

    #[test]
    fn encoded_length_tracks_sample_count() {
        let profile = encode(&random_set(5));
        let raw = general_purpose::STANDARD.decode(profile.as_str()).unwrap();
        assert_eq!(raw.len(), 5 * EMBEDDING_BYTES);
    }

    #[test]
    fn rejects_partial_embedding() {
        let blob = general_purpose::STANDARD.encode(vec![0u8; EMBEDDING_BYTES + 8]);
        let err = decode(&EncodedProfile::from(blob)).unwrap_err();
        assert!(matches!(err, CodecError::MalformedProfile { .. }));
    }

    #[test]
    fn rejects_empty_profile() {
        let err = decode(&EncodedProfile::from(String::new())).unwrap_err();
        assert!(matches!(err, CodecError::MalformedProfile { .. }));
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode(&EncodedProfile::from("not base64!".to_string())).unwrap_err();
        assert!(matches!(err, CodecError::MalformedProfile { .. }));
    }

    #[test]
    fn accepts_single_sample_profile() {
        let blob = general_purpose::STANDARD.encode(vec![0u8; EMBEDDING_BYTES]);
        assert_eq!(decode(&EncodedProfile::from(blob)).unwrap().len(), 1);
    }
}
