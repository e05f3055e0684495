use ndarray::Array1;
use thiserror::Error;

/// Number of components in a face embedding.
pub const EMBEDDING_DIM: usize = 128;

/// Smallest enrollment that may be persisted.
pub const MIN_ENROLLED: usize = 5;

/// One sample per pose.
pub const MAX_ENROLLED: usize = 7;

#[derive(Debug, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding has {0} components, expected {EMBEDDING_DIM}")]
    WrongDimension(usize),
    #[error("an enrollment set needs at least one embedding")]
    Empty,
    #[error("an enrollment set holds at most {MAX_ENROLLED} embeddings, got {0}")]
    TooMany(usize),
}

/// A single face sample. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    vector: Array1<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::WrongDimension(values.len()));
        }
        Ok(Self {
            vector: Array1::from_vec(values),
        })
    }

    /// Widens an `f32` model output.
    pub fn from_f32(values: &[f32]) -> Result<Self, EmbeddingError> {
        Self::new(values.iter().map(|&v| f64::from(v)).collect())
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.vector
    }
}

/// Euclidean distance between two embeddings; 0 means identical.
pub fn euclidean_distance(a: &Embedding, b: &Embedding) -> f64 {
    a.vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Ordered embeddings collected for one subject.
///
/// Construction only rejects empty and oversized sets. The lower bound of
/// [`MIN_ENROLLED`] is checked where a set is about to be persisted, see
/// [`EnrollmentSet::is_persistable`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentSet {
    embeddings: Vec<Embedding>,
}

impl EnrollmentSet {
    pub fn new(embeddings: Vec<Embedding>) -> Result<Self, EmbeddingError> {
        match embeddings.len() {
            0 => Err(EmbeddingError::Empty),
            n if n > MAX_ENROLLED => Err(EmbeddingError::TooMany(n)),
            _ => Ok(Self { embeddings }),
        }
    }

    /// Callers guarantee the set is non-empty.
    pub(crate) fn from_trusted(embeddings: Vec<Embedding>) -> Self {
        Self { embeddings }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn is_persistable(&self) -> bool {
        (MIN_ENROLLED..=MAX_ENROLLED).contains(&self.len())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Embedding> {
        self.embeddings.iter()
    }
}

impl<'a> IntoIterator for &'a EnrollmentSet {
    type Item = &'a Embedding;
    type IntoIter = std::slice::Iter<'a, Embedding>;

    fn into_iter(self) -> Self::IntoIter {
        self.embeddings.iter()
    }
}

#[cfg(test)]
pub(crate) fn embedding_with(first: f64) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[0] = first;
    Embedding::new(values).unwrap()
}
