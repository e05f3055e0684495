use crate::embedding::Embedding;

/// Distances below this mark a repeat of an already captured pose.
pub const UNIQUENESS_THRESHOLD: f64 = 0.35;

/// Whether `candidate` differs enough from every accepted sample.
pub fn is_unique<F>(candidate: &Embedding, accepted: &[Embedding], distance_fn: F) -> bool
where
    F: Fn(&Embedding, &Embedding) -> f64,
{
    is_unique_with(candidate, accepted, distance_fn, UNIQUENESS_THRESHOLD)
}

pub fn is_unique_with<F>(
    candidate: &Embedding,
    accepted: &[Embedding],
    distance_fn: F,
    threshold: f64,
) -> bool
where
    F: Fn(&Embedding, &Embedding) -> f64,
{
    accepted
        .iter()
        .all(|existing| distance_fn(candidate, existing) >= threshold)
}

/// `1 - mean distance` to the accepted samples, `None` for the first sample.
pub fn uniqueness_score<F>(candidate: &Embedding, accepted: &[Embedding], distance_fn: F) -> Option<f64>
where
    F: Fn(&Embedding, &Embedding) -> f64,
{
    if accepted.is_empty() {
        return None;
    }
    let total: f64 = accepted
        .iter()
        .map(|existing| distance_fn(candidate, existing))
        .sum();
    Some(1.0 - total / accepted.len() as f64)
}
