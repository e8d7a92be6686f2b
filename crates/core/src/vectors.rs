//! Small vector math helpers shared across the pipeline.
//!
//! Every vector stored in the cache or sent to the vector store is expected
//! to be unit-normalised, so cosine similarity reduces to a dot product for
//! vectors that went through [`unit_normalize`].

/// Tolerance on the unit-norm invariant
pub const NORM_TOLERANCE: f32 = 1e-6;

/// Euclidean norm
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Whether `v` satisfies the unit-norm invariant within tolerance
pub fn is_unit_norm(v: &[f32]) -> bool {
    (l2_norm(v) - 1.0).abs() <= NORM_TOLERANCE
}

/// Scale `v` to unit norm. Returns `None` for the zero vector.
pub fn unit_normalize(mut v: Vec<f32>) -> Option<Vec<f32>> {
    let norm = l2_norm(&v);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    for x in &mut v {
        *x /= norm;
    }
    Some(v)
}

/// Cosine similarity. Falls back to 0.0 for mismatched or empty inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
