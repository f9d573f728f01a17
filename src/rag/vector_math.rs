use std::cmp::Ordering;

use ndarray::{Array1, Array2, ArrayView1, Axis};

use super::error::RetrievalError;

pub fn l2_norm(vector: ArrayView1<'_, f32>) -> f32 {
    vector.dot(&vector).sqrt()
}

/// Euclidean norm of every row.
pub fn row_norms(matrix: &Array2<f32>) -> Array1<f32> {
    matrix.map_axis(Axis(1), l2_norm)
}

/// Cosine of `query` against every row, given precomputed row norms.
pub fn cosine_scores(
    matrix: &Array2<f32>,
    norms: &Array1<f32>,
    query: &[f32],
) -> Result<Vec<f32>, RetrievalError> {
    if query.len() != matrix.ncols() {
        return Err(RetrievalError::DimensionMismatch {
            expected: matrix.ncols(),
            actual: query.len(),
        });
    }

    let query = ArrayView1::from(query);
    let query_norm = l2_norm(query);
    let dots = matrix.dot(&query);
    Ok(dots
        .iter()
        .zip(norms.iter())
        .map(|(dot, norm)| normalized(*dot, query_norm, *norm))
        .collect())
}

/// `(position, score)` pairs, highest first. Equal scores keep their positions' order.
pub fn rank_descending(scores: &[f32]) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
    ranked
}

fn normalized(dot: f32, left_norm: f32, right_norm: f32) -> f32 {
    let denom = left_norm * right_norm;
    if denom <= f32::EPSILON || !denom.is_finite() {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}
