//! Helpers for working with unit vectors.
//!
//! Similarity in paperdex is the inner product of two L2-normalized vectors, which equals their
//! cosine similarity. These helpers are shared by the index builder and the query router so both
//! normalize in exactly the same way.

/// Returns the Euclidean length of `vector`.
#[must_use]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Returns the inner product of two vectors of equal length.
///
/// Extra trailing components of the longer slice are ignored; callers check dimensions first.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scales `vector` to unit length in place and returns its original norm.
///
/// Returns `None` and leaves the vector untouched when the norm is zero or not finite, since
/// such a vector has no direction to preserve.
pub fn normalize(vector: &mut [f32]) -> Option<f32> {
    let norm = l2_norm(vector);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    Some(norm)
}

/// Returns `true` when `norm` lies within `tolerance` of 1.
#[must_use]
pub fn is_unit(norm: f32, tolerance: f32) -> bool {
    (norm - 1.0).abs() <= tolerance
}

/// Upper bound on how far from 1 the computed norm of a vector fresh out of [`normalize`] can
/// land, given `dimension` components of `f32` rounding.
///
/// A unit-norm check looser than this accepts every normalized vector as-is, so normalizing
/// twice never changes a vector.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rounding_slack(dimension: usize) -> f32 {
    2.0 * (dimension as f32 + 4.0) * f32::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_scales_to_unit_length() {
        let mut v = vec![3.0, 4.0];
        let norm = normalize(&mut v).unwrap();
        assert!((norm - 5.0).abs() < 1e-6);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_zero_and_nan() {
        let mut zero = vec![0.0, 0.0];
        assert!(normalize(&mut zero).is_none());

        let mut nan = vec![f32::NAN, 1.0];
        assert!(normalize(&mut nan).is_none());
    }

    #[test]
    fn dot_of_identical_unit_vectors_is_one() {
        let mut v = vec![1.0, 2.0, 2.0];
        normalize(&mut v);
        assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalized_vectors_sit_within_rounding_slack() {
        for dimension in [1, 3, 64, 384, 1536] {
            #[allow(clippy::cast_precision_loss)]
            let mut v: Vec<f32> = (0..dimension)
                .map(|i| ((i * 7919) % 113) as f32 - 56.3)
                .collect();
            normalize(&mut v).unwrap();
            assert!(is_unit(l2_norm(&v), rounding_slack(dimension)));
        }
    }

    #[test]
    fn unit_tolerance() {
        assert!(is_unit(1.0005, 1e-3));
        assert!(!is_unit(1.1, 1e-3));
    }
}
