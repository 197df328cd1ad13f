//! Content hashing for persisted index bundles.

use xxhash_rust::xxh3::Xxh3;

use crate::types::DocId;

/// Computes the checksum shared by both halves of a vector index bundle.
///
/// The hash covers the dimension, the identifier sequence and the raw vector data, so a
/// vectors file paired with an identity map from a different build never verifies.
#[must_use]
pub fn bundle_checksum(dimension: usize, ids: &[DocId], data: &[f32]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&(dimension as u64).to_le_bytes());
    hasher.update(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        hasher.update(&id.as_u64().to_le_bytes());
    }
    for value in data {
        hasher.update(&value.to_le_bytes());
    }
    hasher.digest()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<DocId> {
        raw.iter().copied().map(DocId::from_u64).collect()
    }

    #[test]
    fn same_content_same_checksum() {
        let data = [1.0, 0.0, 0.0, 1.0];
        assert_eq!(
            bundle_checksum(2, &ids(&[1, 2]), &data),
            bundle_checksum(2, &ids(&[1, 2]), &data)
        );
    }

    #[test]
    fn identity_order_changes_checksum() {
        let data = [1.0, 0.0, 0.0, 1.0];
        assert_ne!(
            bundle_checksum(2, &ids(&[1, 2]), &data),
            bundle_checksum(2, &ids(&[2, 1]), &data)
        );
    }

    #[test]
    fn vector_bits_change_checksum() {
        let a = [1.0, 0.0];
        let b = [1.0, -0.0];
        assert_ne!(
            bundle_checksum(2, &ids(&[1]), &a),
            bundle_checksum(2, &ids(&[1]), &b)
        );
    }
}
