//! Payload fingerprints for change detection.
//!
//! A fingerprint is a cheap, deterministic summary of a payload. The
//! synchronizer compares the fingerprint of each fetched payload against
//! the stored one and skips the state update when they match, so unchanged
//! polls never disturb consumers.
//!
//! Fingerprints are deliberate approximations, not structural equality.
//! Each use site must document what "equal" means for it (e.g. "equal if
//! session count and the ordered ids of the first 5 sessions match").

use std::sync::Arc;

use serde::Serialize;

/// Sentinel fingerprint for absent or structurally-unexpected payloads.
///
/// Fingerprint functions fail closed: anything they cannot summarize maps
/// here rather than erroring.
pub const EMPTY_FINGERPRINT: &str = "empty";

/// Fingerprint function supplied per data kind at synchronizer construction.
pub type FingerprintFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Hash raw bytes into a short hex fingerprint.
pub fn digest(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hash.to_hex()[..16].to_string()
}

/// Fingerprint a slice by its length plus an identifier drawn from a
/// bounded prefix of items.
///
/// Two slices fingerprint equal when their lengths match and the ids of
/// the first `prefix` items match; items past the prefix are deliberately
/// ignored. This bounds cost on large collections.
pub fn prefix_ids<T, F>(items: &[T], prefix: usize, id: F) -> String
where
    F: Fn(&T) -> String,
{
    if items.is_empty() {
        return EMPTY_FINGERPRINT.to_string();
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(&(items.len() as u64).to_le_bytes());
    for item in items.iter().take(prefix) {
        hasher.update(id(item).as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex()[..16].to_string()
}

/// Fingerprint any serializable value by hashing its JSON form.
///
/// Full traversal — prefer [`prefix_ids`] for large collections. Values
/// that fail to serialize map to [`EMPTY_FINGERPRINT`].
pub fn of_serializable<T: Serialize>(value: &T) -> String {
    match serde_json::to_vec(value) {
        Ok(bytes) => digest(&bytes),
        Err(_) => EMPTY_FINGERPRINT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_slice_maps_to_sentinel() {
        let items: Vec<String> = vec![];
        assert_eq!(prefix_ids(&items, 5, |s| s.clone()), EMPTY_FINGERPRINT);
    }

    #[test]
    fn test_prefix_ids_detects_length_change() {
        let a = vec!["x", "y"];
        let b = vec!["x", "y", "z"];
        assert_ne!(
            prefix_ids(&a, 5, |s| s.to_string()),
            prefix_ids(&b, 5, |s| s.to_string())
        );
    }

    #[test]
    fn test_prefix_ids_detects_id_change_within_prefix() {
        let a = vec!["x", "y", "z"];
        let b = vec!["x", "q", "z"];
        assert_ne!(
            prefix_ids(&a, 5, |s| s.to_string()),
            prefix_ids(&b, 5, |s| s.to_string())
        );
    }

    #[test]
    fn test_prefix_ids_ignores_change_past_prefix() {
        // Same length, same first two ids — the third is past the prefix
        // and intentionally invisible.
        let a = vec!["x", "y", "z"];
        let b = vec!["x", "y", "w"];
        assert_eq!(
            prefix_ids(&a, 2, |s| s.to_string()),
            prefix_ids(&b, 2, |s| s.to_string())
        );
    }

    #[test]
    fn test_prefix_ids_is_stable() {
        let items = vec!["a", "b", "c"];
        let first = prefix_ids(&items, 5, |s| s.to_string());
        let second = prefix_ids(&items, 5, |s| s.to_string());
        assert_eq!(first, second);
    }

    #[test]
    fn test_digest_is_short_hex() {
        let fp = digest(b"payload");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_of_serializable_fails_closed() {
        // JSON map keys must be strings; a tuple key cannot serialize.
        let mut bad: HashMap<(u8, u8), u32> = HashMap::new();
        bad.insert((1, 2), 3);
        assert_eq!(of_serializable(&bad), EMPTY_FINGERPRINT);
    }

    #[test]
    fn test_of_serializable_distinguishes_values() {
        assert_ne!(of_serializable(&3u32), of_serializable(&5u32));
        assert_eq!(of_serializable(&3u32), of_serializable(&3u32));
    }
}
