use dashmap::DashMap;

use crate::{
    codec::{canonical_bytes, CodecError, ValueCodec},
    types::{EncodedValue, PlainValue},
};

/// Memoizes codec output keyed by the canonical plaintext form.
///
/// Entries are never evicted. Swapping the key through [`EncodeCache::rekey`]
/// drops every entry, so a cached value always equals a fresh `encode` under
/// the current key.
#[derive(Debug)]
pub struct EncodeCache {
    codec: ValueCodec,
    entries: DashMap<Vec<u8>, EncodedValue>,
}

impl EncodeCache {
    pub fn new(codec: ValueCodec) -> Self {
        Self {
            codec,
            entries: DashMap::new(),
        }
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Insert-if-absent: concurrent first encodes of one value agree on a
    /// single entry since the shard lock is held while the codec runs.
    pub fn encode_cached(&self, value: &PlainValue) -> Result<EncodedValue, CodecError> {
        let key = canonical_bytes(value)?;
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.value().clone());
        }
        let entry = self
            .entries
            .entry(key)
            .or_try_insert_with(|| self.codec.encode(value))?;
        Ok(entry.value().clone())
    }

    pub fn decode(&self, encoded: &EncodedValue) -> Result<PlainValue, CodecError> {
        self.codec.decode(encoded)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Replaces the key configuration and invalidates the whole cache.
    pub fn rekey(&mut self, codec: ValueCodec) {
        self.entries.clear();
        self.codec = codec;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn cache(key: &str) -> EncodeCache {
        EncodeCache::new(ValueCodec::new(key).unwrap())
    }

    #[test]
    fn cached_value_matches_fresh_encode() {
        let cache = cache("cache-key");
        let value = PlainValue::Number(44);
        let first = cache.encode_cached(&value).unwrap();
        let second = cache.encode_cached(&value).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, cache.codec().encode(&value).unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn number_and_text_get_separate_entries() {
        let cache = cache("cache-key");
        let number = cache.encode_cached(&PlainValue::Number(1)).unwrap();
        let text = cache.encode_cached(&PlainValue::Text("1".into())).unwrap();
        assert_ne!(number, text);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn rekey_invalidates_entries() {
        let mut cache = cache("old-key");
        let value = PlainValue::Text("hypertension".into());
        let before = cache.encode_cached(&value).unwrap();
        let next = ValueCodec::new("new-key").unwrap();
        let expected = next.encode(&value).unwrap();
        cache.rekey(next);
        assert!(cache.is_empty());
        let after = cache.encode_cached(&value).unwrap();
        assert_ne!(before, after);
        assert_eq!(after, expected);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = cache("cache-key");
        cache.encode_cached(&PlainValue::Number(3)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_first_encodes_converge() {
        let cache = Arc::new(cache("shared"));
        let results: Vec<EncodedValue> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = Arc::clone(&cache);
                    scope.spawn(move || {
                        (18..=80)
                            .map(|age: i64| cache.encode_cached(&PlainValue::Number(age)).unwrap())
                            .last()
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.len(), 63);
    }
}
