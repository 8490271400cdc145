//! Immutable key to bytes container used for announcement payloads.
//!
//! Every mutating operation consumes the bucket and returns a new one, so a
//! bucket that has been handed to a broker or a storage strategy can never be
//! changed behind its holder's back.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Immutable mapping of segment key to payload bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    entries: BTreeMap<String, Bytes>,
}

impl Bucket {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single pair unless the key is already present.
    #[must_use]
    pub fn try_add(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.entries.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    /// Add every pair whose key is not yet present. Existing values always win.
    #[must_use]
    pub fn try_add_range<K, V, I>(mut self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Bytes>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in pairs {
            self.entries.entry(key.into()).or_insert_with(|| value.into());
        }
        self
    }

    /// First-write-wins merge of `other` into `self`.
    #[must_use]
    pub fn merge(self, other: &Bucket) -> Self {
        self.try_add_range(other.iter().map(|(k, v)| (k.to_owned(), v.clone())))
    }

    /// Keep only the entries whose key matches `predicate`.
    #[must_use]
    pub fn filter(&self, predicate: impl Fn(&str) -> bool) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| predicate(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Drop the given keys, returning what is left.
    #[must_use]
    pub fn without<'a>(mut self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        for key in keys {
            self.entries.remove(key);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Bytes> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Bytes>> FromIterator<(K, V)> for Bucket {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new().try_add_range(iter)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_add_range_never_overwrites() {
        let bucket = Bucket::new().try_add("a", "first");
        let bucket = bucket.try_add_range([("a", "second"), ("b", "other")]);
        assert_eq!(bucket.get("a").unwrap(), &Bytes::from("first"));
        assert_eq!(bucket.get("b").unwrap(), &Bytes::from("other"));
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn merge_of_disjoint_buckets_is_the_union() {
        let left: Bucket = [("a", "1"), ("b", "2")].into_iter().collect();
        let right: Bucket = [("c", "3")].into_iter().collect();
        let merged = left.clone().merge(&right);
        assert_eq!(merged.len(), 3);
        for (k, v) in left.iter().chain(right.iter()) {
            assert_eq!(merged.get(k), Some(v));
        }
    }

    #[test]
    fn merge_keeps_the_earlier_writer() {
        let authoritative: Bucket = [("k", "store")].into_iter().collect();
        let fallback: Bucket = [("k", "cache"), ("z", "cache")].into_iter().collect();
        let merged = authoritative.merge(&fallback);
        assert_eq!(merged.get("k").unwrap(), &Bytes::from("store"));
        assert_eq!(merged.get("z").unwrap(), &Bytes::from("cache"));
    }

    #[test]
    fn filter_and_without_split_a_bucket() {
        let bucket: Bucket = [("op~a", "1"), ("op~b", "2"), ("other", "3")]
            .into_iter()
            .collect();
        let claimed = bucket.filter(|k| k.starts_with("op~"));
        assert_eq!(claimed.len(), 2);
        let rest = bucket.without(claimed.keys().collect::<Vec<_>>());
        assert_eq!(rest.keys().collect::<Vec<_>>(), vec!["other"]);
    }
}
