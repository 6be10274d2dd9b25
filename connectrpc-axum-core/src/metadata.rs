//! Case-insensitive, multi-valued metadata shared by requests, responses and trailers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

/// An ordered multimap from lowercase key to a list of string values.
///
/// Keys are normalized to lowercase on insertion so lookups are case-insensitive.
/// Iteration order over distinct keys follows first-insertion order. Keys ending
/// in `-bin` carry raw bytes transmitted as base64; see [`Metadata::insert_bin`]
/// and [`Metadata::get_bin`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    // Vec instead of a HashMap to preserve insertion order without pulling in
    // an extra indexmap dependency.
    entries: Vec<(String, Vec<String>)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(key: &str) -> String {
        key.to_ascii_lowercase()
    }

    fn position(&self, key: &str) -> Option<usize> {
        let key = Self::normalize(key);
        self.entries.iter().position(|(k, _)| *k == key)
    }

    /// Appends a value, creating the key's entry if it doesn't exist yet.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref();
        match self.position(key) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((Self::normalize(key), vec![value.into()])),
        }
    }

    /// Replaces all values for `key` with a single value.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref();
        match self.position(key) {
            Some(idx) => self.entries[idx].1 = vec![value.into()],
            None => self.entries.push((Self::normalize(key), vec![value.into()])),
        }
    }

    /// Inserts a binary value under a `-bin` suffixed key, base64-encoding it.
    ///
    /// Panics in debug builds if `key` doesn't already end in `-bin`; callers
    /// are expected to pass the full binary key name.
    pub fn insert_bin(&mut self, key: impl AsRef<str>, value: &[u8]) {
        debug_assert!(key.as_ref().ends_with("-bin"), "binary metadata keys must end in -bin");
        self.insert(key, STANDARD_NO_PAD.encode(value));
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key)
            .and_then(|idx| self.entries[idx].1.first())
            .map(String::as_str)
    }

    /// All values for `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> &[String] {
        match self.position(key) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    /// Decodes the first `-bin` value for `key`.
    pub fn get_bin(&self, key: &str) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.get(key).map(|v| STANDARD_NO_PAD.decode(v))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.position(key).map(|idx| self.entries.remove(idx).1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over `(key, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Merges another metadata map into this one, appending values.
    pub fn extend(&mut self, other: Metadata) {
        for (key, values) in other.entries {
            for value in values {
                self.insert(&key, value);
            }
        }
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

impl From<&http::HeaderMap> for Metadata {
    /// Converts an `http::HeaderMap` into `Metadata`, preserving multi-value
    /// headers and insertion order. Values that aren't valid UTF-8 are skipped.
    fn from(headers: &http::HeaderMap) -> Self {
        let mut metadata = Metadata::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                metadata.insert(name.as_str(), value);
            }
        }
        metadata
    }
}

impl TryFrom<&Metadata> for http::HeaderMap {
    type Error = http::header::InvalidHeaderName;

    /// Converts `Metadata` into an `http::HeaderMap`, emitting one header line
    /// per value so multi-valued keys survive the round trip.
    fn try_from(metadata: &Metadata) -> Result<Self, Self::Error> {
        let mut headers = http::HeaderMap::new();
        for (key, values) in metadata.iter() {
            let name = http::header::HeaderName::try_from(key)?;
            for value in values {
                if let Ok(value) = http::header::HeaderValue::from_str(value) {
                    headers.append(name.clone(), value);
                }
            }
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut md = Metadata::new();
        md.insert("X-Custom-Header", "value");
        assert_eq!(md.get("x-custom-header"), Some("value"));
        assert_eq!(md.get("X-CUSTOM-HEADER"), Some("value"));
    }

    #[test]
    fn insert_appends_multiple_values() {
        let mut md = Metadata::new();
        md.insert("accept", "gzip");
        md.insert("accept", "br");
        assert_eq!(md.get_all("accept"), &["gzip".to_string(), "br".to_string()]);
    }

    #[test]
    fn set_replaces_existing_values() {
        let mut md = Metadata::new();
        md.insert("x", "a");
        md.insert("x", "b");
        md.set("x", "c");
        assert_eq!(md.get_all("x"), &["c".to_string()]);
    }

    #[test]
    fn bin_values_round_trip_through_base64() {
        let mut md = Metadata::new();
        let raw = [0xab, 0xab, 0xab];
        md.insert_bin("x-grpc-test-echo-trailing-bin", &raw);
        let decoded = md.get_bin("x-grpc-test-echo-trailing-bin").unwrap().unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut md = Metadata::new();
        md.insert("z", "1");
        md.insert("a", "2");
        md.insert("m", "3");
        let keys: Vec<&str> = md.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn extend_merges_without_clobbering() {
        let mut md = Metadata::new();
        md.insert("x", "1");
        let mut other = Metadata::new();
        other.insert("x", "2");
        other.insert("y", "3");
        md.extend(other);
        assert_eq!(md.get_all("x"), &["1".to_string(), "2".to_string()]);
        assert_eq!(md.get("y"), Some("3"));
    }
}
