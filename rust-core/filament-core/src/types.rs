//! # Parameter Collections
//!
//! Ordered, multi-valued name/value storage used for path parameters,
//! query strings and form bodies.
//!
//! Insertion order is preserved and a name may appear more than once;
//! [`Params::get`] returns the first value, [`Params::get_all`] every value.

use std::fmt;

/// Ordered multi-map of string parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    /// Create an empty parameter set
    #[must_use]
    pub const fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Parse an `application/x-www-form-urlencoded` string (query or form body)
    #[must_use]
    pub fn parse(input: &[u8]) -> Self {
        let pairs = url::form_urlencoded::parse(input)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    /// Append a value under `name`
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// First value bound to `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value bound to `name`, in insertion order
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether `name` has at least one value
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == name)
    }

    /// Iterate over all pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of stored pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Check if no pairs are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Remove every pair, keeping the allocation
    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Collapse into a JSON object; repeated names become arrays
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.pairs {
            let value = serde_json::Value::String(v.clone());
            match map.get_mut(k) {
                Some(serde_json::Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = serde_json::Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(k.clone(), value);
                }
            }
        }
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish();
        f.write_str(&encoded)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string_simple() {
        let params = Params::parse(b"page=1&limit=10");
        assert_eq!(params.get("page"), Some("1"));
        assert_eq!(params.get("limit"), Some("10"));
    }

    #[test]
    fn test_parse_query_string_url_encoded() {
        let params = Params::parse(b"name=John+Doe&city=New%20York");
        assert_eq!(params.get("name"), Some("John Doe"));
        assert_eq!(params.get("city"), Some("New York"));
    }

    #[test]
    fn test_multi_valued() {
        let params = Params::parse(b"tag=a&tag=b&other=c");
        assert_eq!(params.get("tag"), Some("a"));
        assert_eq!(params.get_all("tag"), vec!["a", "b"]);
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_empty() {
        let params = Params::parse(b"");
        assert!(params.is_empty());
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_to_value_groups_repeats() {
        let params = Params::parse(b"a=1&a=2&b=3");
        let value = params.to_value();
        assert_eq!(value["a"], serde_json::json!(["1", "2"]));
        assert_eq!(value["b"], serde_json::json!("3"));
    }

    #[test]
    fn test_display_round_trips_encoding() {
        let params: Params = [("q", "a b"), ("x", "1")].into_iter().collect();
        assert_eq!(params.to_string(), "q=a+b&x=1");
    }
}
