use std::collections::BTreeMap;
use std::fmt;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LabelError {
    #[error("invalid label {0:?}: expected key=value")]
    Format(String),
}

/// Immutable key/value pair used as ownership predicate and watch filter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KvLabel {
    key: String,
    value: String,
}

impl KvLabel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses `key=value`. The key must be non-empty and the value must not contain `=`.
    pub fn parse(s: &str) -> Result<Self, LabelError> {
        let mut parts = s.split('=');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(k), Some(v), None) if !k.trim().is_empty() => {
                Ok(Self::new(k.trim(), v.trim()))
            }
            _ => Err(LabelError::Format(s.to_string())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_included(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key).is_some_and(|v| *v == self.value)
    }

    /// Label selector string for list/watch calls.
    pub fn selector(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for KvLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok() {
        let l = KvLabel::parse("crownlabs.polito.it/operator-selector=production")
            .unwrap();
        assert_eq!(l.key(), "crownlabs.polito.it/operator-selector");
        assert_eq!(l.value(), "production");
        assert_eq!(l.selector(), "crownlabs.polito.it/operator-selector=production");
    }

    #[test]
    fn parse_allows_empty_value() {
        let l = KvLabel::parse("k=").unwrap();
        assert_eq!(l.value(), "");
    }

    #[test]
    fn parse_rejects_bad_format() {
        for bad in ["", "novalue", "=v", "a=b=c"] {
            assert!(KvLabel::parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn inclusion_requires_matching_value() {
        let l = KvLabel::new("sel", "prod");
        let mut labels = BTreeMap::new();
        assert!(!l.is_included(&labels));
        labels.insert("sel".to_string(), "dev".to_string());
        assert!(!l.is_included(&labels));
        labels.insert("sel".to_string(), "prod".to_string());
        assert!(l.is_included(&labels));
    }
}
