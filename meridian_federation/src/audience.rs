//! Ordered-unique-set audience serde (`to`/`cc`), accepting either a single
//! string or an array on the wire and always marshaling back out as an
//! array, per spec §8 "Audience serialization" and the GLOSSARY's
//! "Audience" entry.

use serde::de::{Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// An ordered set of recipient IDs with no duplicates, preserving first-seen
/// order the way the wire form lists them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(Vec<String>);

impl Audience {
  pub fn new() -> Self {
    Audience(Vec::new())
  }

  pub fn from_iter_unique(values: impl IntoIterator<Item = String>) -> Self {
    let mut set = Audience::new();
    for v in values {
      set.push(v);
    }
    set
  }

  pub fn push(&mut self, value: String) {
    if !self.0.contains(&value) {
      self.0.push(value);
    }
  }

  pub fn contains_public(&self) -> bool {
    self.0.iter().any(|v| v == PUBLIC)
  }

  pub fn as_slice(&self) -> &[String] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn into_vec(self) -> Vec<String> {
    self.0
  }
}

impl Serialize for Audience {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.0.serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Audience {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
      One(String),
      Many(Vec<String>),
    }
    let raw = OneOrMany::deserialize(deserializer).map_err(|e| DeError::custom(format!("invalid audience: {}", e)))?;
    let values = match raw {
      OneOrMany::One(s) => vec![s],
      OneOrMany::Many(v) => v,
    };
    Ok(Audience::from_iter_unique(values))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_single_string_deserializes_to_one_element_array() {
    let a: Audience = serde_json::from_value(json!("https://a.example/users/alice")).unwrap();
    assert_eq!(a.as_slice(), &["https://a.example/users/alice".to_string()]);
  }

  #[test]
  fn test_array_deserializes_unchanged_order() {
    let a: Audience = serde_json::from_value(json!(["b", "a", "b"])).unwrap();
    assert_eq!(a.as_slice(), &["b".to_string(), "a".to_string()]);
  }

  #[test]
  fn test_marshal_round_trip_single_becomes_array() {
    let a: Audience = serde_json::from_value(json!("x")).unwrap();
    let back = serde_json::to_value(&a).unwrap();
    assert_eq!(back, json!(["x"]));
  }

  #[test]
  fn test_empty_audience_marshals_to_empty_array() {
    let a = Audience::new();
    assert_eq!(serde_json::to_value(&a).unwrap(), json!([]));
  }

  #[test]
  fn test_contains_public_sentinel() {
    let a: Audience = serde_json::from_value(json!([PUBLIC, "https://a.example/users/bob"])).unwrap();
    assert!(a.contains_public());
  }

  #[test]
  fn test_push_deduplicates() {
    let mut a = Audience::new();
    a.push("x".to_string());
    a.push("x".to_string());
    assert_eq!(a.len(), 1);
  }
}
