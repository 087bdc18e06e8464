//! Wire types for activities, per §3 "Activity" and §9's polymorphic
//! `Object` field design note. Grounded on the `activitystreams`/
//! `activitystreams-ext` crates the teacher already depends on for the
//! envelope shape, generalized to the closed activity-type set and the
//! tagged-sum `object` field this spec requires (the teacher's own
//! `activitystreams` crate models `object` as a single concrete type per
//! activity kind, not as a sum).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audience::Audience;
use meridian_utils::{MeridianError, MeridianErrorKind};

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

/// The closed set named in §3 "Activity". Unknown types are rejected by
/// `ActivityType`'s `Deserialize` impl rather than accepted as a catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
  Create,
  Follow,
  Accept,
  Reject,
  Undo,
  Delete,
  Announce,
  Update,
  Move,
  Like,
  Dislike,
  EmojiReact,
  Add,
  Remove,
}

impl ActivityType {
  pub fn as_str(self) -> &'static str {
    match self {
      ActivityType::Create => "Create",
      ActivityType::Follow => "Follow",
      ActivityType::Accept => "Accept",
      ActivityType::Reject => "Reject",
      ActivityType::Undo => "Undo",
      ActivityType::Delete => "Delete",
      ActivityType::Announce => "Announce",
      ActivityType::Update => "Update",
      ActivityType::Move => "Move",
      ActivityType::Like => "Like",
      ActivityType::Dislike => "Dislike",
      ActivityType::EmojiReact => "EmojiReact",
      ActivityType::Add => "Add",
      ActivityType::Remove => "Remove",
    }
  }
}

/// The tagged sum a `to`/`cc`/`object`-bearing wire field can hold: a nested
/// activity, a nested object, or a bare string link. Deserialization tries
/// `Activity` first, then `Object`, then a plain string; an unrecognized
/// shape rejects the whole enclosing activity (§9).
#[derive(Debug, Clone)]
pub enum ObjectField {
  Activity(Box<Activity>),
  Object(Box<ObjectDoc>),
  Link(String),
}

impl Serialize for ObjectField {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      ObjectField::Activity(a) => a.serialize(serializer),
      ObjectField::Object(o) => o.serialize(serializer),
      ObjectField::Link(s) => s.serialize(serializer),
    }
  }
}

impl<'de> Deserialize<'de> for ObjectField {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let value = Value::deserialize(deserializer)?;
    ObjectField::from_value(value).map_err(serde::de::Error::custom)
  }
}

impl ObjectField {
  pub fn from_value(value: Value) -> Result<Self, MeridianError> {
    match &value {
      Value::String(s) => return Ok(ObjectField::Link(s.clone())),
      Value::Object(_) => {}
      other => return Err(malformed(format!("object field has unsupported shape: {}", other))),
    }
    if let Ok(activity) = serde_json::from_value::<Activity>(value.clone()) {
      return Ok(ObjectField::Activity(Box::new(activity)));
    }
    if let Ok(object) = serde_json::from_value::<ObjectDoc>(value.clone()) {
      return Ok(ObjectField::Object(Box::new(object)));
    }
    Err(malformed("object field matches neither Activity nor Object shape"))
  }

  pub fn id(&self) -> Option<&str> {
    match self {
      ObjectField::Activity(a) => Some(&a.id),
      ObjectField::Object(o) => Some(&o.id),
      ObjectField::Link(s) => Some(s),
    }
  }

  pub fn is_nested_activity(&self) -> bool {
    matches!(self, ObjectField::Activity(_))
  }
}

/// Accepts RFC-3339 and the `2006-01-02T15:04:05-0700` variant named in §6.
pub fn parse_wire_timestamp(raw: &str) -> Result<DateTime<Utc>, MeridianError> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Ok(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
    return Ok(dt.with_timezone(&Utc));
  }
  Err(malformed(format!("unparseable timestamp {:?}", raw)))
}

pub fn naive_utc(dt: DateTime<Utc>) -> NaiveDateTime {
  dt.naive_utc()
}

pub fn from_naive_utc(naive: NaiveDateTime) -> DateTime<Utc> {
  Utc.from_utc_datetime(&naive)
}

/// A single `tag` entry (mention, hashtag, emoji); §6 "tag accepts a single
/// object or an array".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
  #[serde(rename = "type")]
  pub tag_type: String,
  pub name: Option<String>,
  pub href: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Tags(pub Vec<Tag>);

impl Serialize for Tags {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.0.serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for Tags {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
      One(Tag),
      Many(Vec<Tag>),
    }
    let raw = OneOrMany::deserialize(deserializer)?;
    Ok(Tags(match raw {
      OneOrMany::One(t) => vec![t],
      OneOrMany::Many(v) => v,
    }))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
  pub id: String,
  #[serde(rename = "type")]
  pub activity_type: ActivityType,
  pub actor: String,
  pub object: Option<ObjectField>,
  #[serde(default)]
  pub to: Audience,
  #[serde(default)]
  pub cc: Audience,
  pub published: Option<String>,
  #[serde(default)]
  pub proof: Option<Value>,
}

impl Activity {
  pub fn object_id(&self) -> Option<&str> {
    self.object.as_ref().and_then(|o| o.id())
  }

  pub fn object_is_nested_activity(&self) -> bool {
    self.object.as_ref().map(|o| o.is_nested_activity()).unwrap_or(false)
  }
}

/// §3 "Object": note, page, article, question, tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDoc {
  pub id: String,
  #[serde(rename = "type")]
  pub object_type: String,
  #[serde(rename = "attributedTo")]
  pub attributed_to: Option<String>,
  #[serde(rename = "inReplyTo")]
  pub in_reply_to: Option<String>,
  pub content: Option<String>,
  pub summary: Option<String>,
  #[serde(default)]
  pub sensitive: bool,
  #[serde(default)]
  pub to: Audience,
  #[serde(default)]
  pub cc: Audience,
  pub published: Option<String>,
  pub updated: Option<String>,
  #[serde(rename = "endTime")]
  pub end_time: Option<String>,
  #[serde(rename = "oneOf")]
  pub one_of: Option<Vec<PollOption>>,
  #[serde(rename = "anyOf")]
  pub any_of: Option<Vec<PollOption>>,
  #[serde(default)]
  pub tag: Tags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
  pub name: String,
  #[serde(default)]
  pub replies: PollReplies,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollReplies {
  #[serde(rename = "totalItems", default)]
  pub total_items: u32,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_object_field_string_link() {
    let field = ObjectField::from_value(json!("https://a.example/notes/1")).unwrap();
    assert_eq!(field.id(), Some("https://a.example/notes/1"));
    assert!(!field.is_nested_activity());
  }

  #[test]
  fn test_object_field_nested_object() {
    let field = ObjectField::from_value(json!({
      "id": "https://a.example/notes/1",
      "type": "Note",
      "content": "hi"
    }))
    .unwrap();
    assert!(!field.is_nested_activity());
    assert_eq!(field.id(), Some("https://a.example/notes/1"));
  }

  #[test]
  fn test_object_field_nested_activity() {
    let field = ObjectField::from_value(json!({
      "id": "https://a.example/activities/1",
      "type": "Follow",
      "actor": "https://a.example/users/alice",
    }))
    .unwrap();
    assert!(field.is_nested_activity());
  }

  #[test]
  fn test_object_field_rejects_unknown_shape() {
    assert!(ObjectField::from_value(json!(42)).is_err());
  }

  #[test]
  fn test_activity_rejects_unknown_type() {
    let result: Result<Activity, _> = serde_json::from_value(json!({
      "id": "https://a.example/activities/1",
      "type": "FooBarBaz",
      "actor": "https://a.example/users/alice",
    }));
    assert!(result.is_err());
  }

  #[test]
  fn test_parse_wire_timestamp_both_variants() {
    assert!(parse_wire_timestamp("2024-01-01T00:00:00Z").is_ok());
    assert!(parse_wire_timestamp("2024-01-01T00:00:00-0700").is_ok());
    assert!(parse_wire_timestamp("not-a-date").is_err());
  }

  #[test]
  fn test_tags_single_object_and_array() {
    let single: Tags = serde_json::from_value(json!({"type": "Mention", "name": "@bob", "href": "https://b.example/users/bob"})).unwrap();
    assert_eq!(single.0.len(), 1);
    let many: Tags = serde_json::from_value(json!([
      {"type": "Mention", "name": "@bob"},
      {"type": "Hashtag", "name": "#rust"}
    ]))
    .unwrap();
    assert_eq!(many.0.len(), 2);
  }

  #[test]
  fn test_activity_full_round_trip() {
    let json_value = json!({
      "id": "https://a.example/activities/1",
      "type": "Create",
      "actor": "https://a.example/users/alice",
      "object": {"id": "https://a.example/notes/1", "type": "Note", "content": "hi"},
      "to": "https://www.w3.org/ns/activitystreams#Public",
    });
    let activity: Activity = serde_json::from_value(json_value).unwrap();
    assert_eq!(activity.activity_type, ActivityType::Create);
    assert!(activity.to.contains_public());
    assert_eq!(activity.object_id(), Some("https://a.example/notes/1"));
  }
}
