//! C9 Poller worker: closes `Question` objects whose `poll_end_time` has
//! passed, tallying replies against the option list and republishing the
//! result as an `Update` for polls authored locally (§4.5 edge case
//! "poll closure").

use chrono::{NaiveDateTime, Utc};
use diesel::PgConnection;
use std::collections::HashMap;

use meridian_db::models::actor::Actor;
use meridian_db::models::object::Object;
use meridian_db::models::outbox::{OutboxEntry, OutboxEntryForm};
use meridian_utils::{FederationSettings, MeridianError};

fn option_names(raw: &serde_json::Value, field: &str) -> Vec<String> {
  raw
    .get(field)
    .and_then(|v| v.as_array())
    .map(|items| {
      items
        .iter()
        .filter_map(|item| item.get("name").and_then(|n| n.as_str()).map(str::to_string))
        .collect()
    })
    .unwrap_or_default()
}

fn reply_choice(reply: &Object) -> Option<String> {
  reply
    .raw_json
    .get("name")
    .and_then(|v| v.as_str())
    .map(str::to_string)
    .or_else(|| reply.content.clone())
}

/// Tallies votes from `replies` against the poll's `oneOf`/`anyOf` option
/// names and returns the updated option array with refreshed `replies.totalItems`.
fn tally(raw: &serde_json::Value, replies: &[Object]) -> (serde_json::Value, i32) {
  let (field, is_one_of) = if raw.get("oneOf").is_some() {
    ("oneOf", true)
  } else {
    ("anyOf", false)
  };
  let _ = is_one_of;
  let names = option_names(raw, field);
  let mut counts: HashMap<String, i32> = names.iter().map(|n| (n.clone(), 0)).collect();
  let mut distinct_voters: std::collections::HashSet<String> = std::collections::HashSet::new();
  for reply in replies {
    if let Some(choice) = reply_choice(reply) {
      if let Some(count) = counts.get_mut(&choice) {
        *count += 1;
        distinct_voters.insert(reply.attributed_to.clone());
      }
    }
  }

  let mut updated = raw.clone();
  if let Some(options) = updated.get_mut(field).and_then(|v| v.as_array_mut()) {
    for option in options.iter_mut() {
      if let Some(name) = option.get("name").and_then(|n| n.as_str()).map(str::to_string) {
        let count = counts.get(&name).copied().unwrap_or(0);
        option["replies"] = serde_json::json!({"type": "Collection", "totalItems": count});
      }
    }
  }
  (updated, distinct_voters.len() as i32)
}

/// Closes one poll: tallies its replies, stamps `poll_closed_at`, and for a
/// locally authored poll enqueues the republished `Update`. Returns whether
/// the poll had a local author (and so was broadcast).
fn close_one(
  conn: &PgConnection,
  poll: &Object,
  now: NaiveDateTime,
  settings: &FederationSettings,
) -> Result<bool, MeridianError> {
  let replies = Object::replies_to(conn, &poll.canonical_id)?;
  let (updated_raw, voters_count) = tally(&poll.raw_json, &replies);
  let closed = Object::apply_poll_closure(conn, poll, updated_raw.clone(), voters_count, now)?;

  let author = Actor::find_by_canonical_id(conn, &poll.attributed_to)?;
  let is_local = author.as_ref().map(|a| a.local).unwrap_or(false);
  if !is_local {
    return Ok(false);
  }

  let update_id = format!("{}/activities/poll-close/{}", poll.attributed_to, uuid::Uuid::new_v4());
  let update_json = serde_json::json!({
    "@context": "https://www.w3.org/ns/activitystreams",
    "id": update_id,
    "type": "Update",
    "actor": poll.attributed_to,
    "to": closed.to_audience,
    "cc": closed.cc_audience,
    "object": updated_raw,
  });
  OutboxEntry::enqueue(
    conn,
    &OutboxEntryForm {
      canonical_id: update_id,
      sender_actor_id: poll.attributed_to.clone(),
      activity_json: update_json,
      host: None,
      inserted_at: now,
      attempts: 0,
      sent: false,
    },
    settings.max_delivery_queue_size,
  )?;
  Ok(true)
}

/// Runs one sweep: every poll whose `poll_end_time` has passed and is not
/// yet closed. Returns the number closed.
pub fn close_due_polls(conn: &PgConnection, settings: &FederationSettings) -> Result<usize, MeridianError> {
  let now = Utc::now().naive_utc();
  let due = Object::due_for_poll_closure(conn, now)?;
  let mut closed = 0;
  for poll in &due {
    close_one(conn, poll, now, settings)?;
    closed += 1;
  }
  Ok(closed)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tally_counts_matching_replies() {
    let raw = serde_json::json!({
      "oneOf": [{"name": "yes"}, {"name": "no"}],
    });
    let reply = Object {
      id: 1,
      canonical_id: "https://a.example/objects/r1".to_string(),
      object_type: "Note".to_string(),
      attributed_to: "https://a.example/users/voter".to_string(),
      in_reply_to: Some("https://a.example/objects/poll".to_string()),
      content: None,
      summary: None,
      sensitive: false,
      to_audience: vec![],
      cc_audience: vec![],
      group_audience: None,
      raw_json: serde_json::json!({"name": "yes"}),
      poll_end_time: None,
      poll_closed_at: None,
      poll_voters_count: None,
      has_update_history: false,
      deleted: false,
      published: NaiveDateTime::from_timestamp(0, 0),
      updated: None,
    };
    let (updated, voters) = tally(&raw, &[reply]);
    assert_eq!(voters, 1);
    let options = updated.get("oneOf").unwrap().as_array().unwrap();
    let yes = options.iter().find(|o| o["name"] == "yes").unwrap();
    assert_eq!(yes["replies"]["totalItems"], 1);
    let no = options.iter().find(|o| o["name"] == "no").unwrap();
    assert_eq!(no["replies"]["totalItems"], 0);
  }

  #[test]
  fn test_tally_ignores_unmatched_choice() {
    let raw = serde_json::json!({"anyOf": [{"name": "red"}]});
    let (_updated, voters) = tally(&raw, &[]);
    assert_eq!(voters, 0);
  }
}
