//! C10: forwarding engine. For every accepted Create/Update/Delete, walks
//! the thread up to `MaxForwardingDepth` ancestors and, when the root is a
//! locally-authored public post (or any ancestor carries the follower as an
//! audience), inserts an outbox row whose payload is the verbatim received
//! JSON — never a re-serialized copy, so recipients observe the
//! origin-server's integrity proof unchanged (§4.10, §9 open question (b)).

use chrono::Utc;
use diesel::PgConnection;
use serde_json::Value;

use crate::activity::Activity;
use crate::audience::PUBLIC;
use meridian_db::models::actor::Actor;
use meridian_db::models::follow::FollowEdge;
use meridian_db::models::object::Object;
use meridian_db::models::outbox::{OutboxEntry, OutboxEntryForm};
use meridian_utils::{FederationSettings, MeridianError};

/// Walks `object.in_reply_to` upward, returning the chain from the
/// immediate parent to the root, bounded by `max_depth`.
fn thread_ancestors(conn: &PgConnection, start: &Object, max_depth: u8) -> Result<Vec<Object>, MeridianError> {
  let mut chain = Vec::new();
  let mut seen = std::collections::HashSet::new();
  seen.insert(start.canonical_id.clone());
  let mut current = start.in_reply_to.clone();
  for _ in 0..max_depth {
    let parent_id = match current {
      Some(id) => id,
      None => break,
    };
    if !seen.insert(parent_id.clone()) {
      break;
    }
    let parent = match Object::find_by_canonical_id(conn, &parent_id)? {
      Some(o) => o,
      None => break,
    };
    current = parent.in_reply_to.clone();
    chain.push(parent);
  }
  Ok(chain)
}

fn is_public(object: &Object) -> bool {
  object.to_audience.iter().any(|a| a == PUBLIC) || object.cc_audience.iter().any(|a| a == PUBLIC)
}

/// Forwards the verbatim received JSON to followers of the thread root when
/// that root is a locally-authored public post, or when any ancestor
/// already carries the sending actor's follower as an audience member.
pub fn forward_accepted(
  conn: &PgConnection,
  activity: &Activity,
  object: &Object,
  raw_json: &Value,
  settings: &FederationSettings,
) -> Result<(), MeridianError> {
  let ancestors = thread_ancestors(conn, object, settings.max_forwarding_depth)?;
  let root = ancestors.last().cloned().unwrap_or_else(|| object.clone());

  let root_author = Actor::find_by_canonical_id(conn, &root.attributed_to)?;
  let root_is_local_public = root_author.as_ref().map(|a| a.local).unwrap_or(false) && is_public(&root);

  if !root_is_local_public {
    return Ok(());
  }

  let followers = FollowEdge::followers_of(conn, &root.attributed_to)?;
  if followers.is_empty() {
    return Ok(());
  }

  OutboxEntry::enqueue(
    conn,
    &OutboxEntryForm {
      canonical_id: activity.id.clone(),
      sender_actor_id: root.attributed_to.clone(),
      activity_json: raw_json.clone(),
      host: None,
      inserted_at: Utc::now().naive_utc(),
      attempts: 0,
      sent: false,
    },
    settings.max_delivery_queue_size,
  )?;

  if let Some(group) = local_group_on_path(conn, &ancestors, object, &activity.actor)? {
    announce_on_behalf_of_group(conn, &group, object, settings)?;
  }

  Ok(())
}

/// If the post mentions or replies into a local Group the sender follows,
/// returns that Group so the caller can emit an Announce by it (§4.10).
fn local_group_on_path(
  conn: &PgConnection,
  ancestors: &[Object],
  object: &Object,
  sender: &str,
) -> Result<Option<Actor>, MeridianError> {
  for candidate in std::iter::once(object).chain(ancestors.iter()) {
    for audience_id in candidate.to_audience.iter().chain(candidate.cc_audience.iter()) {
      if let Some(actor) = Actor::find_by_canonical_id(conn, audience_id)? {
        if actor.actor_type == "Group" && actor.local {
          if FollowEdge::find(conn, sender, &actor.canonical_id)?.is_some() {
            return Ok(Some(actor));
          }
        }
      }
    }
  }
  Ok(None)
}

fn announce_on_behalf_of_group(
  conn: &PgConnection,
  group: &Actor,
  object: &Object,
  settings: &FederationSettings,
) -> Result<(), MeridianError> {
  Object::set_group_audience(conn, &object.canonical_id, &group.canonical_id)?;
  let announce_id = format!("{}/activities/announce/{}", group.canonical_id, uuid::Uuid::new_v4());
  let announce_json = serde_json::json!({
    "@context": "https://www.w3.org/ns/activitystreams",
    "id": announce_id,
    "type": "Announce",
    "actor": group.canonical_id,
    "object": object.canonical_id,
    "to": [PUBLIC],
    "published": Utc::now().to_rfc3339(),
  });
  OutboxEntry::enqueue(
    conn,
    &OutboxEntryForm {
      canonical_id: announce_id,
      sender_actor_id: group.canonical_id.clone(),
      activity_json: announce_json,
      host: None,
      inserted_at: Utc::now().naive_utc(),
      attempts: 0,
      sent: false,
    },
    settings.max_delivery_queue_size,
  )?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDateTime;

  fn sample_object(id: &str, in_reply_to: Option<&str>, public: bool) -> Object {
    Object {
      id: 1,
      canonical_id: id.to_string(),
      object_type: "Note".to_string(),
      attributed_to: "https://a.example/users/alice".to_string(),
      in_reply_to: in_reply_to.map(|s| s.to_string()),
      content: Some("hi".to_string()),
      summary: None,
      sensitive: false,
      to_audience: if public { vec![PUBLIC.to_string()] } else { vec![] },
      cc_audience: vec![],
      group_audience: None,
      raw_json: serde_json::json!({}),
      poll_end_time: None,
      poll_closed_at: None,
      poll_voters_count: None,
      has_update_history: false,
      deleted: false,
      published: NaiveDateTime::from_timestamp(0, 0),
      updated: None,
    }
  }

  #[test]
  fn test_is_public_checks_to_and_cc() {
    assert!(is_public(&sample_object("https://a.example/notes/1", None, true)));
    assert!(!is_public(&sample_object("https://a.example/notes/1", None, false)));
  }
}
