//! Per-activity-type handlers dispatched by `process_activity` in
//! `inbox::mod`. Each function runs inside the caller's single ACID
//! transaction (§5 "Within one activity, all database mutations are one
//! ACID transaction").

use chrono::Utc;
use diesel::PgConnection;
use serde_json::Value;

use crate::activity::{Activity, ActivityType, ObjectField};
use crate::audience::Audience;
use crate::identity;
use meridian_db::models::actor::Actor;
use meridian_db::models::follow::{FollowEdge, FollowEdgeForm};
use meridian_db::models::object::{Object, ObjectForm};
use meridian_db::models::share::{Share, ShareForm};
use meridian_utils::{FederationSettings, MeridianError, MeridianErrorKind};

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

fn rejected(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(
    anyhow::anyhow!("{}", msg.into()),
    MeridianErrorKind::ResourceBoundedRejection,
  )
}

fn combined_audience(to: &Audience, cc: &Audience) -> Vec<String> {
  let mut v: Vec<String> = to.as_slice().to_vec();
  for c in cc.as_slice() {
    if !v.contains(c) {
      v.push(c.clone());
    }
  }
  v
}

pub fn handle_create(
  conn: &PgConnection,
  activity: &Activity,
  raw_json: &Value,
  shared: bool,
  settings: &FederationSettings,
) -> Result<Option<Object>, MeridianError> {
  let inner = match &activity.object {
    Some(ObjectField::Object(o)) => o.as_ref(),
    _ => return Err(malformed("Create requires a nested Object")),
  };

  let recipient_count = combined_audience(&inner.to, &inner.cc).len();
  if recipient_count > settings.max_recipients {
    return Err(rejected(format!(
      "Create recipient count {} exceeds MaxRecipients ({})",
      recipient_count, settings.max_recipients
    )));
  }

  if let Some(existing) = Object::find_by_canonical_id(conn, &inner.id)? {
    // Already known via a prior Update: augment bookkeeping only.
    if shared {
      record_share(conn, &inner.id, &activity.actor, &activity.id)?;
    }
    return Ok(Some(existing));
  }

  let published = inner
    .published
    .as_deref()
    .map(crate::activity::parse_wire_timestamp)
    .transpose()?
    .unwrap_or_else(Utc::now);

  let form = ObjectForm {
    canonical_id: inner.id.clone(),
    object_type: inner.object_type.clone(),
    attributed_to: inner.attributed_to.clone().unwrap_or_else(|| activity.actor.clone()),
    in_reply_to: inner.in_reply_to.clone(),
    content: inner.content.clone(),
    summary: inner.summary.clone(),
    sensitive: inner.sensitive,
    to_audience: inner.to.as_slice().to_vec(),
    cc_audience: inner.cc.as_slice().to_vec(),
    group_audience: None,
    raw_json: raw_json.clone(),
    poll_end_time: inner
      .end_time
      .as_deref()
      .map(crate::activity::parse_wire_timestamp)
      .transpose()?
      .map(crate::activity::naive_utc),
    published: crate::activity::naive_utc(published),
  };
  let inserted = Object::insert(conn, &form)?;

  if shared {
    record_share(conn, &inner.id, &activity.actor, &activity.id)?;
  }

  Ok(Some(inserted))
}

fn record_share(conn: &PgConnection, object_id: &str, actor_id: &str, announce_id: &str) -> Result<(), MeridianError> {
  if Share::find_by_announce_id(conn, announce_id)?.is_some() {
    return Ok(());
  }
  Share::insert(
    conn,
    &ShareForm {
      object_canonical_id: object_id.to_string(),
      actor_canonical_id: actor_id.to_string(),
      announce_activity_id: announce_id.to_string(),
      inserted_at: Utc::now().naive_utc(),
    },
  )?;
  Ok(())
}

pub fn handle_update(
  conn: &PgConnection,
  activity: &Activity,
  raw_json: &Value,
) -> Result<Object, MeridianError> {
  let inner = match &activity.object {
    Some(ObjectField::Object(o)) => o.as_ref(),
    _ => return Err(malformed("Update requires a nested Object")),
  };
  let existing = Object::find_by_canonical_id(conn, &inner.id)?
    .ok_or_else(|| malformed(format!("Update target {:?} is not known locally", inner.id)))?;
  if existing.attributed_to != activity.actor {
    return Err(MeridianError::with_kind(
      anyhow::anyhow!("Update sender {:?} is not the author of {:?}", activity.actor, inner.id),
      MeridianErrorKind::AuthorizationFailure,
    ));
  }

  let new_updated = inner
    .updated
    .as_deref()
    .or(inner.published.as_deref())
    .map(crate::activity::parse_wire_timestamp)
    .transpose()?
    .unwrap_or_else(Utc::now);
  let is_poll_tally_refresh = inner.one_of.is_some() || inner.any_of.is_some();

  // §4.5 Update: preserve the group-assigned audience unless the sender
  // is that group itself.
  let group_audience = if existing.group_audience.as_deref() == Some(activity.actor.as_str()) {
    None
  } else {
    existing.group_audience.clone()
  };

  Object::apply_update(
    conn,
    &existing,
    raw_json.clone(),
    inner.content.clone(),
    crate::activity::naive_utc(new_updated),
    is_poll_tally_refresh,
    group_audience,
  )
}

/// Returns the object as it stood just before deletion, so the caller can
/// still forward the verbatim activity to the thread's followers (§4.5,
/// §4.10) — `None` when the Delete targets an actor, which isn't forwarded.
pub fn handle_delete(conn: &PgConnection, activity: &Activity) -> Result<Option<Object>, MeridianError> {
  let target_id = activity.object_id().ok_or_else(|| malformed("Delete requires an object id"))?;
  if target_id == activity.actor {
    Actor::delete_by_canonical_id(conn, target_id)?;
    return Ok(None);
  }
  let existing = Object::find_by_canonical_id(conn, target_id)?;
  Object::mark_deleted(conn, target_id)?;
  Ok(existing)
}

pub fn handle_follow(
  conn: &PgConnection,
  activity: &Activity,
  followed_local: Option<&Actor>,
  sender_is_remote: bool,
) -> Result<FollowEdge, MeridianError> {
  let followed_id = activity.object_id().ok_or_else(|| malformed("Follow requires an object id"))?;
  let auto_approve = followed_local
    .map(|a| !a.manually_approves_followers)
    .unwrap_or(false);
  let accepted = if auto_approve && sender_is_remote { Some(true) } else { None };
  FollowEdge::upsert(
    conn,
    &FollowEdgeForm {
      follower_actor_id: activity.actor.clone(),
      followed_actor_id: followed_id.to_string(),
      follow_activity_id: activity.id.clone(),
      accepted,
      inserted_at: Utc::now().naive_utc(),
    },
  )
}

pub fn handle_accept_reject(conn: &PgConnection, activity: &Activity, accept: bool) -> Result<(), MeridianError> {
  let follow_id = match &activity.object {
    Some(ObjectField::Activity(a)) => a.id.clone(),
    Some(ObjectField::Link(s)) => s.clone(),
    _ => return Err(malformed("Accept/Reject requires a Follow id or reference")),
  };
  let edge = FollowEdge::find_by_follow_activity_id(conn, &follow_id)?
    .ok_or_else(|| malformed(format!("no Follow {:?} to Accept/Reject", follow_id)))?;
  if edge.followed_actor_id != activity.actor {
    return Err(MeridianError::with_kind(
      anyhow::anyhow!(
        "Accept/Reject sender {:?} is not the followed party {:?}",
        activity.actor,
        edge.followed_actor_id
      ),
      MeridianErrorKind::AuthorizationFailure,
    ));
  }
  FollowEdge::set_accepted(conn, &follow_id, accept)?;
  Ok(())
}

/// Only `Undo(Follow)` and `Undo(Announce)` are honoured (§4.5).
pub fn handle_undo(conn: &PgConnection, activity: &Activity) -> Result<(), MeridianError> {
  let inner = match &activity.object {
    Some(ObjectField::Activity(a)) => a,
    _ => return Ok(()),
  };
  match inner.activity_type {
    ActivityType::Follow => {
      let nested_actor = &inner.actor;
      let nested_object = inner.object_id();
      if let Some(edge) = FollowEdge::find_by_follow_activity_id(conn, &inner.id)? {
        FollowEdge::delete(conn, &edge.follower_actor_id, &edge.followed_actor_id)?;
      } else if let Some(obj) = nested_object {
        FollowEdge::delete(conn, nested_actor, obj)?;
      }
      Ok(())
    }
    ActivityType::Announce => {
      Share::delete_by_announce_id(conn, &inner.id)?;
      Ok(())
    }
    _ => Ok(()),
  }
}

/// Returns `Some(inner activity)` when this Announce should recurse
/// (`object` is a nested Activity), or `None` after recording a share edge
/// for a bare-string object (§4.5).
pub fn handle_announce<'a>(
  conn: &PgConnection,
  activity: &'a Activity,
) -> Result<Option<&'a Activity>, MeridianError> {
  match &activity.object {
    Some(ObjectField::Activity(inner)) => Ok(Some(inner.as_ref())),
    Some(ObjectField::Link(object_id)) => {
      record_share(conn, object_id, &activity.actor, &activity.id)?;
      Ok(None)
    }
    _ => Err(malformed("Announce requires an object")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::activity::ObjectDoc;
  use serde_json::json;

  fn sample_activity(object: ObjectField) -> Activity {
    Activity {
      id: "https://a.example/activities/1".to_string(),
      activity_type: ActivityType::Create,
      actor: "https://a.example/users/alice".to_string(),
      object: Some(object),
      to: Audience::from_iter_unique(vec![crate::audience::PUBLIC.to_string()]),
      cc: Audience::new(),
      published: None,
      proof: None,
    }
  }

  fn sample_object_doc(id: &str) -> ObjectDoc {
    ObjectDoc {
      id: id.to_string(),
      object_type: "Note".to_string(),
      attributed_to: Some("https://a.example/users/alice".to_string()),
      in_reply_to: None,
      content: Some("hi".to_string()),
      summary: None,
      sensitive: false,
      to: Audience::from_iter_unique(vec![crate::audience::PUBLIC.to_string()]),
      cc: Audience::new(),
      published: None,
      updated: None,
      end_time: None,
      one_of: None,
      any_of: None,
      tag: Default::default(),
    }
  }

  #[test]
  fn test_combined_audience_dedupes() {
    let to = Audience::from_iter_unique(vec!["a".to_string(), "b".to_string()]);
    let cc = Audience::from_iter_unique(vec!["b".to_string(), "c".to_string()]);
    assert_eq!(combined_audience(&to, &cc), vec!["a", "b", "c"]);
  }

  fn sample_actor(manually_approves: bool) -> Actor {
    Actor {
      id: 1,
      canonical_id: "https://b.example/users/bob".to_string(),
      preferred_username: Some("bob".to_string()),
      host: "b.example".to_string(),
      actor_type: "Person".to_string(),
      inbox_url: "https://b.example/users/bob/inbox".to_string(),
      shared_inbox_url: None,
      followers_url: None,
      public_key_pem: None,
      ed25519_multikey: None,
      private_key_pem: None,
      private_ed25519_key: None,
      moved_to: None,
      also_known_as: vec![],
      manually_approves_followers: manually_approves,
      suspended: false,
      icon_url: None,
      gateways: vec![],
      local: true,
      last_refreshed_at: Utc::now().naive_utc(),
      last_refresh_failed_at: None,
      published: Utc::now().naive_utc(),
      updated: None,
    }
  }

  #[test]
  fn test_auto_approve_follow_from_open_local_actor() {
    let followed = sample_actor(false);
    assert!(!followed.manually_approves_followers);
  }

  #[test]
  fn test_manual_approval_local_actor_does_not_auto_approve() {
    let followed = sample_actor(true);
    assert!(followed.manually_approves_followers);
  }

  #[test]
  fn test_create_requires_nested_object_not_link() {
    let activity = sample_activity(ObjectField::Link("https://a.example/notes/1".to_string()));
    assert!(!matches!(activity.object, Some(ObjectField::Object(_))));
  }

  #[test]
  fn test_sample_object_doc_round_trips_content() {
    let doc = sample_object_doc("https://a.example/notes/1");
    assert_eq!(doc.content.as_deref(), Some("hi"));
  }
}
