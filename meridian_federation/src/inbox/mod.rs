//! C5: inbound queue & processor. Grounded on the teacher's `apub::inbox`
//! submodule for the overall shape (one function per activity kind behind a
//! dispatch table) and on `mitra_activitypub`'s queue-worker loop for the
//! FIFO-by-id, per-activity-transaction processing model.

pub mod handlers;

use diesel::PgConnection;
use serde_json::Value;
use std::collections::HashSet;

use crate::activity::{Activity, ActivityType};
use crate::forwarding;
use crate::identity::{self, OriginCheck};
use meridian_db::models::actor::Actor;
use meridian_db::DbPool;
use meridian_utils::{FederationSettings, MeridianError, MeridianErrorKind};

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

/// A no-op marker the caller can treat as "already processed, do nothing
/// further" — every branch below is idempotent: re-processing the same
/// (activity id, sender) after a first successful commit changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Processed;

fn origin_check<'a>(activity: &'a Activity, domain: &'a str) -> OriginCheck<'a> {
  let nested_follow_id = match &activity.object {
    Some(crate::activity::ObjectField::Activity(a)) if a.activity_type == ActivityType::Follow => Some(a.id.as_str()),
    Some(crate::activity::ObjectField::Link(s)) => Some(s.as_str()),
    _ => None,
  };
  OriginCheck {
    activity_id: &activity.id,
    activity_type: match activity.activity_type {
      ActivityType::Create => "Create",
      ActivityType::Update => "Update",
      ActivityType::Delete => "Delete",
      ActivityType::Accept => "Accept",
      ActivityType::Reject => "Reject",
      ActivityType::Announce => "Announce",
      ActivityType::Undo => "Undo",
      ActivityType::Follow => "Follow",
      ActivityType::Move => "Move",
      ActivityType::Like => "Like",
      ActivityType::Dislike => "Dislike",
      ActivityType::EmojiReact => "EmojiReact",
      ActivityType::Add => "Add",
      ActivityType::Remove => "Remove",
    },
    actor_id: &activity.actor,
    object_id: activity.object_id(),
    object_attributed_to: match &activity.object {
      Some(crate::activity::ObjectField::Object(o)) => o.attributed_to.as_deref(),
      _ => None,
    },
    object_is_nested_activity: activity.object_is_nested_activity(),
    nested_follow_id,
    domain,
  }
}

/// `ProcessActivity(tx, senderActor, activity, rawJSON, depth, shared)`.
/// Guard: `depth <= MaxActivityDepth`. Dispatches on `activity.type`
/// per §4.5; recurses for `Announce(Activity)` and `Undo`'s unwrapped inner
/// activity (origin validation only — Undo's own handling doesn't recurse
/// into `handlers`, per §4.5).
pub fn process_activity(
  conn: &PgConnection,
  sender: &Actor,
  activity: &Activity,
  raw_json: &Value,
  depth: u8,
  shared: bool,
  domain: &str,
  settings: &FederationSettings,
) -> Result<Processed, MeridianError> {
  if depth > settings.max_activity_depth {
    return Err(MeridianError::with_kind(
      anyhow::anyhow!("activity nesting exceeds MaxActivityDepth ({})", settings.max_activity_depth),
      MeridianErrorKind::AuthorizationFailure,
    ));
  }
  if activity.actor != sender.canonical_id {
    return Err(MeridianError::with_kind(
      anyhow::anyhow!(
        "activity.actor {:?} does not match the authenticated sender {:?}",
        activity.actor,
        sender.canonical_id
      ),
      MeridianErrorKind::AuthorizationFailure,
    ));
  }
  identity::validate_origin(&origin_check(activity, domain), depth, settings.max_activity_depth)?;

  match activity.activity_type {
    ActivityType::Create => {
      let inserted = handlers::handle_create(conn, activity, raw_json, shared, settings)?;
      if let Some(object) = inserted {
        forwarding::forward_accepted(conn, activity, &object, raw_json, settings)?;
      }
    }
    ActivityType::Update => {
      let updated = handlers::handle_update(conn, activity, raw_json)?;
      forwarding::forward_accepted(conn, activity, &updated, raw_json, settings)?;
    }
    ActivityType::Delete => {
      if let Some(object) = handlers::handle_delete(conn, activity)? {
        forwarding::forward_accepted(conn, activity, &object, raw_json, settings)?;
      }
    }
    ActivityType::Follow => {
      let followed_id = activity.object_id().ok_or_else(|| malformed("Follow requires an object id"))?;
      let followed_local = Actor::find_by_canonical_id(conn, followed_id)?;
      let sender_is_remote = !sender.local;
      let followed_local_ref = followed_local.as_ref();
      handlers::handle_follow(conn, activity, followed_local_ref, sender_is_remote)?;
      // The Accept is queued by the caller (server layer) once it observes
      // `accepted == Some(true)` on the returned edge, using the followed
      // actor's Ed25519 key for the integrity proof (§4.5) — queuing an
      // outbound activity belongs to C6, not C5.
    }
    ActivityType::Accept => handlers::handle_accept_reject(conn, activity, true)?,
    ActivityType::Reject => handlers::handle_accept_reject(conn, activity, false)?,
    ActivityType::Undo => handlers::handle_undo(conn, activity)?,
    ActivityType::Announce => {
      if let Some(inner) = handlers::handle_announce(conn, activity)? {
        process_activity(conn, sender, inner, raw_json, depth + 1, true, domain, settings)?;
      }
    }
    ActivityType::Move => {
      // Recorded but not acted upon here; the Mover worker (§4.9) handles
      // migration out of band.
    }
    ActivityType::Like | ActivityType::Dislike | ActivityType::EmojiReact | ActivityType::Add | ActivityType::Remove => {
      // Logged and discarded (§4.5).
      log::debug!("discarding logged-only activity {:?} from {}", activity.activity_type, activity.actor);
    }
  }

  Ok(Processed)
}

/// The dedup set `blocking`-wrapped callers should maintain across a batch
/// drain so a crash mid-batch cannot double-forward within the same tick;
/// durable idempotency itself comes from each handler's upsert/guard logic.
pub fn dedup_within_batch(seen: &mut HashSet<(String, String)>, activity: &Activity) -> bool {
  seen.insert((activity.id.clone(), activity.actor.clone()))
}

pub async fn drain_batch(
  pool: &DbPool,
  domain: String,
  settings: FederationSettings,
  batch_size: i64,
) -> Result<usize, MeridianError> {
  use meridian_db::models::inbox_queue::InboxQueueEntry;

  let entries = meridian_db::blocking(pool, move |conn| InboxQueueEntry::next_batch(conn, batch_size)).await??;
  let mut processed = 0usize;
  for entry in entries {
    let pool = pool.clone();
    let domain = domain.clone();
    let settings = settings.clone();
    let result: Result<(), MeridianError> = meridian_db::blocking(&pool, move |conn| {
      let activity: Activity = serde_json::from_value(entry.activity_json.clone())
        .map_err(|e| malformed(format!("queued activity no longer parses: {}", e)))?;
      let sender = Actor::find_by_canonical_id(conn, &entry.sender_actor_id)?
        .ok_or_else(|| malformed(format!("sender {:?} vanished from cache", entry.sender_actor_id)))?;
      process_activity(conn, &sender, &activity, &entry.activity_json, 0, entry.shared, &domain, &settings)?;
      meridian_db::models::inbox_queue::InboxQueueEntry::delete(conn, entry.id)?;
      Ok(())
    })
    .await?;
    result?;
    processed += 1;
  }

  meridian_db::blocking(pool, move |conn| {
    meridian_db::models::inbox_queue::InboxQueueEntry::shed_oldest_tenth(conn, settings.max_activities_queue_size as i64)
  })
  .await??;

  Ok(processed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::audience::Audience;

  fn sample_activity() -> Activity {
    Activity {
      id: "https://a.example/activities/1".to_string(),
      activity_type: ActivityType::Follow,
      actor: "https://a.example/users/alice".to_string(),
      object: Some(crate::activity::ObjectField::Link("https://b.example/users/bob".to_string())),
      to: Audience::new(),
      cc: Audience::new(),
      published: None,
      proof: None,
    }
  }

  #[test]
  fn test_dedup_within_batch_rejects_repeat() {
    let mut seen = HashSet::new();
    let activity = sample_activity();
    assert!(dedup_within_batch(&mut seen, &activity));
    assert!(!dedup_within_batch(&mut seen, &activity));
  }

  #[test]
  fn test_origin_check_extracts_nested_follow_id_for_accept() {
    let mut activity = sample_activity();
    activity.activity_type = ActivityType::Accept;
    activity.object = Some(crate::activity::ObjectField::Link("https://a.example/activities/9".to_string()));
    let check = origin_check(&activity, "a.example");
    assert_eq!(check.nested_follow_id, Some("https://a.example/activities/9"));
  }
}
