//! C9 Mover worker: when a followed actor publishes `movedTo` and the
//! target actor reciprocates via `alsoKnownAs`, migrates every local
//! follower onto the new actor by issuing `Follow(new)` and `Undo(old)` on
//! their behalf, in one transaction per follower (§4.9).

use chrono::Utc;
use diesel::Connection;
use diesel::PgConnection;

use crate::audience::PUBLIC;
use meridian_db::models::actor::Actor;
use meridian_db::models::follow::{FollowEdge, FollowEdgeForm};
use meridian_db::models::outbox::{OutboxEntry, OutboxEntryForm};
use meridian_utils::{FederationSettings, MeridianError};

fn reciprocates(old: &Actor, new: &Actor) -> bool {
  new.also_known_as.iter().any(|id| id == &old.canonical_id)
}

/// Runs one migration pass: every actor with `movedTo` set, reciprocated
/// by the target, has its confirmed local followers moved over. Returns
/// the number of followers migrated.
pub fn run_once(conn: &PgConnection, settings: &FederationSettings) -> Result<usize, MeridianError> {
  let moved = Actor::find_moved(conn)?;
  let mut migrated = 0;
  for old in &moved {
    let new_id = match &old.moved_to {
      Some(id) => id.clone(),
      None => continue,
    };
    let new = match Actor::find_by_canonical_id(conn, &new_id)? {
      Some(a) => a,
      None => continue,
    };
    if !reciprocates(old, &new) {
      continue;
    }
    for edge in FollowEdge::followers_of(conn, &old.canonical_id)? {
      let follower = match Actor::find_by_canonical_id(conn, &edge.follower_actor_id)? {
        Some(a) if a.local => a,
        _ => continue,
      };
      migrate_one_follower(conn, &follower, old, &new, settings)?;
      migrated += 1;
    }
  }
  Ok(migrated)
}

fn migrate_one_follower(
  conn: &PgConnection,
  follower: &Actor,
  old: &Actor,
  new: &Actor,
  settings: &FederationSettings,
) -> Result<(), MeridianError> {
  conn.transaction(|| {
    let follow_id = format!("{}/activities/{}", follower.canonical_id, uuid::Uuid::new_v4());
    FollowEdge::upsert(
      conn,
      &FollowEdgeForm {
        follower_actor_id: follower.canonical_id.clone(),
        followed_actor_id: new.canonical_id.clone(),
        follow_activity_id: follow_id.clone(),
        accepted: Some(true),
        inserted_at: Utc::now().naive_utc(),
      },
    )?;
    FollowEdge::delete(conn, &follower.canonical_id, &old.canonical_id)?;

    if !new.local {
      let follow_json = serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": follow_id,
        "type": "Follow",
        "actor": follower.canonical_id,
        "object": new.canonical_id,
      });
      OutboxEntry::enqueue(
        conn,
        &OutboxEntryForm {
          canonical_id: follow_id,
          sender_actor_id: follower.canonical_id.clone(),
          activity_json: follow_json,
          host: None,
          inserted_at: Utc::now().naive_utc(),
          attempts: 0,
          sent: false,
        },
        settings.max_delivery_queue_size,
      )?;
    }

    if !old.local {
      let undo_id = format!("{}/activities/{}", follower.canonical_id, uuid::Uuid::new_v4());
      let undo_json = serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": undo_id,
        "type": "Undo",
        "actor": follower.canonical_id,
        "object": {
          "id": format!("{}/activities/undo-source/{}", follower.canonical_id, uuid::Uuid::new_v4()),
          "type": "Follow",
          "actor": follower.canonical_id,
          "object": old.canonical_id,
        },
      });
      OutboxEntry::enqueue(
        conn,
        &OutboxEntryForm {
          canonical_id: undo_id,
          sender_actor_id: follower.canonical_id.clone(),
          activity_json: undo_json,
          host: None,
          inserted_at: Utc::now().naive_utc(),
          attempts: 0,
          sent: false,
        },
        settings.max_delivery_queue_size,
      )?;
    }
    Ok(())
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDateTime;

  fn actor(id: &str, moved_to: Option<&str>, also_known_as: Vec<&str>, local: bool) -> Actor {
    Actor {
      id: 1,
      canonical_id: id.to_string(),
      preferred_username: None,
      host: "example.test".to_string(),
      actor_type: "Person".to_string(),
      inbox_url: format!("{}/inbox", id),
      shared_inbox_url: None,
      followers_url: None,
      public_key_pem: None,
      ed25519_multikey: None,
      private_key_pem: None,
      private_ed25519_key: None,
      moved_to: moved_to.map(|s| s.to_string()),
      also_known_as: also_known_as.into_iter().map(|s| s.to_string()).collect(),
      manually_approves_followers: false,
      suspended: false,
      icon_url: None,
      gateways: vec![],
      local,
      last_refreshed_at: NaiveDateTime::from_timestamp(0, 0),
      last_refresh_failed_at: None,
      published: NaiveDateTime::from_timestamp(0, 0),
      updated: None,
    }
  }

  #[test]
  fn test_reciprocates_requires_also_known_as_back_reference() {
    let old = actor("https://a.example/users/alice", Some("https://b.example/users/alice2"), vec![], true);
    let new_ok = actor("https://b.example/users/alice2", None, vec!["https://a.example/users/alice"], true);
    let new_missing = actor("https://b.example/users/alice2", None, vec![], true);
    assert!(reciprocates(&old, &new_ok));
    assert!(!reciprocates(&old, &new_missing));
    let _ = PUBLIC;
  }
}
