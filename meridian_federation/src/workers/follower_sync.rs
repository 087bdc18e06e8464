//! C9 Followers-sync worker (FEP-8fcf). Groups a local actor's accepted
//! followers by remote host and hashes each group's member IDs into a
//! digest; a digest change since the last run marks that host due for a
//! `Collection-Synchronization` header on the next delivery to it (§4.9).

use chrono::{NaiveDateTime, Utc};
use diesel::PgConnection;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::identity;
use meridian_db::models::actor::Actor;
use meridian_db::models::follow::FollowEdge;
use meridian_db::models::followers_sync::{FollowersSyncState, FollowersSyncStateForm};
use meridian_utils::{FederationSettings, MeridianError};

lazy_static::lazy_static! {
  static ref DIGEST_RE: Regex = Regex::new(r#"digest="(?P<digest>[^"]*)""#).expect("valid regex");
}

/// sha256 over the sorted, newline-joined follower canonical IDs. Order is
/// normalized before hashing so the digest depends only on membership.
fn digest_of(mut follower_ids: Vec<String>) -> String {
  follower_ids.sort();
  let mut hasher = Sha256::new();
  for id in &follower_ids {
    hasher.update(id.as_bytes());
    hasher.update(b"\n");
  }
  format!("{:x}", hasher.finalize())
}

fn group_by_host(
  followers: &[String],
) -> Result<BTreeMap<String, Vec<String>>, MeridianError> {
  let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
  for id in followers {
    let host = identity::origin(id)?;
    groups.entry(host).or_default().push(id.clone());
  }
  Ok(groups)
}

/// Refreshes sync state for a single local actor. Returns the hosts whose
/// digest changed (or whose state did not exist yet).
pub fn sync_actor(conn: &PgConnection, local_actor: &Actor, now: NaiveDateTime) -> Result<Vec<String>, MeridianError> {
  let follower_ids: Vec<String> = FollowEdge::followers_of(conn, &local_actor.canonical_id)?
    .into_iter()
    .map(|edge| edge.follower_actor_id)
    .collect();
  let groups = group_by_host(&follower_ids)?;

  let mut changed = Vec::new();
  for (host, members) in groups {
    let digest = digest_of(members);
    let existing = FollowersSyncState::find(conn, &local_actor.canonical_id, &host)?;
    let is_new_or_changed = existing.as_ref().map(|s| s.last_digest != digest).unwrap_or(true);
    FollowersSyncState::upsert(
      conn,
      &FollowersSyncStateForm {
        local_actor_id: local_actor.canonical_id.clone(),
        remote_host: host.clone(),
        last_digest: digest,
        synced_at: now,
      },
    )?;
    if is_new_or_changed {
      changed.push(host);
    }
  }
  Ok(changed)
}

/// Runs a full sweep over every local actor, refreshing sync state
/// regardless of `FollowersSyncState::due_for_sweep` staleness — the
/// interval gate belongs to the caller, which only invokes this on
/// `followers_sync_interval_secs` (§6).
pub fn run_once(conn: &PgConnection, settings: &FederationSettings) -> Result<usize, MeridianError> {
  let _ = settings;
  let now = Utc::now().naive_utc();
  let mut total_changed = 0;
  for actor in Actor::find_all_local(conn)? {
    total_changed += sync_actor(conn, &actor, now)?.len();
  }
  Ok(total_changed)
}

/// The `Collection-Synchronization` header value for a delivery to `host`
/// on behalf of `local_actor`, per FEP-8fcf: `collectionId="...", digest="..."`.
pub fn collection_sync_header_value(
  conn: &PgConnection,
  local_actor: &Actor,
  host: &str,
) -> Result<Option<String>, MeridianError> {
  let state = FollowersSyncState::find(conn, &local_actor.canonical_id, host)?;
  let followers_url = match &local_actor.followers_url {
    Some(url) => url,
    None => return Ok(None),
  };
  Ok(state.map(|s| {
    format!(
      "collectionId=\"{}\", digest=\"{}\"",
      followers_url, s.last_digest
    )
  }))
}

/// Receive side of FEP-8fcf: records the digest a remote `sender` claims
/// for our view of their followers collection, scoped by our own domain so
/// multiple local instances sharing a DB don't clobber each other's state.
/// Returns `true` when the digest changed (or is new), meaning any local
/// actor we believe follows `sender` should have its accepted status
/// re-confirmed rather than trusted as-is.
pub fn observe_inbound_digest(
  conn: &PgConnection,
  sender: &Actor,
  our_domain: &str,
  header_value: &str,
) -> Result<bool, MeridianError> {
  let digest = match DIGEST_RE.captures(header_value) {
    Some(caps) => caps["digest"].to_string(),
    None => return Ok(false),
  };
  let existing = FollowersSyncState::find(conn, &sender.canonical_id, our_domain)?;
  let changed = existing.as_ref().map(|s| s.last_digest != digest).unwrap_or(true);
  FollowersSyncState::upsert(
    conn,
    &FollowersSyncStateForm {
      local_actor_id: sender.canonical_id.clone(),
      remote_host: our_domain.to_string(),
      last_digest: digest,
      synced_at: Utc::now().naive_utc(),
    },
  )?;
  Ok(changed)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_digest_is_extracted() {
    let value = r#"collectionId="https://a.example/users/alice/followers", digest="abc123""#;
    let caps = DIGEST_RE.captures(value).unwrap();
    assert_eq!(&caps["digest"], "abc123");
  }

  #[test]
  fn test_header_without_digest_field_yields_none() {
    assert!(DIGEST_RE.captures(r#"collectionId="https://a.example/followers""#).is_none());
  }

  #[test]
  fn test_digest_is_order_independent() {
    let a = digest_of(vec!["b".to_string(), "a".to_string()]);
    let b = digest_of(vec!["a".to_string(), "b".to_string()]);
    assert_eq!(a, b);
  }

  #[test]
  fn test_digest_changes_with_membership() {
    let a = digest_of(vec!["a".to_string()]);
    let b = digest_of(vec!["a".to_string(), "b".to_string()]);
    assert_ne!(a, b);
  }

  #[test]
  fn test_group_by_host_partitions_correctly() {
    let ids = vec![
      "https://a.example/users/one".to_string(),
      "https://b.example/users/two".to_string(),
      "https://a.example/users/three".to_string(),
    ];
    let groups = group_by_host(&ids).unwrap();
    assert_eq!(groups.get("a.example").unwrap().len(), 2);
    assert_eq!(groups.get("b.example").unwrap().len(), 1);
  }
}
