//! C11: portable-actor gateway replication. When a portable local actor
//! delivers, every HTTPS gateway it advertises gets an identical outbox
//! row addressed to its corresponding inbox, preserving the path suffix
//! after the `did:key:` segment, so followers reachable only through that
//! gateway still receive the activity carrying the same integrity proof
//! (§4.11).

use crate::identity;
use meridian_db::models::actor::Actor;
use meridian_utils::MeridianError;

/// The HTTPS inbox URL on each of `actor`'s advertised gateways. Empty for
/// non-portable actors or ones advertising no gateways.
pub fn gateway_inbox_urls(actor: &Actor) -> Result<Vec<String>, MeridianError> {
  if !identity::is_portable(&actor.canonical_id) {
    return Ok(Vec::new());
  }
  let inbox_canonical = identity::canonicalize(&actor.inbox_url)?;
  actor
    .gateways
    .iter()
    .map(|host| identity::gateway(host, &inbox_canonical).map(|u| u.to_string()))
    .collect()
}

/// The HTTPS followers-collection URL on each gateway, for recipients that
/// address the collection directly rather than going through `to`/`cc`
/// expansion.
pub fn gateway_followers_urls(actor: &Actor) -> Result<Vec<String>, MeridianError> {
  let followers_url = match &actor.followers_url {
    Some(url) => url,
    None => return Ok(Vec::new()),
  };
  if !identity::is_portable(followers_url) {
    return Ok(Vec::new());
  }
  let canonical = identity::canonicalize(followers_url)?;
  actor
    .gateways
    .iter()
    .map(|host| identity::gateway(host, &canonical).map(|u| u.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::NaiveDateTime;

  fn portable_actor(gateways: Vec<&str>) -> Actor {
    let did = "ap://did:key:z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6";
    Actor {
      id: 1,
      canonical_id: format!("{}/actor", did),
      preferred_username: None,
      host: "a.example".to_string(),
      actor_type: "Person".to_string(),
      inbox_url: format!("{}/inbox", did),
      shared_inbox_url: None,
      followers_url: Some(format!("{}/followers", did)),
      public_key_pem: None,
      ed25519_multikey: None,
      private_key_pem: None,
      private_ed25519_key: None,
      moved_to: None,
      also_known_as: vec![],
      manually_approves_followers: false,
      suspended: false,
      icon_url: None,
      gateways: gateways.into_iter().map(|s| s.to_string()).collect(),
      local: true,
      last_refreshed_at: NaiveDateTime::from_timestamp(0, 0),
      last_refresh_failed_at: None,
      published: NaiveDateTime::from_timestamp(0, 0),
      updated: None,
    }
  }

  #[test]
  fn test_gateway_inbox_urls_preserves_suffix() {
    let actor = portable_actor(vec!["b.example"]);
    let urls = gateway_inbox_urls(&actor).unwrap();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].starts_with("https://b.example/.well-known/apgateway/did:key:"));
    assert!(urls[0].ends_with("/inbox"));
  }

  #[test]
  fn test_gateway_inbox_urls_empty_for_non_portable() {
    let mut actor = portable_actor(vec!["b.example"]);
    actor.canonical_id = "https://a.example/users/alice".to_string();
    assert!(gateway_inbox_urls(&actor).unwrap().is_empty());
  }

  #[test]
  fn test_gateway_followers_urls_preserves_suffix() {
    let actor = portable_actor(vec!["b.example", "c.example"]);
    let urls = gateway_followers_urls(&actor).unwrap();
    assert_eq!(urls.len(), 2);
    assert!(urls.iter().all(|u| u.ends_with("/followers")));
  }
}
