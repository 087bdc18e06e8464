//! C6: outbound queue & delivery loop. Rows are produced in the same
//! transaction that mutates the state they describe (§4.6); this module
//! only drains them. Grounded on the teacher's `apub::fetcher::send`
//! family for per-destination delivery and on `mitra_activitypub`'s
//! shared-inbox collapsing for the grouping step.

use async_trait::async_trait;
use chrono::Utc;
use diesel::PgConnection;
use serde_json::Value;
use sha2::Digest;
use url::Url;

use crate::audience::PUBLIC;
use crate::capability;
use crate::portable;
use crate::signatures::{common::RequestParts, draft, rfc9421};
use crate::workers::follower_sync;
use meridian_db::models::actor::Actor;
use meridian_db::models::capability::SignatureDialect;
use meridian_db::models::follow::FollowEdge;
use meridian_db::models::outbox::{OutboxDelivery, OutboxEntry};
use meridian_db::DbPool;
use meridian_utils::{FederationSettings, MeridianError, MeridianErrorKind};

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

fn transient(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::Transient)
}

/// Abstracts the outbound POST so the grouping/signing logic is testable
/// without a network stack, mirroring `resolver::Fetcher`.
#[async_trait(?Send)]
pub trait Deliverer {
  async fn deliver(&self, url: &str, headers: Vec<(String, String)>, body: Vec<u8>) -> Result<u16, MeridianError>;
}

/// Production delivery over `reqwest`, the HTTP client already in the
/// dependency table.
pub struct ReqwestDeliverer {
  client: reqwest::Client,
}

impl ReqwestDeliverer {
  pub fn new() -> Self {
    ReqwestDeliverer { client: reqwest::Client::new() }
  }
}

impl Default for ReqwestDeliverer {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait(?Send)]
impl Deliverer for ReqwestDeliverer {
  async fn deliver(&self, url: &str, headers: Vec<(String, String)>, body: Vec<u8>) -> Result<u16, MeridianError> {
    let mut request = self.client.post(url).body(body);
    for (name, value) in &headers {
      request = request.header(name.as_str(), value.as_str());
    }
    let response = request.send().await.map_err(|e| transient(format!("delivery to {:?} failed: {}", url, e)))?;
    Ok(response.status().as_u16())
  }
}

fn values_of(field: Option<&Value>) -> Vec<String> {
  match field {
    Some(Value::String(s)) => vec![s.clone()],
    Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect(),
    _ => Vec::new(),
  }
}

/// A single POST target after shared-inbox collapsing: the URL to deliver
/// to and the host used to pick a dialect.
struct DeliveryTarget {
  inbox_url: String,
  host: String,
}

fn host_of(url: &str) -> Result<String, MeridianError> {
  Url::parse(url)
    .ok()
    .and_then(|u| u.host_str().map(|h| h.to_string()))
    .ok_or_else(|| malformed(format!("delivery target {:?} has no host", url)))
}

/// Resolves an entry's `to`/`cc` audience into unique delivery targets,
/// expanding a sender's own followers collection URL into its individual
/// followers and collapsing recipients onto a shared inbox when the
/// destination host has advertised one (§4.6).
fn destinations(conn: &PgConnection, entry: &OutboxEntry) -> Result<Vec<DeliveryTarget>, MeridianError> {
  let to = values_of(entry.activity_json.get("to"));
  let cc = values_of(entry.activity_json.get("cc"));
  let sender = Actor::find_by_canonical_id(conn, &entry.sender_actor_id)?;
  let sender_followers_url = sender.as_ref().and_then(|a| a.followers_url.clone());

  let mut recipient_actors: Vec<Actor> = Vec::new();
  for audience_id in to.iter().chain(cc.iter()) {
    if audience_id == PUBLIC {
      continue;
    }
    if sender_followers_url.as_deref() == Some(audience_id.as_str()) {
      for edge in FollowEdge::followers_of(conn, &entry.sender_actor_id)? {
        if let Some(actor) = Actor::find_by_canonical_id(conn, &edge.follower_actor_id)? {
          recipient_actors.push(actor);
        }
      }
      continue;
    }
    if let Some(actor) = Actor::find_by_canonical_id(conn, audience_id)? {
      recipient_actors.push(actor);
    }
  }

  let mut seen_urls = std::collections::HashSet::new();
  let mut targets = Vec::new();
  for actor in recipient_actors {
    if actor.local {
      continue;
    }
    let inbox_url = actor.shared_inbox_url.clone().unwrap_or_else(|| actor.inbox_url.clone());
    if seen_urls.insert(inbox_url.clone()) {
      targets.push(DeliveryTarget { host: host_of(&inbox_url)?, inbox_url });
    }
  }

  // §4.11: a portable sender replicates the same entry to every other
  // gateway it advertises, so followers reachable only there still see it.
  if let Some(sender) = &sender {
    for inbox_url in portable::gateway_inbox_urls(sender)? {
      if seen_urls.insert(inbox_url.clone()) {
        targets.push(DeliveryTarget { host: host_of(&inbox_url)?, inbox_url });
      }
    }
  }
  Ok(targets)
}

fn build_signed_headers(
  target_url: &Url,
  body: &[u8],
  sender: &Actor,
  dialect: SignatureDialect,
  now: chrono::DateTime<Utc>,
) -> Result<Vec<(String, String)>, MeridianError> {
  let target_host = target_url.host_str().unwrap_or_default();
  let req = RequestParts {
    method: "POST".to_string(),
    path: target_url.path().to_string(),
    query: target_url.query().map(|q| q.to_string()),
    host: target_host.to_string(),
    headers: std::collections::HashMap::new(),
  };

  match dialect {
    SignatureDialect::CavageDraftRsa => {
      let pem = sender
        .private_key_pem
        .as_deref()
        .ok_or_else(|| malformed(format!("sender {:?} has no RSA private key", sender.canonical_id)))?;
      let private_key =
        openssl::pkey::PKey::private_key_from_pem(pem.as_bytes()).map_err(|e| malformed(format!("invalid RSA key: {}", e)))?;
      let key_id = format!("{}#main-key", sender.canonical_id);
      let (sig, digest, date) = draft::sign(&req, Some(body), &key_id, &private_key, now)?;
      let mut headers = vec![
        ("Host".to_string(), target_host.to_string()),
        ("Date".to_string(), date),
        ("Signature".to_string(), sig),
        ("Content-Type".to_string(), "application/activity+json".to_string()),
      ];
      if let Some(digest) = digest {
        headers.push(("Digest".to_string(), digest));
      }
      Ok(headers)
    }
    SignatureDialect::Rfc9421Rsa => {
      let pem = sender
        .private_key_pem
        .as_deref()
        .ok_or_else(|| malformed(format!("sender {:?} has no RSA private key", sender.canonical_id)))?;
      let private_key =
        openssl::pkey::PKey::private_key_from_pem(pem.as_bytes()).map_err(|e| malformed(format!("invalid RSA key: {}", e)))?;
      let key_id = format!("{}#main-key", sender.canonical_id);
      let digest = format!("sha-256=:{}:", base64::encode(sha2::Sha256::digest(body)));
      let mut req_with_digest = req.clone();
      req_with_digest
        .headers
        .insert("content-digest".to_string(), vec![digest.clone()]);
      let components = vec!["@method".to_string(), "@target-uri".to_string(), "content-digest".to_string()];
      let (sig_input, sig) = rfc9421::sign_rsa(&req_with_digest, &key_id, now, None, components, &private_key)?;
      Ok(vec![
        ("Host".to_string(), target_host.to_string()),
        ("Content-Digest".to_string(), digest),
        ("Signature-Input".to_string(), sig_input),
        ("Signature".to_string(), sig),
        ("Content-Type".to_string(), "application/activity+json".to_string()),
      ])
    }
    SignatureDialect::Rfc9421Ed25519 => {
      let multikey = sender
        .private_ed25519_key
        .as_deref()
        .ok_or_else(|| malformed(format!("sender {:?} has no Ed25519 private key", sender.canonical_id)))?;
      let secret_bytes = bs58::decode(multikey.trim_start_matches('z'))
        .into_vec()
        .map_err(|e| malformed(format!("invalid multibase Ed25519 key: {}", e)))?;
      let keypair = ed25519_dalek::Keypair::from_bytes(&secret_bytes)
        .map_err(|e| malformed(format!("invalid Ed25519 keypair bytes: {}", e)))?;
      let key_id = format!("{}#main-key", sender.canonical_id);
      let digest = format!("sha-256=:{}:", base64::encode(sha2::Sha256::digest(body)));
      let mut req_with_digest = req.clone();
      req_with_digest
        .headers
        .insert("content-digest".to_string(), vec![digest.clone()]);
      let components = vec!["@method".to_string(), "@target-uri".to_string(), "content-digest".to_string()];
      let (sig_input, sig) = rfc9421::sign_ed25519(&req_with_digest, &key_id, now, None, components, &keypair)?;
      Ok(vec![
        ("Host".to_string(), target_host.to_string()),
        ("Content-Digest".to_string(), digest),
        ("Signature-Input".to_string(), sig_input),
        ("Signature".to_string(), sig),
        ("Content-Type".to_string(), "application/activity+json".to_string()),
      ])
    }
  }
}

/// Delivers one queued entry to every resolved destination, recording a
/// per-inbox result and marking the entry sent once every destination has
/// either succeeded or exhausted `MaxDeliveryAttempts` (§4.6).
pub async fn deliver_entry(
  conn: &PgConnection,
  deliverer: &impl Deliverer,
  entry: &OutboxEntry,
  settings: &FederationSettings,
) -> Result<(), MeridianError> {
  let sender = Actor::find_by_canonical_id(conn, &entry.sender_actor_id)?
    .ok_or_else(|| malformed(format!("outbox sender {:?} vanished from cache", entry.sender_actor_id)))?;
  let targets = destinations(conn, entry)?;
  if targets.is_empty() {
    OutboxEntry::mark_sent(conn, entry.id)?;
    return Ok(());
  }

  let body = serde_json::to_vec(&entry.activity_json).map_err(|e| malformed(format!("entry does not re-serialize: {}", e)))?;
  let now = Utc::now();

  for target in &targets {
    let dialect = capability::choose_dialect(conn, &target.host, settings)?;
    let target_url = Url::parse(&target.inbox_url).map_err(|e| malformed(format!("invalid inbox url {:?}: {}", target.inbox_url, e)))?;
    let mut headers = build_signed_headers(&target_url, &body, &sender, dialect, now)?;
    if let Some(sync_header) = follower_sync::collection_sync_header_value(conn, &sender, &target.host)? {
      headers.push(("Collection-Synchronization".to_string(), sync_header));
    }
    let status = deliverer.deliver(&target.inbox_url, headers, body.clone()).await;
    match status {
      Ok(code) if (200..300).contains(&code) => {
        OutboxDelivery::upsert_result(conn, entry.id, &target.inbox_url, true)?;
        capability::record_observed_dialect(conn, &target.host, dialect)?;
      }
      Ok(_) | Err(_) => {
        OutboxDelivery::upsert_result(conn, entry.id, &target.inbox_url, false)?;
      }
    }
  }

  OutboxEntry::record_attempt(conn, entry.id)?;
  if OutboxDelivery::all_resolved(conn, entry.id, settings.max_delivery_attempts as i32)? {
    OutboxEntry::mark_sent(conn, entry.id)?;
  }
  Ok(())
}

/// Drains up to `batch_size` deliverable rows, then garbage-collects
/// exhausted entries past `DeliveryRetention` (§4.6 "Backpressure").
pub async fn drain_batch(
  pool: &DbPool,
  deliverer: &(impl Deliverer + 'static),
  settings: FederationSettings,
  batch_size: i64,
) -> Result<usize, MeridianError> {
  let max_attempts = settings.max_delivery_attempts as i32;
  let entries = meridian_db::blocking(pool, move |conn| OutboxEntry::unsent_deliverable(conn, max_attempts, batch_size)).await??;

  let mut delivered = 0usize;
  for entry in entries {
    let conn = pool.get().map_err(|e| anyhow::anyhow!("could not get db connection: {}", e))?;
    deliver_entry(&conn, deliverer, &entry, &settings).await?;
    delivered += 1;
  }

  let retention = settings.delivery_retention();
  meridian_db::blocking(pool, move |conn| OutboxEntry::gc_expired(conn, max_attempts, retention)).await??;

  Ok(delivered)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::cell::RefCell;

  #[test]
  fn test_values_of_handles_string_and_array() {
    let single = json!("https://a.example/x");
    let many = json!(["https://a.example/x", "https://a.example/y"]);
    assert_eq!(values_of(Some(&single)), vec!["https://a.example/x"]);
    assert_eq!(
      values_of(Some(&many)),
      vec!["https://a.example/x".to_string(), "https://a.example/y".to_string()]
    );
    assert!(values_of(None).is_empty());
  }

  #[test]
  fn test_host_of_extracts_authority() {
    assert_eq!(host_of("https://remote.example/inbox").unwrap(), "remote.example");
    assert!(host_of("not a url").is_err());
  }

  struct RecordingDeliverer {
    calls: RefCell<Vec<String>>,
  }

  #[async_trait(?Send)]
  impl Deliverer for RecordingDeliverer {
    async fn deliver(&self, url: &str, _headers: Vec<(String, String)>, _body: Vec<u8>) -> Result<u16, MeridianError> {
      self.calls.borrow_mut().push(url.to_string());
      Ok(202)
    }
  }

  #[tokio::test]
  async fn test_recording_deliverer_reports_accepted() {
    let deliverer = RecordingDeliverer { calls: RefCell::new(vec![]) };
    let status = deliverer.deliver("https://remote.example/inbox", vec![], vec![]).await.unwrap();
    assert_eq!(status, 202);
    assert_eq!(deliverer.calls.borrow().len(), 1);
  }
}
