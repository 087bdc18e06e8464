//! `POST /inbox/{user}` and the shared `POST /inbox`. Grounded on the
//! teacher's `apub::inbox::shared_inbox` handler for the parse-verify-enqueue
//! shape, generalized per §4.5/§4.11: portable senders authenticate via the
//! embedded FEP-8b32 proof instead of an HTTP signature.

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::Value;

use meridian_db::models::actor::Actor;
use meridian_db::models::follow::FollowEdge;
use meridian_db::models::inbox_queue::{InboxQueueEntry, InboxQueueEntryForm};
use meridian_federation::identity;
use meridian_federation::integrity_proof;
use meridian_federation::policy;
use meridian_federation::resolver::{self, ResolveFlags};
use meridian_federation::signatures::{self, common::RequestParts};
use meridian_federation::workers::follower_sync;
use meridian_utils::{MeridianError, MeridianErrorKind};

use crate::error::ApiError;
use crate::state::AppState;

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

fn request_parts(req: &HttpRequest) -> RequestParts {
  let mut headers: HashMap<String, Vec<String>> = HashMap::new();
  for (name, value) in req.headers().iter() {
    if let Ok(v) = value.to_str() {
      headers.entry(name.as_str().to_ascii_lowercase()).or_default().push(v.to_string());
    }
  }
  RequestParts {
    method: req.method().as_str().to_string(),
    path: req.path().to_string(),
    query: if req.query_string().is_empty() { None } else { Some(req.query_string().to_string()) },
    host: req
      .connection_info()
      .host()
      .split(':')
      .next()
      .unwrap_or_default()
      .to_string(),
    headers,
  }
}

fn ed25519_public_key(multikey: &str) -> Result<ed25519_dalek::PublicKey, MeridianError> {
  let bytes = bs58::decode(multikey.trim_start_matches('z'))
    .into_vec()
    .map_err(|e| malformed(format!("invalid multibase Ed25519 key: {}", e)))?;
  ed25519_dalek::PublicKey::from_bytes(&bytes).map_err(|e| malformed(format!("invalid Ed25519 public key: {}", e)))
}

/// Authenticates the sender: a FEP-8b32 proof for portable senders, an HTTP
/// signature (draft-Cavage or RFC-9421, either key type) otherwise (§4.5).
async fn authenticate(state: &AppState, raw: &Value, body: &[u8], http_req: &HttpRequest) -> Result<Actor, MeridianError> {
  let actor_id = raw
    .get("actor")
    .and_then(|v| v.as_str())
    .ok_or_else(|| malformed("activity has no actor"))?
    .to_string();
  let canonical_id = identity::canonicalize(&actor_id)?;

  if identity::is_portable(&canonical_id) {
    let conn = state.pool.get().map_err(|e| malformed(format!("db pool exhausted: {}", e)))?;
    let sender = resolver::resolve_id(
      &conn,
      state.fetcher.as_ref(),
      &state.instance_key,
      &actor_id,
      ResolveFlags::default(),
      &state.settings.federation,
    )
    .await?;
    let multikey = sender
      .ed25519_multikey
      .as_deref()
      .ok_or_else(|| malformed(format!("portable actor {:?} has no assertionMethod key", canonical_id)))?;
    let public_key = ed25519_public_key(multikey)?;
    integrity_proof::verify(raw, &public_key)?;
    return Ok(sender);
  }

  let domain = state.domain();
  let parts = request_parts(http_req);
  let max_age = chrono::Duration::seconds(state.settings.federation.max_request_age_secs);
  let verified = signatures::extract(&parts, body, &domain, Utc::now(), max_age)?;

  let key_id = verified.key_id().to_string();
  let actor_url = key_id.split('#').next().unwrap_or(&key_id).to_string();
  let conn = state.pool.get().map_err(|e| malformed(format!("db pool exhausted: {}", e)))?;
  let sender = resolver::resolve_id(
    &conn,
    state.fetcher.as_ref(),
    &state.instance_key,
    &actor_url,
    ResolveFlags::default(),
    &state.settings.federation,
  )
  .await?;

  match (verified.dialect(), &sender.public_key_pem, &sender.ed25519_multikey) {
    (signatures::Dialect::Rfc9421, None, Some(multikey)) => {
      let public_key = ed25519_public_key(multikey)?;
      verified.verify_ed25519(&parts, &public_key)?;
    }
    (_, Some(pem), _) => {
      let public_key =
        openssl::pkey::PKey::public_key_from_pem(pem.as_bytes()).map_err(|e| malformed(format!("invalid RSA public key: {}", e)))?;
      verified.verify_rsa(&parts, &public_key)?;
    }
    _ => return Err(malformed(format!("sender {:?} has no usable public key", sender.canonical_id))),
  }

  Ok(sender)
}

async fn handle_inbox(state: web::Data<AppState>, http_req: HttpRequest, user: Option<String>, body: web::Bytes) -> Result<HttpResponse, ApiError> {
  let source_host = http_req.connection_info().host().split(':').next().unwrap_or_default().to_string();
  if !policy::is_host_allowed(&state.settings.federation, &source_host) {
    return Err(
      MeridianError::with_kind(
        anyhow::anyhow!("source host {:?} is not permitted to federate", source_host),
        MeridianErrorKind::AuthorizationFailure,
      )
      .into(),
    );
  }

  if let Some(limiter) = &state.inbound_rate_limiter {
    let allowed = limiter
      .lock()
      .map_err(|_| malformed("inbound rate limiter lock poisoned"))?
      .check_and_record(&source_host);
    if !allowed {
      return Err(
        MeridianError::with_kind(
          anyhow::anyhow!("source host {:?} exceeded the inbound request rate", source_host),
          MeridianErrorKind::ResourceBoundedRejection,
        )
        .into(),
      );
    }
  }

  let raw: Value = serde_json::from_slice(&body).map_err(|e| malformed(format!("malformed JSON body: {}", e)))?;

  if let Some(username) = &user {
    let domain = state.domain();
    let username = username.clone();
    let found = meridian_db::blocking(&state.pool, move |conn| Actor::find_local_by_username(conn, &domain, &username)).await??;
    if found.is_none() {
      return Ok(HttpResponse::NotFound().finish());
    }
  }

  let sender = authenticate(&state, &raw, &body, &http_req).await?;

  // §4.9 FEP-8fcf: a changed digest on the sender's followers collection
  // means any local actor we think follows them may no longer be accepted.
  if let Some(header_value) = http_req.headers().get("collection-synchronization").and_then(|v| v.to_str().ok()) {
    let header_value = header_value.to_string();
    let domain = state.domain();
    let sender_for_sync = sender.clone();
    meridian_db::blocking(&state.pool, move |conn| {
      let changed = follower_sync::observe_inbound_digest(conn, &sender_for_sync, &domain, &header_value)?;
      if changed {
        FollowEdge::clear_accepted_for_followed(conn, &sender_for_sync.canonical_id)?;
      }
      Ok::<(), MeridianError>(())
    })
    .await??;
  }

  let activity_json = raw;
  let sender_actor_id = sender.canonical_id.clone();
  let raw_body = body.to_vec();
  let path = http_req.path().to_string();
  let shared = user.is_none();
  meridian_db::blocking(&state.pool, move |conn| {
    InboxQueueEntry::push(
      conn,
      &InboxQueueEntryForm {
        sender_actor_id,
        activity_json,
        raw_body,
        path: Some(path),
        shared,
        inserted_at: Utc::now().naive_utc(),
      },
    )
  })
  .await??;

  Ok(HttpResponse::Accepted().finish())
}

pub async fn user_inbox(state: web::Data<AppState>, http_req: HttpRequest, path: web::Path<String>, body: web::Bytes) -> Result<HttpResponse, ApiError> {
  handle_inbox(state, http_req, Some(path.into_inner()), body).await
}

pub async fn shared_inbox(state: web::Data<AppState>, http_req: HttpRequest, body: web::Bytes) -> Result<HttpResponse, ApiError> {
  handle_inbox(state, http_req, None, body).await
}
