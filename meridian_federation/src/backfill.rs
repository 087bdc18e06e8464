//! C8: thread backfill. On accepting a public Create/Update for a reply,
//! walks `inReplyTo` upward up to `BackfillDepth`, signed-GET-ing parents
//! that are missing or stale (§4.8).

use async_trait::async_trait;
use chrono::Utc;
use diesel::PgConnection;
use ed25519_dalek::PublicKey as EdPublicKey;

use crate::activity::ObjectDoc;
use crate::identity::{self, OriginCheck};
use crate::integrity_proof;
use crate::resolver::{Fetcher, ResolverKey};
use meridian_db::models::object::{Object, ObjectForm};
use meridian_utils::{FederationSettings, MeridianError, MeridianErrorKind};

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

#[async_trait(?Send)]
pub trait PortableKeyLookup {
  /// Resolves the Ed25519 public key for a portable actor's verification
  /// method, used to check an embedded integrity proof on a fetched parent.
  async fn ed25519_key_for(&self, verification_method: &str) -> Result<EdPublicKey, MeridianError>;
}

/// Termination per §4.8: missing `inReplyTo`, depth cap, repeated ID, or
/// error. Each step either stops locally (parent exists and is fresh) or
/// performs exactly one signed GET.
pub async fn backfill(
  conn: &PgConnection,
  fetcher: &impl Fetcher,
  keys: &PortableKeyLookup,
  key: &ResolverKey,
  domain: &str,
  start_in_reply_to: &str,
  settings: &FederationSettings,
) -> Result<u8, MeridianError> {
  let mut fetched_count = 0u8;
  let mut seen = std::collections::HashSet::new();
  let mut cursor = Some(start_in_reply_to.to_string());

  while let Some(parent_id) = cursor.take() {
    if fetched_count >= settings.backfill_depth {
      break;
    }
    if !seen.insert(parent_id.clone()) {
      break;
    }

    let canonical_parent = identity::canonicalize(&parent_id)?;
    if let Some(existing) = Object::find_by_canonical_id(conn, &canonical_parent)? {
      let fresh = existing
        .updated
        .map(|u| Utc::now().naive_utc() - u < settings.backfill_interval())
        .unwrap_or_else(|| Utc::now().naive_utc() - existing.published < settings.backfill_interval());
      if fresh || existing.has_update_history {
        break;
      }
      cursor = existing.in_reply_to.clone();
      continue;
    }

    fetched_count += 1;
    let response = fetcher.signed_get(&canonical_parent, key).await?;
    if response.is_gone() {
      Object::mark_deleted(conn, &canonical_parent)?;
      break;
    }
    if !response.is_success() {
      return Err(malformed(format!("backfill fetch of {:?} failed with {}", canonical_parent, response.status)));
    }

    let doc: ObjectDoc = serde_json::from_slice(&response.body)
      .map_err(|e| malformed(format!("unparseable backfilled object: {}", e)))?;

    let activity_origin = identity::origin(&canonical_parent)?;
    let attributed_origin = doc
      .attributed_to
      .as_deref()
      .map(identity::origin)
      .transpose()?
      .unwrap_or_else(|| activity_origin.clone());
    identity::validate_origin(
      &OriginCheck {
        activity_id: &canonical_parent,
        activity_type: "Create",
        actor_id: doc.attributed_to.as_deref().unwrap_or(&canonical_parent),
        object_id: Some(&canonical_parent),
        object_attributed_to: doc.attributed_to.as_deref(),
        object_is_nested_activity: false,
        nested_follow_id: None,
        domain,
      },
      0,
      settings.max_activity_depth,
    )?;
    let _ = attributed_origin;

    if identity::is_portable(&canonical_parent) {
      let raw: serde_json::Value = serde_json::from_slice(&response.body)
        .map_err(|e| malformed(format!("unparseable backfilled object: {}", e)))?;
      let verification_method = raw
        .get("proof")
        .and_then(|p| p.get("verificationMethod"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| malformed("portable parent carries no integrity proof"))?;
      let public_key = keys.ed25519_key_for(verification_method).await?;
      integrity_proof::verify(&raw, &public_key)?;
    }

    let form = ObjectForm {
      canonical_id: canonical_parent.clone(),
      object_type: doc.object_type.clone(),
      attributed_to: doc.attributed_to.clone().unwrap_or_else(|| canonical_parent.clone()),
      in_reply_to: doc.in_reply_to.clone(),
      content: doc.content.clone(),
      summary: doc.summary.clone(),
      sensitive: doc.sensitive,
      to_audience: doc.to.as_slice().to_vec(),
      cc_audience: doc.cc.as_slice().to_vec(),
      group_audience: None,
      raw_json: serde_json::from_slice(&response.body).unwrap_or(serde_json::Value::Null),
      poll_end_time: None,
      published: doc
        .published
        .as_deref()
        .map(crate::activity::parse_wire_timestamp)
        .transpose()?
        .map(crate::activity::naive_utc)
        .unwrap_or_else(|| Utc::now().naive_utc()),
    };
    Object::insert(conn, &form)?;

    cursor = doc.in_reply_to;
  }

  Ok(fetched_count)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backfill_depth_is_a_u8_bound_not_unbounded() {
    let settings = FederationSettings::default();
    assert!(settings.backfill_depth > 0);
    assert!(settings.backfill_depth < u8::MAX);
  }
}
