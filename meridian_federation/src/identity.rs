//! C1: identity & URL model.
//!
//! Grounded on `mitra_activitypub::identifiers`'s gateway/compatible-id
//! scheme (the pack's closest analogue to FEP-EF61 portable actors); the
//! teacher has no portable-actor concept at all, so this module is new
//! relative to `server/src/apub`.

use regex::Regex;
use url::Url;

use meridian_utils::MeridianError;

lazy_static::lazy_static! {
  /// Matches the `did:key:z6Mk...` substring shared by all three portable
  /// forms named in §4.1, capturing the key and any trailing path/suffix.
  static ref DID_KEY_RE: Regex =
    Regex::new(r"did:key:(?P<key>z6Mk[1-9A-HJ-NP-Za-km-z]+)(?P<suffix>.*)$").expect("valid regex");
}

const GATEWAY_SEGMENT: &str = "/.well-known/apgateway/";

/// Canonicalizes any of the three portable forms, or a plain HTTPS actor/
/// object URL, into the single string used for storage and comparison.
///
/// - `ap://did:key:z6Mk...<suffix>` → unchanged
/// - `did:key:z6Mk...<suffix>` → `ap://did:key:z6Mk...<suffix>`
/// - `https://<host>/.well-known/apgateway/did:key:z6Mk...<suffix>` → `ap://did:key:z6Mk...<suffix>`
/// - any other absolute URL → returned unchanged (it is already canonical)
pub fn canonicalize(id: &str) -> Result<String, MeridianError> {
  if let Some(caps) = DID_KEY_RE.captures(id) {
    return Ok(format!("ap://did:key:{}{}", &caps["key"], &caps["suffix"]));
  }
  // Not portable: must be a well-formed absolute URL.
  Url::parse(id).map_err(|e| anyhow::anyhow!("not a valid actor/object id {:?}: {}", id, e))?;
  Ok(id.to_string())
}

/// Whether `id` is any of the three portable forms recognized in §4.1.
pub fn is_portable(id: &str) -> bool {
  DID_KEY_RE.is_match(id)
}

/// The origin of an id: `did:key:<key>` for portable ids, the HTTPS host
/// for everything else.
pub fn origin(id: &str) -> Result<String, MeridianError> {
  if let Some(caps) = DID_KEY_RE.captures(id) {
    return Ok(format!("did:key:{}", &caps["key"]));
  }
  let url = Url::parse(id).map_err(|e| anyhow::anyhow!("not a valid id {:?}: {}", id, e))?;
  url
    .host_str()
    .map(|h| h.to_string())
    .ok_or_else(|| anyhow::anyhow!("id {:?} has no host", id).into())
}

/// Compares canonical forms with any query string stripped.
pub fn same_actor(a: &str, b: &str) -> bool {
  fn strip_query(s: &str) -> String {
    s.split('?').next().unwrap_or(s).to_string()
  }
  match (canonicalize(a), canonicalize(b)) {
    (Ok(a), Ok(b)) => strip_query(&a) == strip_query(&b),
    _ => false,
  }
}

/// Recovers an HTTPS gateway URL for a portable id on a given host: the
/// path after the `did:key:` segment is preserved so a replicated activity
/// addressed through gateway B reaches the same logical resource as on A.
pub fn gateway(host: &str, canonical_id: &str) -> Result<Url, MeridianError> {
  let caps = DID_KEY_RE
    .captures(canonical_id)
    .ok_or_else(|| anyhow::anyhow!("{:?} is not a portable id", canonical_id))?;
  let url_str = format!(
    "https://{}{}did:key:{}{}",
    host, GATEWAY_SEGMENT, &caps["key"], &caps["suffix"]
  );
  Url::parse(&url_str).map_err(|e| anyhow::anyhow!("invalid gateway host {:?}: {}", host, e).into())
}

/// A minimal view of an activity sufficient to run origin validation,
/// independent of the full `Activity`/`Object` wire types so this module
/// has no dependency on `crate::activity`.
pub struct OriginCheck<'a> {
  pub activity_id: &'a str,
  pub activity_type: &'a str,
  pub actor_id: &'a str,
  /// `object` is `None` for activities with no nested object, `Some(id)`
  /// when the nested object/activity/link has an id (or is itself a bare
  /// string link).
  pub object_id: Option<&'a str>,
  pub object_attributed_to: Option<&'a str>,
  pub object_is_nested_activity: bool,
  pub nested_follow_id: Option<&'a str>,
  pub domain: &'a str,
}

/// §4.1 `ValidateOrigin`: enforces that the activity id, the actor, and
/// (depending on type) the nested object all resolve to the same origin,
/// bounded by `max_depth` nesting (shared with §4.5's `MaxActivityDepth`).
pub fn validate_origin(check: &OriginCheck, depth: u8, max_depth: u8) -> Result<(), MeridianError> {
  if depth > max_depth {
    return Err(
      meridian_utils::MeridianError::with_kind(
        anyhow::anyhow!("activity nesting exceeds MaxActivityDepth ({})", max_depth),
        meridian_utils::MeridianErrorKind::AuthorizationFailure,
      ),
    );
  }

  let activity_origin = origin(check.activity_id)?;
  let actor_origin = origin(check.actor_id)?;
  if activity_origin != actor_origin {
    return Err(origin_mismatch(check.activity_id, check.actor_id));
  }

  match check.activity_type {
    "Delete" => {
      if let Some(object_id) = check.object_id {
        let object_origin = origin(object_id)?;
        if object_origin != activity_origin {
          return Err(origin_mismatch(check.activity_id, object_id));
        }
      }
    }
    "Accept" | "Reject" => {
      // The wrapped Follow must belong either to the local domain or to a DID.
      if let Some(follow_id) = check.nested_follow_id {
        let follow_origin = origin(follow_id)?;
        if follow_origin != check.domain && !is_portable(follow_id) {
          return Err(origin_mismatch(check.activity_id, follow_id));
        }
      }
    }
    "Announce" => {
      if check.object_is_nested_activity {
        return Err(
          meridian_utils::MeridianError::with_kind(
            anyhow::anyhow!("Announce must not be nested"),
            meridian_utils::MeridianErrorKind::AuthorizationFailure,
          ),
        );
      }
    }
    "Create" | "Update" => {
      if let Some(attributed_to) = check.object_attributed_to {
        let attributed_origin = origin(attributed_to)?;
        if attributed_origin != activity_origin {
          return Err(origin_mismatch(check.activity_id, attributed_to));
        }
      }
    }
    // Undo unwraps and recurses: the caller re-invokes validate_origin on
    // the inner activity with depth + 1 before calling this function again
    // for the outer Undo, so no extra handling is needed here.
    _ => {}
  }

  Ok(())
}

fn origin_mismatch(a: &str, b: &str) -> MeridianError {
  meridian_utils::MeridianError::with_kind(
    anyhow::anyhow!("origin mismatch between {:?} and {:?}", a, b),
    meridian_utils::MeridianErrorKind::AuthorizationFailure,
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  const KEY: &str = "z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6";

  #[test]
  fn test_canonicalize_idempotent_http() {
    let url = "https://social.example/users/alice";
    let once = canonicalize(url).unwrap();
    let twice = canonicalize(&once).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once, url);
  }

  #[test]
  fn test_canonicalize_bare_did() {
    let did = format!("did:key:{}/actor", KEY);
    let canonical = canonicalize(&did).unwrap();
    assert_eq!(canonical, format!("ap://did:key:{}/actor", KEY));
  }

  #[test]
  fn test_canonicalize_gateway_url() {
    let gateway_url = format!(
      "https://social.example/.well-known/apgateway/did:key:{}/actor",
      KEY
    );
    let canonical = canonicalize(&gateway_url).unwrap();
    assert_eq!(canonical, format!("ap://did:key:{}/actor", KEY));
  }

  #[test]
  fn test_canonicalize_idempotent_did() {
    let did = format!("ap://did:key:{}/actor", KEY);
    let once = canonicalize(&did).unwrap();
    let twice = canonicalize(&once).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once, did);
  }

  #[test]
  fn test_is_portable() {
    assert!(is_portable(&format!("ap://did:key:{}/actor", KEY)));
    assert!(!is_portable("https://social.example/users/alice"));
  }

  #[test]
  fn test_origin_http() {
    assert_eq!(
      origin("https://social.example/users/alice").unwrap(),
      "social.example"
    );
  }

  #[test]
  fn test_origin_portable() {
    let did = format!("ap://did:key:{}/actor", KEY);
    assert_eq!(origin(&did).unwrap(), format!("did:key:{}", KEY));
  }

  #[test]
  fn test_gateway_recovers_origin() {
    let canonical = format!("ap://did:key:{}/actor", KEY);
    let gw = gateway("social.example", &canonical).unwrap();
    assert_eq!(gw.scheme(), "https");
    let recanonical = canonicalize(gw.as_str()).unwrap();
    assert_eq!(origin(&recanonical).unwrap(), origin(&canonical).unwrap());
  }

  #[test]
  fn test_same_actor_strips_query() {
    let did = format!("ap://did:key:{}/actor", KEY);
    let with_query = format!("{}?type=group", did);
    assert!(same_actor(&did, &with_query));
  }

  #[test]
  fn test_validate_origin_mismatch_rejected() {
    let check = OriginCheck {
      activity_id: "https://a.example/activities/1",
      activity_type: "Create",
      actor_id: "https://b.example/users/bob",
      object_id: None,
      object_attributed_to: None,
      object_is_nested_activity: false,
      nested_follow_id: None,
      domain: "a.example",
    };
    let result = validate_origin(&check, 0, 8);
    assert!(result.is_err());
  }

  #[test]
  fn test_validate_origin_announce_nested_rejected() {
    let check = OriginCheck {
      activity_id: "https://a.example/activities/1",
      activity_type: "Announce",
      actor_id: "https://a.example/users/alice",
      object_id: None,
      object_attributed_to: None,
      object_is_nested_activity: true,
      nested_follow_id: None,
      domain: "a.example",
    };
    assert!(validate_origin(&check, 0, 8).is_err());
  }

  #[test]
  fn test_validate_origin_depth_exceeded() {
    let check = OriginCheck {
      activity_id: "https://a.example/activities/1",
      activity_type: "Announce",
      actor_id: "https://a.example/users/alice",
      object_id: None,
      object_attributed_to: None,
      object_is_nested_activity: false,
      nested_follow_id: None,
      domain: "a.example",
    };
    assert!(validate_origin(&check, 9, 8).is_err());
  }
}
