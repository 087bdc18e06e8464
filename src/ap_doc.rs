//! Renders stored rows back into AP wire documents for GET responses.
//! Grounded on the teacher's `apub::user::ApubObjectType`/`ToApub` impls,
//! generalized to the richer `Actor`/`Object` rows this crate stores.

use serde_json::{json, Value};

use meridian_db::models::actor::Actor;
use meridian_db::models::object::Object;

const AP_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

pub fn actor_to_json(actor: &Actor) -> Value {
  let mut doc = json!({
    "@context": [AP_CONTEXT, "https://w3id.org/security/v1"],
    "id": actor.canonical_id,
    "type": actor.actor_type,
    "inbox": actor.inbox_url,
    "preferredUsername": actor.preferred_username,
    "manuallyApprovesFollowers": actor.manually_approves_followers,
  });
  let obj = doc.as_object_mut().expect("actor doc is always an object");
  if let Some(followers) = &actor.followers_url {
    obj.insert("followers".to_string(), json!(followers));
    obj.insert("outbox".to_string(), json!(format!("{}/outbox", actor.canonical_id)));
  }
  if let Some(shared) = &actor.shared_inbox_url {
    obj.insert("endpoints".to_string(), json!({ "sharedInbox": shared }));
  }
  if let Some(pem) = &actor.public_key_pem {
    obj.insert(
      "publicKey".to_string(),
      json!({
        "id": format!("{}#main-key", actor.canonical_id),
        "owner": actor.canonical_id,
        "publicKeyPem": pem,
      }),
    );
  }
  if let Some(multikey) = &actor.ed25519_multikey {
    obj.insert(
      "assertionMethod".to_string(),
      json!([{
        "id": format!("{}#ed25519-key", actor.canonical_id),
        "type": "Multikey",
        "controller": actor.canonical_id,
        "publicKeyMultibase": multikey,
      }]),
    );
  }
  if let Some(moved_to) = &actor.moved_to {
    obj.insert("movedTo".to_string(), json!(moved_to));
  }
  if !actor.also_known_as.is_empty() {
    obj.insert("alsoKnownAs".to_string(), json!(actor.also_known_as));
  }
  if !actor.gateways.is_empty() {
    obj.insert("gateways".to_string(), json!(actor.gateways));
  }
  if let Some(icon) = &actor.icon_url {
    obj.insert("icon".to_string(), json!({ "type": "Image", "url": icon }));
  }
  doc
}

pub fn outbox_collection(actor: &Actor, items: &[Object]) -> Value {
  json!({
    "@context": AP_CONTEXT,
    "id": format!("{}/outbox", actor.canonical_id),
    "type": "OrderedCollection",
    "totalItems": items.len(),
    "orderedItems": items.iter().map(|o| o.raw_json.clone()).collect::<Vec<_>>(),
  })
}

pub fn followers_collection(actor: &Actor, follower_ids: &[String]) -> Value {
  json!({
    "@context": AP_CONTEXT,
    "id": actor.followers_url.clone().unwrap_or_else(|| format!("{}/followers", actor.canonical_id)),
    "type": "OrderedCollection",
    "totalItems": follower_ids.len(),
    "orderedItems": follower_ids,
  })
}
