//! `GET /.well-known/apgateway/did:key:<z...>/...` (§4.1/§4.11 gateway
//! passthrough): resolves whatever canonical resource the DID+suffix names
//! and serves it exactly as the non-portable routes would, by canonical ID
//! rather than by local username.

use actix_web::{web, HttpRequest, HttpResponse};

use meridian_db::models::actor::Actor;
use meridian_db::models::follow::FollowEdge;
use meridian_db::models::object::Object;
use meridian_federation::identity;

use crate::ap_doc;
use crate::error::ApiError;
use crate::state::AppState;

const AP_MEDIA_TYPE: &str = "application/activity+json";

pub async fn gateway_passthrough(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse, ApiError> {
  let suffix = req.match_info().query("tail");
  let canonical_id = match identity::canonicalize(&format!("did:key:{}", suffix)) {
    Ok(id) => id,
    Err(_) => return Ok(HttpResponse::BadRequest().finish()),
  };

  if let Some(base) = canonical_id.strip_suffix("/outbox") {
    let base = base.to_string();
    let actor = meridian_db::blocking(&state.pool, move |conn| Actor::find_by_canonical_id(conn, &base)).await??;
    return match actor {
      Some(actor) => {
        let canonical_id = actor.canonical_id.clone();
        let items = meridian_db::blocking(&state.pool, move |conn| Object::by_author(conn, &canonical_id, 40)).await??;
        Ok(HttpResponse::Ok().content_type(AP_MEDIA_TYPE).json(ap_doc::outbox_collection(&actor, &items)))
      }
      None => Ok(HttpResponse::NotFound().finish()),
    };
  }

  if let Some(base) = canonical_id.strip_suffix("/followers") {
    let base = base.to_string();
    let actor = meridian_db::blocking(&state.pool, move |conn| Actor::find_by_canonical_id(conn, &base)).await??;
    return match actor {
      Some(actor) => {
        let canonical_id = actor.canonical_id.clone();
        let edges = meridian_db::blocking(&state.pool, move |conn| FollowEdge::followers_of(conn, &canonical_id)).await??;
        let ids: Vec<String> = edges.into_iter().map(|e| e.follower_actor_id).collect();
        Ok(HttpResponse::Ok().content_type(AP_MEDIA_TYPE).json(ap_doc::followers_collection(&actor, &ids)))
      }
      None => Ok(HttpResponse::NotFound().finish()),
    };
  }

  let lookup_id = canonical_id.clone();
  let actor = meridian_db::blocking(&state.pool, move |conn| Actor::find_by_canonical_id(conn, &lookup_id)).await??;
  if let Some(actor) = actor {
    return Ok(HttpResponse::Ok().content_type(AP_MEDIA_TYPE).json(ap_doc::actor_to_json(&actor)));
  }

  let lookup_id = canonical_id;
  let object = meridian_db::blocking(&state.pool, move |conn| Object::find_by_canonical_id(conn, &lookup_id)).await??;
  match object {
    Some(object) => Ok(HttpResponse::Ok().content_type(AP_MEDIA_TYPE).json(object.raw_json)),
    None => Ok(HttpResponse::NotFound().finish()),
  }
}
