//! Actor document, outbox, and followers collection GET routes, plus the
//! instance-actor fallback at `/actor` and `/`. Grounded on the teacher's
//! `apub::user::get_apub_user_http` family of handlers.

use actix_web::{web, HttpResponse};

use meridian_db::models::actor::Actor;
use meridian_db::models::follow::FollowEdge;
use meridian_db::models::object::Object;

use crate::ap_doc;
use crate::error::ApiError;
use crate::state::AppState;

const AP_MEDIA_TYPE: &str = "application/activity+json";

async fn local_actor_or_404(state: &AppState, username: &str) -> Result<Option<Actor>, ApiError> {
  let domain = state.domain();
  let username = username.to_string();
  let actor = meridian_db::blocking(&state.pool, move |conn| Actor::find_local_by_username(conn, &domain, &username)).await??;
  Ok(actor)
}

pub async fn get_actor(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
  match local_actor_or_404(&state, &path).await? {
    Some(actor) => Ok(HttpResponse::Ok().content_type(AP_MEDIA_TYPE).json(ap_doc::actor_to_json(&actor))),
    None => Ok(HttpResponse::NotFound().finish()),
  }
}

pub async fn get_outbox(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
  let actor = match local_actor_or_404(&state, &path).await? {
    Some(a) => a,
    None => return Ok(HttpResponse::NotFound().finish()),
  };
  let canonical_id = actor.canonical_id.clone();
  let items = meridian_db::blocking(&state.pool, move |conn| Object::by_author(conn, &canonical_id, 40)).await??;
  Ok(HttpResponse::Ok().content_type(AP_MEDIA_TYPE).json(ap_doc::outbox_collection(&actor, &items)))
}

pub async fn get_followers(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
  let actor = match local_actor_or_404(&state, &path).await? {
    Some(a) => a,
    None => return Ok(HttpResponse::NotFound().finish()),
  };
  let canonical_id = actor.canonical_id.clone();
  let edges = meridian_db::blocking(&state.pool, move |conn| FollowEdge::followers_of(conn, &canonical_id)).await??;
  let ids: Vec<String> = edges.into_iter().map(|e| e.follower_actor_id).collect();
  Ok(HttpResponse::Ok().content_type(AP_MEDIA_TYPE).json(ap_doc::followers_collection(&actor, &ids)))
}

/// The synthetic instance actor (`preferredUsername` `"instance.actor"`)
/// every federated server exposes at `/actor` for instance-level signing
/// and FEP-844e capability discovery probes (§4.7, §4.10).
pub async fn get_instance_actor(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
  let domain = state.domain();
  let actor =
    meridian_db::blocking(&state.pool, move |conn| Actor::find_local_by_username(conn, &domain, "instance.actor")).await??;
  match actor {
    Some(actor) => Ok(HttpResponse::Ok().content_type(AP_MEDIA_TYPE).json(ap_doc::actor_to_json(&actor))),
    None => Ok(HttpResponse::NotFound().finish()),
  }
}
