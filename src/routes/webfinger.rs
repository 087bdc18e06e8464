//! `GET /.well-known/webfinger`. Grounded on the teacher's
//! `apub::webfinger::get_webfinger_response` handler.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use meridian_db::models::actor::Actor;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebfingerQuery {
  pub resource: String,
}

fn parse_acct(resource: &str) -> Option<(String, String)> {
  let rest = resource.strip_prefix("acct:")?;
  let (name, host) = rest.split_once('@')?;
  Some((name.to_string(), host.to_string()))
}

pub async fn webfinger(state: web::Data<AppState>, query: web::Query<WebfingerQuery>) -> Result<HttpResponse, ApiError> {
  let (name, host) = match parse_acct(&query.resource) {
    Some(pair) => pair,
    None => return Ok(HttpResponse::BadRequest().finish()),
  };
  if host != state.domain() {
    return Ok(HttpResponse::NotFound().finish());
  }

  let actor = meridian_db::blocking(&state.pool, move |conn| Actor::find_local_by_username(conn, &host, &name)).await??;
  let actor = match actor {
    Some(a) => a,
    None => return Ok(HttpResponse::NotFound().finish()),
  };

  let jrd = json!({
    "subject": query.resource,
    "aliases": [actor.canonical_id],
    "links": [{
      "rel": "self",
      "type": "application/activity+json",
      "href": actor.canonical_id,
    }],
  });
  Ok(HttpResponse::Ok().content_type("application/jrd+json").json(jrd))
}
