//! `GET /.well-known/nodeinfo` and `GET /nodeinfo/2.0` (§6). User/post
//! counts are only filled in when `FillNodeInfoUsage` is set, since counting
//! every actor/object row on every probe is wasteful on a busy instance.

use actix_web::{web, HttpResponse};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn nodeinfo_links(state: web::Data<AppState>) -> HttpResponse {
  let domain = state.domain();
  HttpResponse::Ok().content_type("application/json").json(json!({
    "links": [{
      "rel": "http://nodeinfo.diaspora.software/ns/schema/2.0",
      "href": format!("https://{}/nodeinfo/2.0", domain),
    }]
  }))
}

pub async fn nodeinfo_2_0(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
  let usage = if state.settings.federation.fill_nodeinfo_usage {
    let (users, posts) = meridian_db::blocking(&state.pool, |conn| -> (i64, i64) {
      use meridian_db::schema::actor::dsl as actor_dsl;
      use meridian_db::schema::object::dsl as object_dsl;
      let users = actor_dsl::actor
        .filter(actor_dsl::local.eq(true))
        .select(count_star())
        .first::<i64>(conn)
        .unwrap_or(0);
      let posts = object_dsl::object.select(count_star()).first::<i64>(conn).unwrap_or(0);
      (users, posts)
    })
    .await?;
    json!({ "users": { "total": users }, "localPosts": posts })
  } else {
    json!({})
  };

  Ok(HttpResponse::Ok().content_type("application/json").json(json!({
    "version": "2.0",
    "software": { "name": "meridian", "version": env!("CARGO_PKG_VERSION") },
    "protocols": ["activitypub"],
    "usage": usage,
    "openRegistrations": false,
  })))
}
