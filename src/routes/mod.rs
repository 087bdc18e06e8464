pub mod actor;
pub mod gateway;
pub mod inbox;
pub mod nodeinfo;
pub mod webfinger;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
  cfg
    .route("/inbox", web::post().to(inbox::shared_inbox))
    .route("/users/{user}/inbox", web::post().to(inbox::user_inbox))
    .route("/users/{user}", web::get().to(actor::get_actor))
    .route("/users/{user}/outbox", web::get().to(actor::get_outbox))
    .route("/users/{user}/followers", web::get().to(actor::get_followers))
    .route("/actor", web::get().to(actor::get_instance_actor))
    .route("/", web::get().to(actor::get_instance_actor))
    .route("/.well-known/webfinger", web::get().to(webfinger::webfinger))
    .route("/.well-known/nodeinfo", web::get().to(nodeinfo::nodeinfo_links))
    .route("/nodeinfo/2.0", web::get().to(nodeinfo::nodeinfo_2_0))
    .route("/.well-known/apgateway/{tail:.*}", web::get().to(gateway::gateway_passthrough));
}
