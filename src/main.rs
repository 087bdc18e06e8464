mod ap_doc;
mod bootstrap;
mod error;
mod federation_client;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use actix_web::{web, App, HttpServer};
use chrono::Utc;

use meridian_db::DbPool;
use meridian_federation::outbox::ReqwestDeliverer;
use meridian_federation::resolver::ResolverKey;
use meridian_federation::{inbox, outbox, workers};
use meridian_db::models::capability::SignatureDialect;
use meridian_utils::rate_limit::RateLimiter;
use meridian_utils::settings::Settings;

use crate::federation_client::FederationClient;
use crate::state::AppState;

/// Spawns the interval-driven background loops the teacher ran off
/// `actix::Arbiter::spawn` timers: inbound/outbound queue drains and the
/// three C9 workers, each independent of the actix-web request/response
/// cycle (§5, §9).
fn spawn_background_loops(pool: DbPool, settings: Settings, deliverer: Arc<ReqwestDeliverer>, domain: String) {
  let federation = settings.federation.clone();

  {
    let pool = pool.clone();
    let federation = federation.clone();
    let domain = domain.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(StdDuration::from_millis(federation.activities_polling_interval_ms));
      loop {
        interval.tick().await;
        if let Err(e) = inbox::drain_batch(&pool, domain.clone(), federation.clone(), federation.activities_batch_size as i64).await {
          log::warn!("inbox drain failed: {}", e);
        }
      }
    });
  }

  {
    let pool = pool.clone();
    let federation = federation.clone();
    let deliverer = deliverer.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(StdDuration::from_millis(federation.activities_batch_delay_ms.max(1)));
      loop {
        interval.tick().await;
        if let Err(e) = outbox::drain_batch(&pool, deliverer.as_ref(), federation.clone(), federation.activities_batch_size as i64).await {
          log::warn!("outbox drain failed: {}", e);
        }
      }
    });
  }

  {
    let pool = pool.clone();
    let federation = federation.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(StdDuration::from_secs(60));
      loop {
        interval.tick().await;
        let federation = federation.clone();
        let result = meridian_db::blocking(&pool, move |conn| workers::mover::run_once(conn, &federation)).await;
        if let Err(e) = result.and_then(|r| r) {
          log::warn!("mover worker failed: {}", e);
        }
      }
    });
  }

  {
    let pool = pool.clone();
    let federation = federation.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(StdDuration::from_secs(federation.followers_sync_interval_secs.max(1)));
      loop {
        interval.tick().await;
        let federation = federation.clone();
        let result = meridian_db::blocking(&pool, move |conn| workers::follower_sync::run_once(conn, &federation)).await;
        if let Err(e) = result.and_then(|r| r) {
          log::warn!("followers-sync worker failed: {}", e);
        }
      }
    });
  }

  {
    let pool = pool.clone();
    let federation = federation.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(StdDuration::from_secs(5));
      loop {
        interval.tick().await;
        let federation = federation.clone();
        let result = meridian_db::blocking(&pool, move |conn| workers::poller::close_due_polls(conn, &federation)).await;
        if let Err(e) = result.and_then(|r| r) {
          log::warn!("poller worker failed: {}", e);
        }
      }
    });
  }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  env_logger::init();
  dotenv::dotenv().ok();

  let settings = Settings::load_from_file_and_env("config/config.toml").unwrap_or_else(|e| {
    log::warn!("failed to load config, using defaults: {}", e);
    Settings::default()
  });

  let pool = meridian_db::build_pool(&settings.database_url).expect("failed to build db pool");
  {
    let conn = pool.get().expect("failed to acquire db connection for migrations");
    meridian_db::run_migrations(&conn).expect("failed to run migrations");
  }

  let instance_actor = bootstrap::ensure_instance_actor(&pool, &settings)
    .await
    .expect("failed to provision instance actor");

  let fetcher = Arc::new(FederationClient::new(
    instance_actor.private_key_pem.clone().expect("instance actor must have an RSA key"),
    {
      let multikey = instance_actor.private_ed25519_key.clone().expect("instance actor must have an Ed25519 key");
      bs58::decode(multikey.trim_start_matches('z')).into_vec().expect("instance actor Ed25519 key is valid multibase")
    },
  ));
  let deliverer = Arc::new(ReqwestDeliverer::new());
  let instance_key = ResolverKey {
    key_id: format!("{}#main-key", instance_actor.canonical_id),
    dialect: SignatureDialect::Rfc9421Rsa,
  };

  let domain = settings.get_hostname_without_port().unwrap_or_else(|| settings.hostname.clone());
  spawn_background_loops(pool.clone(), settings.clone(), deliverer.clone(), domain);

  let bind = settings.bind.clone();
  let port = settings.port;
  let inbound_rate_limiter = settings
    .federation
    .min_inbound_request_interval()
    .map(|interval| Arc::new(std::sync::Mutex::new(RateLimiter::new(interval))));
  let state = AppState { pool, settings, fetcher, deliverer, instance_key, inbound_rate_limiter };

  log::info!("meridian_server starting at {}", Utc::now());
  HttpServer::new(move || App::new().app_data(web::Data::new(state.clone())).configure(routes::configure))
    .bind((bind.as_str(), port))?
    .run()
    .await
}
