use std::sync::{Arc, Mutex};

use meridian_db::DbPool;
use meridian_federation::outbox::ReqwestDeliverer;
use meridian_federation::resolver::ResolverKey;
use meridian_utils::rate_limit::RateLimiter;
use meridian_utils::settings::Settings;

use crate::federation_client::FederationClient;

/// Shared process state handed to every route, the way the teacher's
/// handlers took `web::Data<DbPool>` plus a `Client`.
#[derive(Clone)]
pub struct AppState {
  pub pool: DbPool,
  pub settings: Settings,
  pub fetcher: Arc<FederationClient>,
  pub deliverer: Arc<ReqwestDeliverer>,
  pub instance_key: ResolverKey,
  /// Per-source-host inbound throttle (§4.9); `None` when
  /// `min_inbound_request_interval_secs` is `0`.
  pub inbound_rate_limiter: Option<Arc<Mutex<RateLimiter>>>,
}

impl AppState {
  pub fn domain(&self) -> String {
    self.settings.get_hostname_without_port().unwrap_or_else(|| self.settings.hostname.clone())
  }
}
