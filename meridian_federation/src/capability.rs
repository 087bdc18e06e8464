//! C7: per-host capability discovery. Thin wrapper over
//! `meridian_db::models::capability::HostCapability`'s "OR-in, never clear"
//! bitset (§5, §4.7), adding the read-path selection policy and the
//! trial-upgrade probabilities unknown hosts are driven with.

use diesel::PgConnection;
use meridian_db::models::capability::{HostCapability, SignatureDialect};
use meridian_utils::{FederationSettings, MeridianError};
use rand::Rng;

/// Signals that update a host's capability bits, per §4.7:
/// 1. the actor's advertised FEP-844e `generator.implements` capabilities
/// 2. a 2xx response to an outbound POST signed with a given dialect
/// 3. an inbound request received signed in that dialect from the host
pub fn record_observed_dialect(
  conn: &PgConnection,
  host: &str,
  dialect: SignatureDialect,
) -> Result<(), MeridianError> {
  HostCapability::record(conn, host, dialect)
}

/// Decides which dialect to sign an outbound request to `host` with.
///
/// For a host with a known capability row, always uses `best_known()`
/// (highest-priority dialect that has ever worked). For an unknown host,
/// starts on draft but, to avoid every pair of implementations standing off
/// on the lowest common dialect forever, randomly tries the newer dialects
/// with the configured probabilities (§4.4, §4.7).
pub fn choose_dialect(
  conn: &PgConnection,
  host: &str,
  settings: &FederationSettings,
) -> Result<SignatureDialect, MeridianError> {
  match HostCapability::find(conn, host)? {
    Some(row) => Ok(row.best_known()),
    None => Ok(trial_upgrade_dialect(settings, &mut rand::thread_rng())),
  }
}

fn trial_upgrade_dialect(settings: &FederationSettings, rng: &mut impl Rng) -> SignatureDialect {
  let roll: f64 = rng.gen_range(0.0, 1.0);
  if roll < settings.ed25519_threshold {
    SignatureDialect::Rfc9421Ed25519
  } else if roll < settings.ed25519_threshold + settings.rfc9421_threshold {
    SignatureDialect::Rfc9421Rsa
  } else {
    SignatureDialect::CavageDraftRsa
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::mock::StepRng;

  fn settings() -> FederationSettings {
    let mut s = FederationSettings::default();
    s.rfc9421_threshold = 0.5;
    s.ed25519_threshold = 0.25;
    s
  }

  #[test]
  fn test_trial_upgrade_low_roll_picks_ed25519() {
    let mut rng = StepRng::new(0, 0);
    assert_eq!(
      trial_upgrade_dialect(&settings(), &mut rng),
      SignatureDialect::Rfc9421Ed25519
    );
  }

  #[test]
  fn test_trial_upgrade_high_roll_picks_draft() {
    struct AlwaysHigh;
    impl rand::RngCore for AlwaysHigh {
      fn next_u32(&mut self) -> u32 {
        u32::MAX
      }
      fn next_u64(&mut self) -> u64 {
        u64::MAX
      }
      fn fill_bytes(&mut self, dest: &mut [u8]) {
        for b in dest.iter_mut() {
          *b = 0xff;
        }
      }
      fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
      }
    }
    let mut rng = AlwaysHigh;
    assert_eq!(
      trial_upgrade_dialect(&settings(), &mut rng),
      SignatureDialect::CavageDraftRsa
    );
  }

  #[test]
  fn test_best_known_prefers_ed25519_over_rsa() {
    let row = HostCapability {
      host: "example.com".to_string(),
      cavage_draft_rsa: true,
      rfc9421_rsa: true,
      rfc9421_ed25519: true,
      updated_at: chrono::Utc::now().naive_utc(),
    };
    assert_eq!(row.best_known(), SignatureDialect::Rfc9421Ed25519);
  }
}
