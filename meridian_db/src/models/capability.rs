use crate::schema::host_capability;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use meridian_utils::MeridianError;

/// Row backing spec §3/§4.7 "Per-host capability record". The three bits
/// are OR'd in, never cleared, so concurrent writers never race each other
/// into a regression (§5).
#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset)]
#[table_name = "host_capability"]
#[primary_key(host)]
pub struct HostCapability {
  pub host: String,
  pub cavage_draft_rsa: bool,
  pub rfc9421_rsa: bool,
  pub rfc9421_ed25519: bool,
  pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureDialect {
  CavageDraftRsa,
  Rfc9421Rsa,
  Rfc9421Ed25519,
}

impl HostCapability {
  pub fn find(conn: &PgConnection, host_: &str) -> Result<Option<HostCapability>, MeridianError> {
    use crate::schema::host_capability::dsl::*;
    host_capability
      .filter(host.eq(host_))
      .first::<HostCapability>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// OR's the given dialect bit into the host's row, creating it if absent.
  pub fn record(conn: &PgConnection, host_: &str, dialect: SignatureDialect) -> Result<(), MeridianError> {
    use crate::schema::host_capability::dsl::*;
    let (cavage, rsa9421, ed9421) = match dialect {
      SignatureDialect::CavageDraftRsa => (true, false, false),
      SignatureDialect::Rfc9421Rsa => (false, true, false),
      SignatureDialect::Rfc9421Ed25519 => (false, false, true),
    };
    diesel::insert_into(host_capability)
      .values((
        host.eq(host_),
        cavage_draft_rsa.eq(cavage),
        rfc9421_rsa.eq(rsa9421),
        rfc9421_ed25519.eq(ed9421),
        updated_at.eq(Utc::now().naive_utc()),
      ))
      .on_conflict(host)
      .do_update()
      .set((
        cavage_draft_rsa.eq(cavage_draft_rsa.or(cavage)),
        rfc9421_rsa.eq(rfc9421_rsa.or(rsa9421)),
        rfc9421_ed25519.eq(rfc9421_ed25519.or(ed9421)),
        updated_at.eq(Utc::now().naive_utc()),
      ))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e))?;
    Ok(())
  }

  /// Highest-priority dialect known to work for this host, preferring
  /// RFC-9421/Ed25519 > RFC-9421/RSA > draft/RSA.
  pub fn best_known(&self) -> SignatureDialect {
    if self.rfc9421_ed25519 {
      SignatureDialect::Rfc9421Ed25519
    } else if self.rfc9421_rsa {
      SignatureDialect::Rfc9421Rsa
    } else {
      SignatureDialect::CavageDraftRsa
    }
  }
}
