use crate::schema::actor;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use meridian_utils::MeridianError;

/// Row backing spec §3 "Actor". Both `Person` and `Group` share this table,
/// distinguished by `actor_type`; local rows additionally carry the private
/// key columns (invariant: every **portable** actor, local or remote, has
/// both an RSA and an Ed25519 key — see `meridian_federation::identity`).
#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset)]
#[table_name = "actor"]
pub struct Actor {
  pub id: i32,
  pub canonical_id: String,
  pub preferred_username: Option<String>,
  pub host: String,
  pub actor_type: String,
  pub inbox_url: String,
  pub shared_inbox_url: Option<String>,
  pub followers_url: Option<String>,
  pub public_key_pem: Option<String>,
  pub ed25519_multikey: Option<String>,
  pub private_key_pem: Option<String>,
  pub private_ed25519_key: Option<String>,
  pub moved_to: Option<String>,
  pub also_known_as: Vec<String>,
  pub manually_approves_followers: bool,
  pub suspended: bool,
  pub icon_url: Option<String>,
  pub gateways: Vec<String>,
  pub local: bool,
  pub last_refreshed_at: NaiveDateTime,
  pub last_refresh_failed_at: Option<NaiveDateTime>,
  pub published: NaiveDateTime,
  pub updated: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "actor"]
pub struct ActorForm {
  pub canonical_id: String,
  pub preferred_username: Option<String>,
  pub host: String,
  pub actor_type: String,
  pub inbox_url: String,
  pub shared_inbox_url: Option<String>,
  pub followers_url: Option<String>,
  pub public_key_pem: Option<String>,
  pub ed25519_multikey: Option<String>,
  pub private_key_pem: Option<String>,
  pub private_ed25519_key: Option<String>,
  pub moved_to: Option<String>,
  pub also_known_as: Vec<String>,
  pub manually_approves_followers: bool,
  pub suspended: bool,
  pub icon_url: Option<String>,
  pub gateways: Vec<String>,
  pub local: bool,
  pub last_refreshed_at: NaiveDateTime,
}

impl Actor {
  pub fn find_by_canonical_id(
    conn: &PgConnection,
    canonical_id_: &str,
  ) -> Result<Option<Actor>, MeridianError> {
    use crate::schema::actor::dsl::*;
    actor
      .filter(canonical_id.eq(canonical_id_))
      .first::<Actor>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn find_local_by_username(
    conn: &PgConnection,
    host_: &str,
    username: &str,
  ) -> Result<Option<Actor>, MeridianError> {
    use crate::schema::actor::dsl::*;
    actor
      .filter(host.eq(host_))
      .filter(preferred_username.eq(username))
      .filter(local.eq(true))
      .first::<Actor>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn find_all_local(conn: &PgConnection) -> Result<Vec<Actor>, MeridianError> {
    use crate::schema::actor::dsl::*;
    actor
      .filter(local.eq(true))
      .load::<Actor>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// Actors that have announced a move and not yet been deleted, the
  /// Mover worker's input set (§4.9).
  pub fn find_moved(conn: &PgConnection) -> Result<Vec<Actor>, MeridianError> {
    use crate::schema::actor::dsl::*;
    actor
      .filter(moved_to.is_not_null())
      .load::<Actor>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// Upsert on `canonical_id`. Concurrent fetches of the same remote actor
  /// may race; one wins on primary-key conflict, which is fine because the
  /// write is idempotent (§5, "Shared-resource discipline").
  pub fn upsert(conn: &PgConnection, form: &ActorForm) -> Result<Actor, MeridianError> {
    use crate::schema::actor::dsl::*;
    diesel::insert_into(actor)
      .values(form)
      .on_conflict(canonical_id)
      .do_update()
      .set((
        preferred_username.eq(&form.preferred_username),
        inbox_url.eq(&form.inbox_url),
        shared_inbox_url.eq(&form.shared_inbox_url),
        followers_url.eq(&form.followers_url),
        public_key_pem.eq(&form.public_key_pem),
        ed25519_multikey.eq(&form.ed25519_multikey),
        moved_to.eq(&form.moved_to),
        also_known_as.eq(&form.also_known_as),
        manually_approves_followers.eq(form.manually_approves_followers),
        suspended.eq(form.suspended),
        icon_url.eq(&form.icon_url),
        gateways.eq(&form.gateways),
        last_refreshed_at.eq(form.last_refreshed_at),
        updated.eq(Some(Utc::now().naive_utc())),
      ))
      .get_result::<Actor>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn mark_refresh_failed(conn: &PgConnection, canonical_id_: &str) -> Result<(), MeridianError> {
    use crate::schema::actor::dsl::*;
    diesel::update(actor.filter(canonical_id.eq(canonical_id_)))
      .set(last_refresh_failed_at.eq(Some(Utc::now().naive_utc())))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e))?;
    Ok(())
  }

  pub fn delete_by_canonical_id(conn: &PgConnection, canonical_id_: &str) -> Result<usize, MeridianError> {
    use crate::schema::actor::dsl::*;
    diesel::delete(actor.filter(canonical_id.eq(canonical_id_)))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn is_stale(&self, ttl: chrono::Duration) -> bool {
    Utc::now().naive_utc() - self.last_refreshed_at > ttl
  }

  pub fn negatively_cached(&self, retry_interval: chrono::Duration) -> bool {
    match self.last_refresh_failed_at {
      Some(failed_at) => Utc::now().naive_utc() - failed_at < retry_interval,
      None => false,
    }
  }
}
