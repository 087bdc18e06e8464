use crate::schema::followers_sync_state;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use meridian_utils::MeridianError;

/// Row backing FEP-8fcf Collection-Synchronization state: the last digest
/// a local actor's followers collection was known to hash to on a given
/// remote host, so a mismatch on delivery (or a periodic sweep) can tell
/// apart "nothing changed" from "this remote is behind" (§4.9).
#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset)]
#[table_name = "followers_sync_state"]
pub struct FollowersSyncState {
  pub id: i32,
  pub local_actor_id: String,
  pub remote_host: String,
  pub last_digest: String,
  pub synced_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "followers_sync_state"]
pub struct FollowersSyncStateForm {
  pub local_actor_id: String,
  pub remote_host: String,
  pub last_digest: String,
  pub synced_at: NaiveDateTime,
}

impl FollowersSyncState {
  pub fn find(
    conn: &PgConnection,
    local_actor_id_: &str,
    remote_host_: &str,
  ) -> Result<Option<FollowersSyncState>, MeridianError> {
    use crate::schema::followers_sync_state::dsl::*;
    followers_sync_state
      .filter(local_actor_id.eq(local_actor_id_))
      .filter(remote_host.eq(remote_host_))
      .first::<FollowersSyncState>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn upsert(conn: &PgConnection, form: &FollowersSyncStateForm) -> Result<FollowersSyncState, MeridianError> {
    use crate::schema::followers_sync_state::dsl::*;
    diesel::insert_into(followers_sync_state)
      .values(form)
      .on_conflict((local_actor_id, remote_host))
      .do_update()
      .set((last_digest.eq(&form.last_digest), synced_at.eq(form.synced_at)))
      .get_result::<FollowersSyncState>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn due_for_sweep(conn: &PgConnection, cutoff: NaiveDateTime) -> Result<Vec<FollowersSyncState>, MeridianError> {
    use crate::schema::followers_sync_state::dsl::*;
    followers_sync_state
      .filter(synced_at.lt(cutoff))
      .load::<FollowersSyncState>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }
}
