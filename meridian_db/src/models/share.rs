use crate::schema::share;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use meridian_utils::MeridianError;

/// Row backing a recorded `Announce` share edge (spec §4.5 Create/Announce,
/// §4.5 Undo(Announce)).
#[derive(Debug, Clone, Queryable, Identifiable)]
#[table_name = "share"]
pub struct Share {
  pub id: i32,
  pub object_canonical_id: String,
  pub actor_canonical_id: String,
  pub announce_activity_id: String,
  pub inserted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "share"]
pub struct ShareForm {
  pub object_canonical_id: String,
  pub actor_canonical_id: String,
  pub announce_activity_id: String,
  pub inserted_at: NaiveDateTime,
}

impl Share {
  pub fn insert(conn: &PgConnection, form: &ShareForm) -> Result<Share, MeridianError> {
    diesel::insert_into(share::table)
      .values(form)
      .get_result::<Share>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn find_by_announce_id(
    conn: &PgConnection,
    announce_activity_id_: &str,
  ) -> Result<Option<Share>, MeridianError> {
    use crate::schema::share::dsl::*;
    share
      .filter(announce_activity_id.eq(announce_activity_id_))
      .first::<Share>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn delete_by_announce_id(conn: &PgConnection, announce_activity_id_: &str) -> Result<usize, MeridianError> {
    use crate::schema::share::dsl::*;
    diesel::delete(share.filter(announce_activity_id.eq(announce_activity_id_)))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// §4.5 Delete: shares of a deleted object cannot remain announced.
  pub fn delete_by_object_id(conn: &PgConnection, object_canonical_id_: &str) -> Result<usize, MeridianError> {
    use crate::schema::share::dsl::*;
    diesel::delete(share.filter(object_canonical_id.eq(object_canonical_id_)))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }
}
