use crate::schema::object;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use meridian_utils::MeridianError;

/// Row backing spec §3 "Object" and the thread-node concept of §3/§4.8.
/// `in_reply_to` is stored as a plain ID string and resolved on demand —
/// never as an owning back-pointer — per §9 ("Cyclic references in
/// threads... store parent as an ID string").
#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset)]
#[table_name = "object"]
pub struct Object {
  pub id: i32,
  pub canonical_id: String,
  pub object_type: String,
  pub attributed_to: String,
  pub in_reply_to: Option<String>,
  pub content: Option<String>,
  pub summary: Option<String>,
  pub sensitive: bool,
  pub to_audience: Vec<String>,
  pub cc_audience: Vec<String>,
  pub group_audience: Option<String>,
  pub raw_json: serde_json::Value,
  pub poll_end_time: Option<NaiveDateTime>,
  pub poll_closed_at: Option<NaiveDateTime>,
  pub poll_voters_count: Option<i32>,
  pub has_update_history: bool,
  pub deleted: bool,
  pub published: NaiveDateTime,
  pub updated: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "object"]
pub struct ObjectForm {
  pub canonical_id: String,
  pub object_type: String,
  pub attributed_to: String,
  pub in_reply_to: Option<String>,
  pub content: Option<String>,
  pub summary: Option<String>,
  pub sensitive: bool,
  pub to_audience: Vec<String>,
  pub cc_audience: Vec<String>,
  pub group_audience: Option<String>,
  pub raw_json: serde_json::Value,
  pub poll_end_time: Option<NaiveDateTime>,
  pub published: NaiveDateTime,
}

impl Object {
  pub fn find_by_canonical_id(
    conn: &PgConnection,
    canonical_id_: &str,
  ) -> Result<Option<Object>, MeridianError> {
    use crate::schema::object::dsl::*;
    object
      .filter(canonical_id.eq(canonical_id_))
      .first::<Object>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn insert(conn: &PgConnection, form: &ObjectForm) -> Result<Object, MeridianError> {
    diesel::insert_into(object::table)
      .values(form)
      .get_result::<Object>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// §4.5 Update: refuses unless the new `updated` is strictly newer, with
  /// an explicit exception for poll vote-count refreshes which are allowed
  /// to arrive with an equal timestamp.
  pub fn apply_update(
    conn: &PgConnection,
    existing: &Object,
    new_raw: serde_json::Value,
    new_content: Option<String>,
    new_updated: NaiveDateTime,
    is_poll_tally_refresh: bool,
    new_group_audience: Option<String>,
  ) -> Result<Object, MeridianError> {
    use crate::schema::object::dsl::*;
    let newer_or_equal_allowed = match existing.updated {
      Some(prev) => {
        if is_poll_tally_refresh {
          new_updated >= prev
        } else {
          new_updated > prev
        }
      }
      None => true,
    };
    if !newer_or_equal_allowed {
      return Err(
        anyhow::anyhow!(
          "stale Update for {}: {} is not newer than {:?}",
          existing.canonical_id,
          new_updated,
          existing.updated
        )
        .into(),
      );
    }
    diesel::update(object.find(existing.id))
      .set((
        content.eq(new_content),
        raw_json.eq(new_raw),
        has_update_history.eq(true),
        updated.eq(Some(new_updated)),
        group_audience.eq(new_group_audience),
      ))
      .get_result::<Object>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// §4.10: persists the Group an `Announce` was issued on behalf of as the
  /// post's `audience`.
  pub fn set_group_audience(conn: &PgConnection, canonical_id_: &str, group_canonical_id: &str) -> Result<usize, MeridianError> {
    use crate::schema::object::dsl::*;
    diesel::update(object.filter(canonical_id.eq(canonical_id_)))
      .set(group_audience.eq(Some(group_canonical_id.to_string())))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn apply_poll_closure(
    conn: &PgConnection,
    existing: &Object,
    new_raw: serde_json::Value,
    voters_count: i32,
    closed_at: NaiveDateTime,
  ) -> Result<Object, MeridianError> {
    use crate::schema::object::dsl::*;
    diesel::update(object.find(existing.id))
      .set((
        raw_json.eq(new_raw),
        poll_voters_count.eq(Some(voters_count)),
        poll_closed_at.eq(Some(closed_at)),
        has_update_history.eq(true),
        updated.eq(Some(closed_at)),
      ))
      .get_result::<Object>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// §4.5 Delete: soft-deletes the object row and cascades to its derived
  /// `Share` rows (a deleted object cannot remain announced).
  pub fn mark_deleted(conn: &PgConnection, canonical_id_: &str) -> Result<usize, MeridianError> {
    use crate::schema::object::dsl::*;
    let updated_rows = diesel::update(object.filter(canonical_id.eq(canonical_id_)))
      .set((deleted.eq(true), updated.eq(Some(Utc::now().naive_utc()))))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())?;
    crate::models::share::Share::delete_by_object_id(conn, canonical_id_)?;
    Ok(updated_rows)
  }

  pub fn by_author(conn: &PgConnection, author_canonical_id: &str, limit: i64) -> Result<Vec<Object>, MeridianError> {
    use crate::schema::object::dsl::*;
    object
      .filter(attributed_to.eq(author_canonical_id))
      .filter(deleted.eq(false))
      .order(published.desc())
      .limit(limit)
      .load::<Object>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn replies_to(conn: &PgConnection, parent_canonical_id: &str) -> Result<Vec<Object>, MeridianError> {
    use crate::schema::object::dsl::*;
    object
      .filter(in_reply_to.eq(parent_canonical_id))
      .filter(deleted.eq(false))
      .load::<Object>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn due_for_poll_closure(conn: &PgConnection, now: NaiveDateTime) -> Result<Vec<Object>, MeridianError> {
    use crate::schema::object::dsl::*;
    object
      .filter(poll_end_time.is_not_null())
      .filter(poll_end_time.le(now))
      .filter(poll_closed_at.is_null())
      .filter(deleted.eq(false))
      .load::<Object>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }
}
