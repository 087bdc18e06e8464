use crate::schema::follow_edge;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use meridian_utils::MeridianError;

/// Row backing spec §3 "Follow edge". Unique on (follower, followed).
#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset)]
#[table_name = "follow_edge"]
pub struct FollowEdge {
  pub id: i32,
  pub follower_actor_id: String,
  pub followed_actor_id: String,
  pub follow_activity_id: String,
  pub accepted: Option<bool>,
  pub inserted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "follow_edge"]
pub struct FollowEdgeForm {
  pub follower_actor_id: String,
  pub followed_actor_id: String,
  pub follow_activity_id: String,
  pub accepted: Option<bool>,
  pub inserted_at: NaiveDateTime,
}

impl FollowEdge {
  pub fn find(
    conn: &PgConnection,
    follower: &str,
    followed: &str,
  ) -> Result<Option<FollowEdge>, MeridianError> {
    use crate::schema::follow_edge::dsl;
    follow_edge::table
      .filter(dsl::follower_actor_id.eq(follower))
      .filter(dsl::followed_actor_id.eq(followed))
      .first::<FollowEdge>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn find_by_follow_activity_id(
    conn: &PgConnection,
    follow_activity_id_: &str,
  ) -> Result<Option<FollowEdge>, MeridianError> {
    use crate::schema::follow_edge::dsl::*;
    follow_edge
      .filter(follow_activity_id.eq(follow_activity_id_))
      .first::<FollowEdge>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// Upsert keyed on (follower, followed); a re-`Follow` from the same
  /// pair refreshes the follow ID (§4.5) rather than erroring.
  pub fn upsert(conn: &PgConnection, form: &FollowEdgeForm) -> Result<FollowEdge, MeridianError> {
    diesel::insert_into(follow_edge::table)
      .values(form)
      .on_conflict((
        follow_edge::follower_actor_id,
        follow_edge::followed_actor_id,
      ))
      .do_update()
      .set((
        follow_edge::follow_activity_id.eq(&form.follow_activity_id),
      ))
      .get_result::<FollowEdge>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn set_accepted(
    conn: &PgConnection,
    follow_activity_id_: &str,
    accepted_: bool,
  ) -> Result<usize, MeridianError> {
    use crate::schema::follow_edge::dsl::*;
    diesel::update(follow_edge.filter(follow_activity_id.eq(follow_activity_id_)))
      .set(accepted.eq(Some(accepted_)))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn clear_accepted(conn: &PgConnection, follower: &str, followed: &str) -> Result<usize, MeridianError> {
    use crate::schema::follow_edge::dsl;
    diesel::update(
      follow_edge::table
        .filter(dsl::follower_actor_id.eq(follower))
        .filter(dsl::followed_actor_id.eq(followed)),
    )
    .set(dsl::accepted.eq(Option::<bool>::None))
    .execute(conn)
    .map_err(|e| anyhow::Error::from(e).into())
  }

  /// §4.9 Collection-Synchronization: a changed digest from `followed`
  /// means our belief that we're still an accepted follower can no longer
  /// be trusted, so every edge into it is knocked back to unconfirmed.
  pub fn clear_accepted_for_followed(conn: &PgConnection, followed: &str) -> Result<usize, MeridianError> {
    use crate::schema::follow_edge::dsl;
    diesel::update(follow_edge::table.filter(dsl::followed_actor_id.eq(followed)))
      .set(dsl::accepted.eq(Option::<bool>::None))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn delete(conn: &PgConnection, follower: &str, followed: &str) -> Result<usize, MeridianError> {
    use crate::schema::follow_edge::dsl;
    diesel::delete(
      follow_edge::table
        .filter(dsl::follower_actor_id.eq(follower))
        .filter(dsl::followed_actor_id.eq(followed)),
    )
    .execute(conn)
    .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn followers_of(conn: &PgConnection, followed: &str) -> Result<Vec<FollowEdge>, MeridianError> {
    use crate::schema::follow_edge::dsl;
    follow_edge::table
      .filter(dsl::followed_actor_id.eq(followed))
      .filter(dsl::accepted.eq(Some(true)))
      .load::<FollowEdge>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn local_follows_of_remote_host(
    conn: &PgConnection,
    followed_host_prefix: &str,
  ) -> Result<Vec<FollowEdge>, MeridianError> {
    use crate::schema::follow_edge::dsl;
    follow_edge::table
      .filter(dsl::followed_actor_id.like(format!("{}%", followed_host_prefix)))
      .load::<FollowEdge>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }
}
