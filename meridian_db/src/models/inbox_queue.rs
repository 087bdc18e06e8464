use crate::schema::inbox_queue_entry;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use meridian_utils::MeridianError;

/// Row backing spec §3 "Inbox queue entry". FIFO by `id`; this table is the
/// single source of truth for pending inbound work (§5: "no in-memory
/// queues").
#[derive(Debug, Clone, Queryable, Identifiable)]
#[table_name = "inbox_queue_entry"]
pub struct InboxQueueEntry {
  pub id: i64,
  pub sender_actor_id: String,
  pub activity_json: serde_json::Value,
  pub raw_body: Vec<u8>,
  pub path: Option<String>,
  pub shared: bool,
  pub inserted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "inbox_queue_entry"]
pub struct InboxQueueEntryForm {
  pub sender_actor_id: String,
  pub activity_json: serde_json::Value,
  pub raw_body: Vec<u8>,
  pub path: Option<String>,
  pub shared: bool,
  pub inserted_at: NaiveDateTime,
}

impl InboxQueueEntry {
  pub fn push(conn: &PgConnection, form: &InboxQueueEntryForm) -> Result<InboxQueueEntry, MeridianError> {
    diesel::insert_into(inbox_queue_entry::table)
      .values(form)
      .get_result::<InboxQueueEntry>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn next_batch(conn: &PgConnection, batch_size: i64) -> Result<Vec<InboxQueueEntry>, MeridianError> {
    use crate::schema::inbox_queue_entry::dsl::*;
    inbox_queue_entry
      .order(id.asc())
      .limit(batch_size)
      .load::<InboxQueueEntry>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn delete(conn: &PgConnection, id_: i64) -> Result<usize, MeridianError> {
    use crate::schema::inbox_queue_entry::dsl::*;
    diesel::delete(inbox_queue_entry.filter(id.eq(id_)))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn queue_len(conn: &PgConnection) -> Result<i64, MeridianError> {
    inbox_queue_entry::table
      .count()
      .get_result(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  /// Load-shedding: when the queue exceeds `max_size`, the oldest 10% are
  /// dropped (§4.5).
  pub fn shed_oldest_tenth(conn: &PgConnection, max_size: i64) -> Result<usize, MeridianError> {
    use crate::schema::inbox_queue_entry::dsl::*;
    let current_len = Self::queue_len(conn)?;
    if current_len <= max_size {
      return Ok(0);
    }
    let to_drop = (current_len / 10).max(1);
    let victim_ids: Vec<i64> = inbox_queue_entry
      .select(id)
      .order(id.asc())
      .limit(to_drop)
      .load(conn)
      .map_err(|e| anyhow::Error::from(e))?;
    diesel::delete(inbox_queue_entry.filter(id.eq_any(victim_ids)))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }
}
