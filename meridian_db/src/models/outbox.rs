use crate::schema::{outbox_delivery, outbox_entry};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use meridian_utils::MeridianError;

/// Row backing spec §3 "Outbox entry". Inserted in the same transaction
/// that mutates the state it describes, so the row's view of that state is
/// always transactionally consistent (§4.6, §5).
#[derive(Debug, Clone, Queryable, Identifiable, AsChangeset)]
#[table_name = "outbox_entry"]
pub struct OutboxEntry {
  pub id: i32,
  pub canonical_id: String,
  pub sender_actor_id: String,
  pub activity_json: serde_json::Value,
  pub host: Option<String>,
  pub inserted_at: NaiveDateTime,
  pub attempts: i32,
  pub last_attempt_at: Option<NaiveDateTime>,
  pub sent: bool,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "outbox_entry"]
pub struct OutboxEntryForm {
  pub canonical_id: String,
  pub sender_actor_id: String,
  pub activity_json: serde_json::Value,
  pub host: Option<String>,
  pub inserted_at: NaiveDateTime,
  pub attempts: i32,
  pub sent: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[table_name = "outbox_delivery"]
pub struct OutboxDelivery {
  pub id: i32,
  pub outbox_entry_id: i32,
  pub inbox_url: String,
  pub succeeded: bool,
  pub attempts: i32,
  pub last_attempt_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "outbox_delivery"]
pub struct OutboxDeliveryForm {
  pub outbox_entry_id: i32,
  pub inbox_url: String,
  pub succeeded: bool,
  pub attempts: i32,
}

impl OutboxEntry {
  /// Enqueue refuses new rows once the unsent distinct-cid count reaches
  /// `max_delivery_queue_size` (§4.6, default 128).
  pub fn enqueue(
    conn: &PgConnection,
    form: &OutboxEntryForm,
    max_delivery_queue_size: usize,
  ) -> Result<OutboxEntry, MeridianError> {
    use crate::schema::outbox_entry::dsl::*;
    let unsent_count: i64 = outbox_entry
      .filter(sender_actor_id.eq(&form.sender_actor_id))
      .filter(sent.eq(false))
      .count()
      .get_result(conn)
      .map_err(|e| anyhow::Error::from(e))?;
    if unsent_count as usize >= max_delivery_queue_size {
      return Err(
        meridian_utils::MeridianError::with_kind(
          anyhow::anyhow!(
            "delivery queue full for {} ({} unsent >= {})",
            form.sender_actor_id,
            unsent_count,
            max_delivery_queue_size
          ),
          meridian_utils::MeridianErrorKind::ResourceBoundedRejection,
        ),
      );
    }
    // Recipient set of zero recipients is represented by the caller passing
    // `sent: true` directly in `form` — short-circuit per §4.6.
    diesel::insert_into(outbox_entry)
      .values(form)
      .on_conflict((canonical_id, sender_actor_id))
      .do_nothing()
      .get_result::<OutboxEntry>(conn)
      .or_else(|_| {
        outbox_entry
          .filter(canonical_id.eq(&form.canonical_id))
          .filter(sender_actor_id.eq(&form.sender_actor_id))
          .first::<OutboxEntry>(conn)
      })
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn unsent_deliverable(
    conn: &PgConnection,
    max_attempts: i32,
    limit: i64,
  ) -> Result<Vec<OutboxEntry>, MeridianError> {
    use crate::schema::outbox_entry::dsl::*;
    outbox_entry
      .filter(sent.eq(false))
      .filter(attempts.lt(max_attempts))
      .order(inserted_at.asc())
      .limit(limit)
      .load::<OutboxEntry>(conn)
      .map_err(|e| anyhow::Error::from(e).into())
  }

  pub fn record_attempt(conn: &PgConnection, id_: i32) -> Result<(), MeridianError> {
    use crate::schema::outbox_entry::dsl::*;
    diesel::update(outbox_entry.filter(id.eq(id_)))
      .set((
        attempts.eq(attempts + 1),
        last_attempt_at.eq(Some(Utc::now().naive_utc())),
      ))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e))?;
    Ok(())
  }

  pub fn mark_sent(conn: &PgConnection, id_: i32) -> Result<(), MeridianError> {
    use crate::schema::outbox_entry::dsl::*;
    diesel::update(outbox_entry.filter(id.eq(id_)))
      .set(sent.eq(true))
      .execute(conn)
      .map_err(|e| anyhow::Error::from(e))?;
    Ok(())
  }

  /// Garbage-collects exhausted, aged-out rows (§4.6 "Backpressure").
  pub fn gc_expired(
    conn: &PgConnection,
    max_attempts: i32,
    retention: chrono::Duration,
  ) -> Result<usize, MeridianError> {
    use crate::schema::outbox_entry::dsl::*;
    let cutoff = Utc::now().naive_utc() - retention;
    diesel::delete(
      outbox_entry
        .filter(sent.eq(false))
        .filter(attempts.ge(max_attempts))
        .filter(inserted_at.lt(cutoff)),
    )
    .execute(conn)
    .map_err(|e| anyhow::Error::from(e).into())
  }
}

impl OutboxDelivery {
  pub fn upsert_result(
    conn: &PgConnection,
    outbox_entry_id_: i32,
    inbox_url_: &str,
    succeeded_: bool,
  ) -> Result<OutboxDelivery, MeridianError> {
    use crate::schema::outbox_delivery::dsl::*;
    let existing = outbox_delivery
      .filter(outbox_entry_id.eq(outbox_entry_id_))
      .filter(inbox_url.eq(inbox_url_))
      .first::<OutboxDelivery>(conn)
      .optional()
      .map_err(|e| anyhow::Error::from(e))?;
    match existing {
      Some(row) => {
        diesel::update(outbox_delivery.find(row.id))
          .set((
            succeeded.eq(succeeded_ || row.succeeded),
            attempts.eq(attempts + 1),
            last_attempt_at.eq(Some(Utc::now().naive_utc())),
          ))
          .get_result::<OutboxDelivery>(conn)
          .map_err(|e| anyhow::Error::from(e).into())
      }
      None => diesel::insert_into(outbox_delivery)
        .values(OutboxDeliveryForm {
          outbox_entry_id: outbox_entry_id_,
          inbox_url: inbox_url_.to_string(),
          succeeded: succeeded_,
          attempts: 1,
        })
        .get_result::<OutboxDelivery>(conn)
        .map_err(|e| anyhow::Error::from(e).into()),
    }
  }

  /// All destinations have either succeeded or exhausted attempts.
  pub fn all_resolved(
    conn: &PgConnection,
    outbox_entry_id_: i32,
    max_attempts: i32,
  ) -> Result<bool, MeridianError> {
    use crate::schema::outbox_delivery::dsl::*;
    let unresolved: i64 = outbox_delivery
      .filter(outbox_entry_id.eq(outbox_entry_id_))
      .filter(succeeded.eq(false))
      .filter(attempts.lt(max_attempts))
      .count()
      .get_result(conn)
      .map_err(|e| anyhow::Error::from(e))?;
    Ok(unresolved == 0)
  }
}
