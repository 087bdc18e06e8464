#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod models;
pub mod schema;

use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::PgConnection;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<PgConnection>>;

pub fn build_pool(database_url: &str) -> Result<DbPool, meridian_utils::MeridianError> {
  let manager = ConnectionManager::<PgConnection>::new(database_url);
  Pool::builder()
    .build(manager)
    .map_err(|e| anyhow::anyhow!("failed to build db pool: {}", e).into())
}

embed_migrations!();

pub fn run_migrations(conn: &PgConnection) -> Result<(), meridian_utils::MeridianError> {
  embedded_migrations::run(conn).map_err(|e| anyhow::anyhow!("migration failure: {}", e).into())
}

/// Runs a blocking Diesel closure on the blocking thread pool and maps pool
/// and join failures into `MeridianError`, the way the teacher's
/// `crate::blocking(pool, move |conn| ...)` does around `web::block`.
pub async fn blocking<F, T>(pool: &DbPool, f: F) -> Result<T, meridian_utils::MeridianError>
where
  F: FnOnce(&PgConnection) -> T + Send + 'static,
  T: Send + 'static,
{
  let pool = pool.clone();
  tokio::task::spawn_blocking(move || {
    let conn = pool
      .get()
      .map_err(|e| anyhow::anyhow!("could not get db connection: {}", e))?;
    Ok(f(&conn))
  })
  .await
  .map_err(|e| anyhow::anyhow!("blocking task panicked: {}", e))?
}
