//! Persistent store for contacts, conversations, messages and campaigns.

pub mod error;
pub mod sqlite;
pub mod store;
pub mod types;

pub use {
    error::{Error, Result},
    sqlite::SqliteStore,
    store::Store,
    types::*,
};

/// Run database migrations for the store.
///
/// Creates every table used by parley. Called by [`SqliteStore::connect`] and
/// by `parley db migrate`.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
