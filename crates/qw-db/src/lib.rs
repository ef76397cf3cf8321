//! qw-db
//!
//! Persisted Store for owners, accounts, queues, bindings and queue
//! notification subscribers.
//!
//! - [`Store`] is the async contract the reconciliation engine and CLI use.
//! - [`PgStore`] is the Postgres implementation (sqlx, embedded migrations).

mod pg;
mod store;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

pub use pg::PgStore;
pub use sqlx::PgPool;
pub use store::{Store, StoreError, StoreResult};

pub const ENV_DB_URL: &str = "QW_DATABASE_URL";

/// Open a pool against `url`.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Connect using QW_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url, 5).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connect and migrate, retrying with a fixed delay until both succeed.
///
/// The daemon calls this at startup so it can come up before Postgres does.
pub async fn connect_with_retry(url: &str, max_connections: u32, delay: Duration) -> PgPool {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let result = async {
            let pool = connect(url, max_connections).await?;
            migrate(&pool).await?;
            Ok::<_, anyhow::Error>(pool)
        }
        .await;

        match result {
            Ok(pool) => {
                info!(attempt, "database ready");
                return pool;
            }
            Err(e) => {
                warn!(
                    attempt,
                    retry_in_secs = delay.as_secs(),
                    error = %format!("{e:#}"),
                    "database unavailable; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='queues'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_queues_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_queues_table: bool,
}
