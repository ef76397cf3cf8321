//! Postgres implementation of [`Store`].
//!
//! Multi-statement operations (account creation with owner links, ordered
//! deletes) run inside one transaction each. Single-statement writes rely on
//! Postgres statement atomicity.

use async_trait::async_trait;
use qw_schemas::{normalize_email, Account, BindingRecord, Owner, QueueRecord};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::store::{Store, StoreError, StoreResult};

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            // unique_violation
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn owner_from_row(row: &PgRow) -> Result<Owner, sqlx::Error> {
    Ok(Owner {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        admin: row.try_get("admin")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
    })
}

fn queue_from_row(row: &PgRow) -> Result<QueueRecord, sqlx::Error> {
    Ok(QueueRecord {
        name: row.try_get("name")?,
        account_id: row.try_get("account_id")?,
        size: row.try_get("size")?,
        durable: row.try_get("durable")?,
        unbounded: row.try_get("unbounded")?,
        warned: row.try_get("warned")?,
    })
}

fn binding_from_row(row: &PgRow) -> Result<BindingRecord, sqlx::Error> {
    Ok(BindingRecord {
        exchange: row.try_get("exchange")?,
        routing_key: row.try_get("routing_key")?,
        queue_name: row.try_get("queue_name")?,
    })
}

fn expect_one(affected: u64, entity: &'static str, key: impl Into<String>) -> StoreResult<()> {
    if affected == 0 {
        return Err(StoreError::not_found(entity, key));
    }
    Ok(())
}

const QUEUE_COLUMNS: &str = "name, account_id, size, durable, unbounded, warned";

#[async_trait]
impl Store for PgStore {
    async fn create_owner(&self, email: &str, admin: bool) -> StoreResult<Owner> {
        let row = sqlx::query(
            r#"
            insert into owners (email, admin)
            values ($1, $2)
            returning id, email, admin
            "#,
        )
        .bind(normalize_email(email))
        .bind(admin)
        .fetch_one(&self.pool)
        .await?;
        Ok(owner_from_row(&row)?)
    }

    async fn owner_by_email(&self, email: &str) -> StoreResult<Option<Owner>> {
        let row = sqlx::query("select id, email, admin from owners where email = $1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(owner_from_row).transpose()?)
    }

    async fn list_owners(&self) -> StoreResult<Vec<Owner>> {
        let rows = sqlx::query("select id, email, admin from owners order by id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(owner_from_row).collect::<Result<_, _>>()?)
    }

    async fn admin_owners(&self) -> StoreResult<Vec<Owner>> {
        let rows = sqlx::query("select id, email, admin from owners where admin order by id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(owner_from_row).collect::<Result<_, _>>()?)
    }

    async fn set_owner_admin(&self, owner_id: i64, admin: bool) -> StoreResult<()> {
        let r = sqlx::query("update owners set admin = $2 where id = $1")
            .bind(owner_id)
            .bind(admin)
            .execute(&self.pool)
            .await?;
        expect_one(r.rows_affected(), "owner", owner_id.to_string())
    }

    async fn delete_owner(&self, owner_id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("delete from account_owners where owner_id = $1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        let r = sqlx::query("delete from owners where id = $1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        expect_one(r.rows_affected(), "owner", owner_id.to_string())?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_account(&self, username: &str, owner_ids: &[i64]) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("insert into accounts (username) values ($1) returning id, username")
            .bind(username)
            .fetch_one(&mut *tx)
            .await?;
        let account = account_from_row(&row)?;
        for owner_id in owner_ids {
            sqlx::query(
                r#"
                insert into account_owners (account_id, owner_id)
                values ($1, $2)
                on conflict do nothing
                "#,
            )
            .bind(account.id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(account)
    }

    async fn account_by_id(&self, account_id: i64) -> StoreResult<Option<Account>> {
        let row = sqlx::query("select id, username from accounts where id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn account_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query("select id, username from accounts where username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query("select id, username from accounts order by username")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(account_from_row).collect::<Result<_, _>>()?)
    }

    async fn account_owners(&self, account_id: i64) -> StoreResult<Vec<Owner>> {
        let rows = sqlx::query(
            r#"
            select o.id, o.email, o.admin
            from owners o
            join account_owners ao on ao.owner_id = o.id
            where ao.account_id = $1
            order by o.id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(owner_from_row).collect::<Result<_, _>>()?)
    }

    async fn add_account_owner(&self, account_id: i64, owner_id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into account_owners (account_id, owner_id)
            values ($1, $2)
            on conflict do nothing
            "#,
        )
        .bind(account_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_account_owner(&self, account_id: i64, owner_id: i64) -> StoreResult<()> {
        sqlx::query("delete from account_owners where account_id = $1 and owner_id = $2")
            .bind(account_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn account_queues(&self, account_id: i64) -> StoreResult<Vec<QueueRecord>> {
        let rows = sqlx::query(&format!(
            "select {QUEUE_COLUMNS} from queues where account_id = $1 order by name"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(queue_from_row).collect::<Result<_, _>>()?)
    }

    async fn delete_account(&self, account_id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "delete from bindings where queue_name in (select name from queues where account_id = $1)",
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "delete from queue_notifications where queue_name in (select name from queues where account_id = $1)",
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("delete from queues where account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("delete from account_owners where account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        let r = sqlx::query("delete from accounts where id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        expect_one(r.rows_affected(), "account", account_id.to_string())?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_queue(&self, queue: &QueueRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into queues (name, account_id, size, durable, unbounded, warned)
            values ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&queue.name)
        .bind(queue.account_id)
        .bind(queue.size)
        .bind(queue.durable)
        .bind(queue.unbounded)
        .bind(queue.warned)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn queue_by_name(&self, name: &str) -> StoreResult<Option<QueueRecord>> {
        let row = sqlx::query(&format!("select {QUEUE_COLUMNS} from queues where name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(queue_from_row).transpose()?)
    }

    async fn list_queues(&self) -> StoreResult<Vec<QueueRecord>> {
        let rows = sqlx::query(&format!("select {QUEUE_COLUMNS} from queues order by name"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(queue_from_row).collect::<Result<_, _>>()?)
    }

    async fn update_queue_stats(&self, name: &str, size: i64, durable: bool) -> StoreResult<()> {
        let r = sqlx::query("update queues set size = $2, durable = $3 where name = $1")
            .bind(name)
            .bind(size)
            .bind(durable)
            .execute(&self.pool)
            .await?;
        expect_one(r.rows_affected(), "queue", name)
    }

    async fn set_queue_warned(&self, name: &str, warned: bool) -> StoreResult<()> {
        let r = sqlx::query("update queues set warned = $2 where name = $1")
            .bind(name)
            .bind(warned)
            .execute(&self.pool)
            .await?;
        expect_one(r.rows_affected(), "queue", name)
    }

    async fn set_queue_unbounded(&self, name: &str, unbounded: bool) -> StoreResult<()> {
        let r = sqlx::query("update queues set unbounded = $2 where name = $1")
            .bind(name)
            .bind(unbounded)
            .execute(&self.pool)
            .await?;
        expect_one(r.rows_affected(), "queue", name)
    }

    async fn delete_queue(&self, name: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("delete from bindings where queue_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("delete from queue_notifications where queue_name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("delete from queues where name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn queue_bindings(&self, queue_name: &str) -> StoreResult<Vec<BindingRecord>> {
        let rows = sqlx::query(
            r#"
            select exchange, routing_key, queue_name
            from bindings
            where queue_name = $1
            order by exchange, routing_key
            "#,
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(binding_from_row).collect::<Result<_, _>>()?)
    }

    async fn add_binding(&self, binding: &BindingRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into bindings (exchange, routing_key, queue_name)
            values ($1, $2, $3)
            on conflict (queue_name, exchange, routing_key) do nothing
            "#,
        )
        .bind(&binding.exchange)
        .bind(&binding.routing_key)
        .bind(&binding.queue_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_binding(&self, binding: &BindingRecord) -> StoreResult<()> {
        sqlx::query(
            "delete from bindings where queue_name = $1 and exchange = $2 and routing_key = $3",
        )
        .bind(&binding.queue_name)
        .bind(&binding.exchange)
        .bind(&binding.routing_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn queue_notifications(&self, queue_name: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "select email from queue_notifications where queue_name = $1 order by email",
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<String, _>("email"))
            .collect::<Result<_, _>>()?)
    }

    async fn add_queue_notification(&self, queue_name: &str, email: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into queue_notifications (queue_name, email)
            values ($1, $2)
            on conflict do nothing
            "#,
        )
        .bind(queue_name)
        .bind(normalize_email(email))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_queue_notification(&self, queue_name: &str, email: &str) -> StoreResult<()> {
        sqlx::query("delete from queue_notifications where queue_name = $1 and email = $2")
            .bind(queue_name)
            .bind(normalize_email(email))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
