/// Migrating twice must be idempotent.
///
/// DB-backed test, skipped if QW_DATABASE_URL is not set.
#[tokio::test]
async fn migrate_idempotent_on_clean_db() -> anyhow::Result<()> {
    let url = match std::env::var(qw_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: QW_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = qw_db::connect(&url, 2).await?;

    qw_db::migrate(&pool).await?;
    qw_db::migrate(&pool).await?;

    let st = qw_db::status(&pool).await?;
    assert!(st.ok);
    assert!(st.has_queues_table);

    Ok(())
}
