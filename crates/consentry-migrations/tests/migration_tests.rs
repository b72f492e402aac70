use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use sea_orm_migration::MigratorTrait;

use consentry_migrations::Migrator;

/// A single-connection in-memory SQLite database; every pooled connection to
/// `sqlite::memory:` would otherwise see its own empty database.
async fn memory_db() -> anyhow::Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    Ok(Database::connect(opts).await?)
}

async fn table_exists(db: &DatabaseConnection, table: &str) -> anyhow::Result<bool> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            db.get_database_backend(),
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table.into()],
        ))
        .await?;
    let count: i64 = row.map(|r| r.try_get("", "n")).transpose()?.unwrap_or(0);
    Ok(count == 1)
}

const TABLES: [&str; 3] = [
    "webhook_endpoints",
    "webhook_deliveries",
    "rate_limit_counters",
];

#[tokio::test]
async fn test_migration_up() -> anyhow::Result<()> {
    let db = memory_db().await?;

    Migrator::up(&db, None).await?;

    for table in TABLES {
        assert!(table_exists(&db, table).await?, "{} should exist", table);
    }
    Ok(())
}

#[tokio::test]
async fn test_migration_down() -> anyhow::Result<()> {
    let db = memory_db().await?;

    Migrator::up(&db, None).await?;
    Migrator::down(&db, None).await?;

    for table in TABLES {
        assert!(!table_exists(&db, table).await?, "{} should be dropped", table);
    }
    Ok(())
}

#[tokio::test]
async fn test_migration_status() -> anyhow::Result<()> {
    let db = memory_db().await?;

    let pending_before = Migrator::get_pending_migrations(&db).await?;
    assert_eq!(pending_before.len(), 2);

    Migrator::up(&db, None).await?;

    let pending_after = Migrator::get_pending_migrations(&db).await?;
    assert!(
        pending_after.is_empty(),
        "Should have no pending migrations after up"
    );

    // Re-running is a no-op
    Migrator::up(&db, None).await?;
    Ok(())
}

#[tokio::test]
async fn test_delivery_defaults() -> anyhow::Result<()> {
    let db = memory_db().await?;
    Migrator::up(&db, None).await?;

    db.execute_unprepared(
        "INSERT INTO webhook_deliveries (endpoint_id, event_type, payload, created_at, updated_at) \
         VALUES (42, 'bounty.created', '{}', '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
    )
    .await?;

    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "SELECT status, attempts FROM webhook_deliveries WHERE endpoint_id = 42",
        ))
        .await?
        .expect("row inserted");
    let status: String = row.try_get("", "status")?;
    let attempts: i32 = row.try_get("", "attempts")?;
    assert_eq!(status, "pending");
    assert_eq!(attempts, 0);

    // endpoint 42 does not exist; deliveries only weakly reference endpoints
    Ok(())
}
