//! Test utilities for database integration tests
//!
//! Every `TestDatabase` is a private in-memory SQLite database, so tests in
//! any crate can run in parallel without sharing state.

use crate::DbConnection;
use consentry_migrations::Migrator;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;

pub struct TestDatabase {
    pub db: Arc<DbConnection>,
}

impl TestDatabase {
    /// Empty database with no schema
    pub async fn new() -> anyhow::Result<Self> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let db = Database::connect(opt).await?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Database with every migration applied
    pub async fn with_migrations() -> anyhow::Result<Self> {
        let test_db = Self::new().await?;
        Migrator::up(test_db.db.as_ref(), None).await?;
        Ok(test_db)
    }

    /// Execute raw SQL query for testing
    pub async fn execute_sql(&self, sql: &str) -> anyhow::Result<ExecResult> {
        let statement = Statement::from_string(self.db.get_database_backend(), sql.to_owned());
        Ok(self.db.execute(statement).await?)
    }

    /// Query raw SQL and return results
    pub async fn query_sql(&self, sql: &str) -> anyhow::Result<Vec<QueryResult>> {
        let statement = Statement::from_string(self.db.get_database_backend(), sql.to_owned());
        Ok(self.db.query_all(statement).await?)
    }

    pub async fn test_connection(&self) -> anyhow::Result<()> {
        if self.query_sql("SELECT 1").await?.is_empty() {
            return Err(anyhow::anyhow!("Connection test failed"));
        }
        Ok(())
    }

    pub fn connection(&self) -> &DbConnection {
        &self.db
    }

    pub fn connection_arc(&self) -> Arc<DbConnection> {
        Arc::clone(&self.db)
    }
}

/// Helper to wait for a condition with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_secs: u64,
    check_interval_ms: u64,
) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);
    let interval = std::time::Duration::from_millis(check_interval_ms);

    while start.elapsed() < timeout {
        if condition().await {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }

    Err(anyhow::anyhow!("Timeout waiting for condition"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_setup() -> anyhow::Result<()> {
        let test_db = TestDatabase::new().await?;
        test_db.test_connection().await?;

        let result = test_db.query_sql("SELECT 1 AS test_value").await?;
        assert_eq!(result.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_with_migrations() -> anyhow::Result<()> {
        let test_db = TestDatabase::with_migrations().await?;

        let result = test_db
            .query_sql("SELECT name FROM pragma_table_info('webhook_endpoints')")
            .await?;
        assert!(!result.is_empty(), "webhook_endpoints should have columns");
        Ok(())
    }

    #[tokio::test]
    async fn test_databases_are_isolated() -> anyhow::Result<()> {
        let a = TestDatabase::new().await?;
        let b = TestDatabase::new().await?;

        a.execute_sql("CREATE TABLE only_in_a (id INTEGER PRIMARY KEY)")
            .await?;

        assert!(b.query_sql("SELECT * FROM only_in_a").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_for() -> anyhow::Result<()> {
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let counter = &counter;
        wait_for(
            move || async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) >= 2
            },
            2,
            5,
        )
        .await?;
        Ok(())
    }
}
