//! Database connection management

use consentry_core::{DatabaseConfig, ServiceError, ServiceResult};
use consentry_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use tracing::{debug, info};

pub type DbConnection = DatabaseConnection;

pub async fn establish_connection(config: &DatabaseConfig) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(config.url.clone());
    if config.is_sqlite() {
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections);
    }
    opt.connect_timeout(config.connect_timeout())
        .sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;
    debug!("Database connection established");

    if config.run_migrations {
        Migrator::up(&db, None)
            .await
            .map_err(|e| ServiceError::Migration(e.to_string()))?;
        info!("Database migrations applied");
    }

    Ok(Arc::new(db))
}
