use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Counter for {key} kept changing after {attempts} attempts")]
    Contention { key: String, attempts: u32 },
}
