use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsageStoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Invalid stored row: {0}")]
    InvalidRow(String),
    #[error("Record not found")]
    NotFound,
}
