use std::str::FromStr;

use sqlx::{
    Pool, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use utils::assets::{database_path, ensure_asset_dir};

pub mod error;
pub mod models;
pub mod sink;
pub mod stats;

pub use error::UsageStoreError;
pub use sink::SqliteUsageSink;

#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    /// Open the usage database in the asset directory and run migrations
    pub async fn new() -> Result<DBService, UsageStoreError> {
        ensure_asset_dir().map_err(|e| UsageStoreError::Database(sqlx::Error::Io(e)))?;
        let database_url = format!("sqlite://{}", database_path().to_string_lossy());
        Self::connect(&database_url).await
    }

    /// Open any SQLite URL, e.g. `sqlite::memory:`, and run migrations
    pub async fn connect(database_url: &str) -> Result<DBService, UsageStoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let in_memory = database_url.contains(":memory:");

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePool::connect_with(options).await?
        };
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Usage store ready at {}", database_url);
        Ok(DBService { pool })
    }
}
