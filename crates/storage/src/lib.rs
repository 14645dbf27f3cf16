pub mod ddl;
pub mod row;
pub mod warehouse;

pub use sqlx::Pool;
pub use sqlx::Postgres;
pub use sqlx::postgres::PgPool;
pub use warehouse::{PgSession, PgWarehouse};

use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Connect to the PostgreSQL warehouse. One connection per concurrent load plus headroom.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await
}
