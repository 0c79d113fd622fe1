//! Database health check query.

use anyhow::Result;
use sqlx::PgPool;
use std::time::{Duration, Instant};

/// Verify the database connection is alive, returning the round-trip time.
pub async fn ping(pool: &PgPool) -> Result<Duration> {
    let start = Instant::now();
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(start.elapsed())
}
