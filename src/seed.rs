//! Sample data for the `users` table.

use crate::engine::{Executor, Param};

use thiserror::Error;

/// Rows inserted by `pgcursor seed` when no count is given.
pub const DEFAULT_SEED_COUNT: usize = 10_000;

/// PostgreSQL caps bind parameters per statement at 65535.
const MAX_PARAMS: usize = 65_535;

pub const CREATE_USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS users (
    id SERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Seed count must be between 1 and 65535, got {0}")]
    InvalidCount(usize),

    #[error("Failed to execute statement: {0}")]
    Execution(#[from] sqlx::Error),

    #[error("Insert reported {actual} rows, expected {expected}")]
    RowCount { expected: usize, actual: u64 },
}

/// `INSERT INTO users (name) VALUES ($1), ($2), ...` for `count` rows.
pub fn insert_statement(count: usize) -> String {
    let mut sql = String::from("INSERT INTO users (name) VALUES ");
    for i in 0..count {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(&format!(" (${})", i + 1));
    }
    sql
}

/// Create `users` if needed and insert `count` users with random names in
/// a single statement.
pub async fn seed<E: Executor>(executor: &E, count: usize) -> Result<u64, SeedError> {
    if count == 0 || count > MAX_PARAMS {
        return Err(SeedError::InvalidCount(count));
    }

    executor.execute(CREATE_USERS_TABLE, &[]).await?;

    let names: Vec<Param> = (0..count)
        .map(|_| Param::String(uuid::Uuid::new_v4().to_string()))
        .collect();

    let affected = executor.execute(&insert_statement(count), &names).await?;
    if affected != count as u64 {
        return Err(SeedError::RowCount {
            expected: count,
            actual: affected,
        });
    }

    tracing::info!("Seeded {} users", affected);
    Ok(affected)
}
