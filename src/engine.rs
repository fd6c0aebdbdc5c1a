//! Database execution engine for pgcursor.
//!
//! The cursor pool talks to the database through the [`Executor`] trait.
//! [`PgExecutor`] is the PostgreSQL implementation backed by sqlx.

use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, TypeInfo};
use std::future::Future;
use std::pin::Pin;

/// A decoded result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Boxed future returned by [`Executor`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An opaque database handle able to run statements that reference held
/// cursors declared by earlier calls.
///
/// Every call must reach the same backend session: PostgreSQL cursors are
/// private to the session that declared them.
pub trait Executor: Send + Sync + 'static {
    /// Execute a statement with bound parameters, returning the number of
    /// rows affected (for `MOVE`, the number of rows moved over).
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, Result<u64, sqlx::Error>>;

    /// Run a row-returning statement such as `FETCH`.
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, sqlx::Error>>;
}

/// Dynamic value type for statement bindings.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// PostgreSQL executor pinned to a single long-lived connection.
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    /// Connect to PostgreSQL.
    ///
    /// The underlying pool holds exactly one connection that is never
    /// recycled, so cursors declared through it stay reachable.
    ///
    /// ```rust,ignore
    /// let db = PgExecutor::connect("postgres://localhost/mydb").await?;
    /// ```
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Round trip to the server.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Executor for PgExecutor {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, Result<u64, sqlx::Error>> {
        Box::pin(async move {
            let mut query = sqlx::query(sql).persistent(false);
            for param in params {
                query = bind(query, param);
            }
            let result = query.execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
    }

    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, sqlx::Error>> {
        Box::pin(async move {
            let rows = sqlx::query(sql)
                .persistent(false)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.iter().map(row_to_map).collect())
        })
    }
}

fn bind<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &'q Param,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        Param::Null => query.bind(Option::<String>::None),
        Param::Bool(v) => query.bind(*v),
        Param::Int(v) => query.bind(*v),
        Param::Float(v) => query.bind(*v),
        Param::String(v) => query.bind(v.as_str()),
    }
}

/// Convert a PgRow to a JSON object.
fn row_to_map(row: &PgRow) -> Row {
    use serde_json::Value;

    let mut map = Row::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();

        let value: Value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(i).ok().flatten().map(Value::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(i)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into())),
            "INT4" => row
                .try_get::<Option<i32>, _>(i)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into())),
            "INT8" => row
                .try_get::<Option<i64>, _>(i)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into())),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(i)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(Value::Number),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(i)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_rfc3339())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)
                .ok()
                .flatten()
                .map(|v| Value::String(v.and_utc().to_rfc3339())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string())),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(i)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string())),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i).ok().flatten(),
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(Value::String),
        }
        .unwrap_or(Value::Null);

        map.insert(name, value);
    }

    map
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(v as i64)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::String(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::String(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Param::Null)
    }
}
