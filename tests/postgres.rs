//! Integration tests against a live PostgreSQL.
//!
//! Run: `DATABASE_URL=postgres://... cargo test --test postgres -- --ignored`

use pgcursor::prelude::*;

async fn connect() -> PgExecutor {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    PgExecutor::connect(&url).await.expect("failed to connect")
}

#[tokio::test]
#[ignore = "Requires DATABASE_URL - run with --ignored"]
async fn test_held_cursor_pagination() -> CursorResult<()> {
    let pool = CursorPool::new(connect().await);
    let sql = "SELECT g AS id, 'user-' || g AS name, now() AS created_at, now() AS updated_at \
               FROM generate_series(1, 1250) AS g ORDER BY g";

    let id = pool.declare("pgtest1250", sql, &[]).await?;
    assert_eq!(pool.remaining(&id).await, Some(1250));

    let mut users: Vec<User> = Vec::new();
    assert!(pool.fetch(&mut users, &id, 500).await?);
    assert!(pool.fetch(&mut users, &id, 500).await?);
    assert!(!pool.fetch(&mut users, &id, 500).await?);

    assert_eq!(users.len(), 1250);
    assert_eq!(users.last().map(|u| u.id), Some(1250));
    assert!(matches!(
        pool.fetch(&mut users, &id, 500).await,
        Err(CursorError::SessionNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
#[ignore = "Requires DATABASE_URL - run with --ignored"]
async fn test_bound_parameters_and_shutdown() -> CursorResult<()> {
    let pool = CursorPool::new(connect().await);
    let sql = "SELECT g AS id FROM generate_series(1, 100) AS g WHERE g > $1 ORDER BY g";

    let id = pool.declare("pgtestparams", sql, &[Param::Int(90)]).await?;
    let page = pool.fetch_rows(&id, 3).await?;
    assert_eq!(page.rows.len(), 3);
    assert_eq!(page.rows[0]["id"], serde_json::json!(91));
    assert!(page.more);

    pool.close().await?;
    assert!(pool.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore = "Requires DATABASE_URL - run with --ignored"]
async fn test_bad_statement_is_declare_failure() {
    let pool = CursorPool::new(connect().await);
    let err = pool
        .declare("pgtestbad", "SELECT * FROM no_such_table_here", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CursorError::DeclareFailed { .. }));
    assert!(pool.is_empty());
}
