//! In-memory executor that understands the cursor commands the pool issues.
//!
//! `DECLARE` looks the query text up in a table registered with
//! [`MemoryExecutor::with_rows`]; bound parameters are ignored.

#![allow(dead_code)]

use pgcursor::engine::{BoxFuture, Executor, Param, Row};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

pub const USERS_SQL: &str = "SELECT * FROM users ORDER BY id";

#[derive(Default)]
pub struct MemoryExecutor {
    tables: HashMap<String, Vec<Row>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    cursors: HashMap<String, Cursor>,
    statements: Vec<String>,
    closes: HashMap<String, usize>,
    missing_closes: usize,
    fail_prefix: Option<String>,
    stall_prefix: Option<String>,
    late_prefix: Option<String>,
}

struct Cursor {
    rows: Vec<Row>,
    pos: usize,
}

/// `count` user rows with ids `1..=count`.
pub fn users(count: usize) -> Vec<Row> {
    (1..=count).map(|id| user_row(id as i64)).collect()
}

pub fn user_row(id: i64) -> Row {
    let value = json!({
        "id": id,
        "name": format!("user-{id}"),
        "created_at": "2024-01-01T00:00:00+00:00",
        "updated_at": "2024-01-02T00:00:00+00:00",
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

pub fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().map(|r| r["id"].as_i64().unwrap()).collect()
}

fn error(msg: impl Into<String>) -> sqlx::Error {
    sqlx::Error::Protocol(msg.into())
}

fn word(sql: &str, index: usize) -> &str {
    sql.split_whitespace().nth(index).unwrap_or_default()
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, sql: &str, rows: Vec<Row>) -> Self {
        self.tables.insert(sql.to_string(), rows);
        self
    }

    /// Statements starting with `prefix` fail from now on.
    pub fn fail_when(&self, prefix: &str) {
        self.state.lock().unwrap().fail_prefix = Some(prefix.to_string());
    }

    /// Statements starting with `prefix` never complete from now on.
    pub fn stall_when(&self, prefix: &str) {
        self.state.lock().unwrap().stall_prefix = Some(prefix.to_string());
    }

    /// Statements starting with `prefix` take effect but never report back.
    pub fn stall_after(&self, prefix: &str) {
        self.state.lock().unwrap().late_prefix = Some(prefix.to_string());
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_prefix = None;
        state.stall_prefix = None;
        state.late_prefix = None;
    }

    fn reports_late(&self, sql: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.late_prefix.as_deref().is_some_and(|prefix| sql.starts_with(prefix))
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    /// Successful `CLOSE` count for a cursor name such as `_abc`.
    pub fn close_count(&self, name: &str) -> usize {
        self.state.lock().unwrap().closes.get(name).copied().unwrap_or(0)
    }

    /// `CLOSE` statements that named a cursor which was not open.
    pub fn missing_closes(&self) -> usize {
        self.state.lock().unwrap().missing_closes
    }

    pub fn open_cursors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().cursors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Record the statement and decide whether it should fail or stall.
    fn admit(&self, sql: &str) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        if let Some(prefix) = &state.fail_prefix {
            if sql.starts_with(prefix.as_str()) {
                return Err(error(format!("injected failure: {sql}")));
            }
        }
        Ok(state
            .stall_prefix
            .as_deref()
            .is_some_and(|prefix| sql.starts_with(prefix)))
    }

    fn run_execute(&self, sql: &str, params: &[Param]) -> Result<u64, sqlx::Error> {
        let mut state = self.state.lock().unwrap();

        if sql.starts_with("DECLARE ") {
            let name = word(sql, 1).to_string();
            if state.cursors.contains_key(&name) {
                return Err(error(format!("cursor \"{name}\" already exists")));
            }
            let query = sql
                .split_once(" FOR ")
                .map(|(_, q)| q)
                .ok_or_else(|| error("syntax error"))?;
            let rows = self
                .tables
                .get(query)
                .cloned()
                .ok_or_else(|| error(format!("relation for {query:?} does not exist")))?;
            state.cursors.insert(name, Cursor { rows, pos: 0 });
            Ok(0)
        } else if sql.starts_with("MOVE FORWARD ALL IN ") {
            let cursor = state
                .cursors
                .get_mut(word(sql, 4))
                .ok_or_else(|| error("cursor does not exist"))?;
            let moved = cursor.rows.len() - cursor.pos;
            cursor.pos = cursor.rows.len();
            Ok(moved as u64)
        } else if sql.starts_with("MOVE ABSOLUTE 0 IN ") {
            let cursor = state
                .cursors
                .get_mut(word(sql, 4))
                .ok_or_else(|| error("cursor does not exist"))?;
            cursor.pos = 0;
            Ok(0)
        } else if sql.starts_with("CLOSE ") {
            let name = word(sql, 1).to_string();
            if state.cursors.remove(&name).is_none() {
                state.missing_closes += 1;
                return Err(error(format!("cursor \"{name}\" does not exist")));
            }
            *state.closes.entry(name).or_default() += 1;
            Ok(0)
        } else if sql.starts_with("CREATE TABLE") {
            Ok(0)
        } else if sql.starts_with("INSERT INTO") {
            Ok(params.len() as u64)
        } else {
            Err(error(format!("unsupported statement: {sql}")))
        }
    }

    fn run_query(&self, sql: &str) -> Result<Vec<Row>, sqlx::Error> {
        let mut state = self.state.lock().unwrap();

        if !sql.starts_with("FETCH ") {
            return Err(error(format!("unsupported query: {sql}")));
        }
        let count: usize = word(sql, 1).parse().map_err(|_| error("bad count"))?;
        let cursor = state
            .cursors
            .get_mut(word(sql, 3))
            .ok_or_else(|| error("cursor does not exist"))?;

        let end = (cursor.pos + count).min(cursor.rows.len());
        let rows = cursor.rows[cursor.pos..end].to_vec();
        cursor.pos = end;
        Ok(rows)
    }
}

impl Executor for MemoryExecutor {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, Result<u64, sqlx::Error>> {
        Box::pin(async move {
            if self.admit(sql)? {
                std::future::pending::<()>().await;
            }
            let result = self.run_execute(sql, params);
            if self.reports_late(sql) {
                std::future::pending::<()>().await;
            }
            result
        })
    }

    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>, sqlx::Error>> {
        Box::pin(async move {
            if self.admit(sql)? {
                std::future::pending::<()>().await;
            }
            self.run_query(sql)
        })
    }
}
