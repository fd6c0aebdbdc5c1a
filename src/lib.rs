//! # pgcursor
//!
//! Offset-free pagination over large PostgreSQL result sets, served from
//! held server-side cursors.
//!
//! A request declares a `SCROLL CURSOR WITH HOLD`, gets back an opaque
//! cursor id, and later requests page through the same snapshot by id.
//! Cursors are closed when they run out of rows, when their time-to-live
//! elapses, or when the pool shuts down.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use pgcursor::prelude::*;
//!
//! let db = PgExecutor::connect("postgres://localhost/mydb").await?;
//! let pool = CursorPool::new(db);
//!
//! let id = pool
//!     .declare("req-42", "SELECT * FROM users WHERE id > $1", &[Param::Int(100)])
//!     .await?;
//!
//! let mut users: Vec<User> = Vec::new();
//! while pool.fetch(&mut users, &id, 500).await? {}
//! ```

pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod filter;
pub mod handler;
pub mod router;
pub mod seed;
pub mod server;

pub mod prelude {
    pub use crate::config::{Config, PoolConfig, MAX_PAGE_SIZE, MAX_TTL};
    pub use crate::cursor::{CursorPool, Page, sanitize_id};
    pub use crate::engine::{Executor, Param, PgExecutor, Row};
    pub use crate::error::*;
    pub use crate::handler::User;
    pub use crate::server::Server;
}
