//! Typed key–value store over an ordered partition engine.
//!
//! Writes go through a checksummed write-ahead log and an in-memory
//! latest-wins buffer; a background task periodically flushes the buffer
//! into the partition store in one transaction and truncates the log.
//! Reads consult the buffer first, so acknowledged writes are visible
//! immediately. Each store binds a record type to a bucket and maintains
//! per-field sorted indexes that the query planner combines with residual
//! in-memory filtering.
//!
//! ```no_run
//! use burrow_store::{Condition, Database, FieldValue, IndexSpec, Query, Record, Store};
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     uuid: String,
//!     name: String,
//!     age: i64,
//! }
//!
//! impl Record for User {
//!     fn key(&self) -> &str {
//!         &self.uuid
//!     }
//!
//!     fn fields() -> &'static [&'static str] {
//!         &["UUID", "Name", "Age"]
//!     }
//!
//!     fn field_value(&self, field: &str) -> Option<FieldValue> {
//!         match field {
//!             "UUID" => Some(FieldValue::Str(self.uuid.clone())),
//!             "Name" => Some(FieldValue::Str(self.name.clone())),
//!             "Age" => Some(FieldValue::Int(self.age)),
//!             _ => None,
//!         }
//!     }
//!
//!     fn indexes() -> &'static [IndexSpec] {
//!         &[IndexSpec { name: "name", field: "Name" }]
//!     }
//! }
//!
//! # async fn demo() -> burrow_common::Result<()> {
//! let db = Database::open("users.db").await?;
//! let store: Store<User> = Store::new(&db, "users")?;
//! let ctx = CancellationToken::new();
//!
//! store.put(&ctx, &User { uuid: "u1".into(), name: "Alice".into(), age: 30 }).await?;
//! let user = store.get(&ctx, "u1").await?;
//!
//! let results = store
//!     .query(&ctx, &Query {
//!         conditions: vec![Condition::equals("Name", "Alice")],
//!         ..Default::default()
//!     })
//!     .await?;
//! # let _ = (user, results);
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

mod db;
pub mod layout;
mod query;
mod record;
mod store;

pub use burrow_common::{BurrowError, Config, Result};
pub use db::Database;
pub use query::{Condition, Operator, Query, Sorting};
pub use record::{FieldValue, IndexSpec, Record};
pub use store::Store;
