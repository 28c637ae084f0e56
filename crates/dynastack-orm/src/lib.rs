//! Entity mapper for DynamoDB-style document stores.
//!
//! Entity types declare their table, keys and fields once with
//! [`entity!`]. A [`Mapper`] holds the shared store handle and saves, loads
//! and deletes entities; [`QueryBuilder`] runs key-condition queries with
//! cursor pagination.
//!
//! ```
//! use std::sync::Arc;
//!
//! use dynastack_orm::{Entity, Mapper, SortOrder};
//! use dynastack_store::{KeyAttribute, KeySchema, MemoryStore};
//!
//! #[derive(Debug, Default)]
//! struct Reading {
//!     sensor: String,
//!     at: i64,
//!     celsius: f64,
//! }
//!
//! dynastack_orm::entity! {
//!     Reading {
//!         table: "readings",
//!         index: "",
//!         partition_key: "sensor",
//!         sort_key: Some("at"),
//!         fields: {
//!             sensor: "sensor",
//!             at: "at",
//!             celsius: "celsius",
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! store.create_table(
//!     "readings",
//!     KeySchema::new(KeyAttribute::string("sensor")).with_sort_key(KeyAttribute::number("at")),
//! )?;
//! let mapper = Mapper::new(Arc::new(store));
//!
//! for at in 1..=3 {
//!     let mut reading = Reading { sensor: "s1".to_owned(), at, celsius: 20.5 };
//!     mapper.save(&mut reading).await?;
//! }
//!
//! let latest = Reading::query_builder(&mapper)
//!     .partition_key_equals("s1")
//!     .sort(SortOrder::Desc)
//!     .first(true)
//!     .await?;
//! assert_eq!(latest.at, 3);
//! # Ok(())
//! # }
//! ```
// "DynamoDB" appears in doc comments in this crate.
#![allow(clippy::doc_markdown)]

pub mod coerce;
pub mod config;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod query;
pub mod result;
pub mod schema;
pub mod value;

#[cfg(test)]
mod test_support;

pub use coerce::{Direction, Record, fill_item, from_store_value, is_empty, to_store_value};
pub use config::MapperConfig;
pub use entity::Entity;
pub use error::{OrmError, OrmResult};
pub use mapper::Mapper;
pub use query::{InvalidSortOrder, QueryBuilder, SortOrder};
pub use result::{PageKey, QueryResult};
pub use schema::{CREATED_AT, EntitySchema, FieldDef, FieldKind, UNSET_TIMESTAMP, UPDATED_AT};
pub use value::{FieldValue, Value};
