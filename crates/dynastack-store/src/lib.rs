//! Document store backends for dynastack.
//!
//! The mapper talks to storage only through the [`DocumentStore`] trait.
//! Two implementations are provided:
//!
//! - [`MemoryStore`]: an in-process store that evaluates key conditions,
//!   secondary indexes and pagination itself. Useful for tests and local use.
//! - [`SdkStore`]: forwards each call to a DynamoDB-compatible endpoint via
//!   `aws-sdk-dynamodb`.
// "DynamoDB" appears in many doc comments in this crate.
#![allow(clippy::doc_markdown)]

pub mod client;
pub mod config;
pub mod memory;
pub mod sdk;

pub use client::DocumentStore;
pub use config::StoreConfig;
pub use memory::MemoryStore;
pub use memory::storage::{KeyAttribute, KeySchema, ScalarType};
pub use sdk::SdkStore;
