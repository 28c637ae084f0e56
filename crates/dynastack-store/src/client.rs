//! The store seam the mapper talks through.

use async_trait::async_trait;

use dynastack_model::{
    DeleteItemInput, DeleteItemOutput, GetItemInput, GetItemOutput, PutItemInput, PutItemOutput,
    QueryInput, QueryOutput, StoreError,
};

/// A key/value document store exposing the four operations the mapper uses.
///
/// Each call is one round trip. Implementations must not retry on the
/// caller's behalf; errors are surfaced as [`StoreError`] unchanged.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Fetch a single item by its full primary key.
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, StoreError>;

    /// Write a full item, replacing any item with the same primary key.
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, StoreError>;

    /// Remove the item with the given primary key. Deleting an absent item
    /// is not an error.
    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, StoreError>;

    /// Run a key-condition query against a table or one of its indexes.
    async fn query(&self, input: QueryInput) -> Result<QueryOutput, StoreError>;
}
