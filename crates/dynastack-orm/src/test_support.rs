//! Entities and stores shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dynastack_model::{
    DeleteItemInput, DeleteItemOutput, Document, GetItemInput, GetItemOutput, PutItemInput,
    PutItemOutput, QueryInput, QueryOutput, StoreError,
};
use dynastack_store::{DocumentStore, KeyAttribute, KeySchema, MemoryStore};
use parking_lot::Mutex;

use crate::mapper::Mapper;
use crate::schema::UNSET_TIMESTAMP;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub age: i64,
    pub tags: BTreeSet<String>,
    pub prefs: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for User {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            name: String::new(),
            age: 0,
            tags: BTreeSet::new(),
            prefs: BTreeMap::new(),
            created_at: UNSET_TIMESTAMP,
            updated_at: UNSET_TIMESTAMP,
        }
    }
}

crate::entity! {
    User {
        table: "users",
        index: "",
        partition_key: "userId",
        sort_key: None,
        fields: {
            user_id: "userId",
            name: "name",
            age: "age",
            tags: "tags" as Set,
            prefs: "prefs" as Map,
            created_at: "createdAt",
            updated_at: "updatedAt",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Order {
    pub customer_id: String,
    pub order_id: i64,
    pub status: String,
    pub placed_at: i64,
}

crate::entity! {
    Order {
        table: "orders",
        index: "",
        partition_key: "customerId",
        sort_key: Some("orderId"),
        fields: {
            customer_id: "customerId",
            order_id: "orderId",
            status: "status",
            placed_at: "placedAt",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderByStatus {
    pub customer_id: String,
    pub order_id: i64,
    pub status: String,
    pub placed_at: i64,
}

crate::entity! {
    OrderByStatus {
        table: "orders",
        index: "by-status",
        partition_key: "status",
        sort_key: Some("placedAt"),
        fields: {
            customer_id: "customerId",
            order_id: "orderId",
            status: "status",
            placed_at: "placedAt",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub owner: String,
    pub slug: String,
    pub body: String,
}

crate::entity! {
    Note {
        table: "notes",
        index: "",
        partition_key: "owner",
        sort_key: Some("slug"),
        fields: {
            owner: "owner",
            slug: "slug",
            body: "body",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Orphan {
    pub id: String,
}

crate::entity! {
    Orphan {
        table: "",
        index: "",
        partition_key: "id",
        sort_key: None,
        fields: {
            id: "id",
        }
    }
}

/// A memory store holding the `users`, `orders` and `notes` tables.
pub fn memory_store(page_size: Option<usize>) -> Arc<MemoryStore> {
    let store = match page_size {
        Some(n) => MemoryStore::new().with_page_size(n),
        None => MemoryStore::new(),
    };
    store
        .create_table("users", KeySchema::new(KeyAttribute::string("userId")))
        .unwrap();
    store
        .create_table(
            "orders",
            KeySchema::new(KeyAttribute::string("customerId"))
                .with_sort_key(KeyAttribute::number("orderId")),
        )
        .unwrap();
    store
        .create_index(
            "orders",
            "by-status",
            KeySchema::new(KeyAttribute::string("status"))
                .with_sort_key(KeyAttribute::number("placedAt")),
        )
        .unwrap();
    store
        .create_table(
            "notes",
            KeySchema::new(KeyAttribute::string("owner")).with_sort_key(KeyAttribute::string("slug")),
        )
        .unwrap();
    Arc::new(store)
}

pub fn memory_mapper(page_size: Option<usize>) -> (Mapper, Arc<MemoryStore>) {
    let store = memory_store(page_size);
    (Mapper::new(store.clone()), store)
}

/// One request seen by a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Get(GetItemInput),
    Put(PutItemInput),
    Delete(DeleteItemInput),
    Query(QueryInput),
}

/// Records every request and answers queries from a script.
#[derive(Debug, Default)]
pub struct RecordingStore {
    requests: Mutex<Vec<Recorded>>,
    query_outputs: Mutex<VecDeque<QueryOutput>>,
    get_output: Mutex<Option<Document>>,
    fail_when_exhausted: bool,
}

impl RecordingStore {
    pub fn with_pages(pages: Vec<QueryOutput>) -> Self {
        Self {
            query_outputs: Mutex::new(pages.into()),
            ..Self::default()
        }
    }

    /// Answers queries from `pages`, then fails every later query.
    pub fn with_pages_then_failure(pages: Vec<QueryOutput>) -> Self {
        Self {
            query_outputs: Mutex::new(pages.into()),
            fail_when_exhausted: true,
            ..Self::default()
        }
    }

    pub fn with_item(item: Document) -> Self {
        Self {
            get_output: Mutex::new(Some(item)),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn queries(&self) -> Vec<QueryInput> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Query(q) => Some(q.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, StoreError> {
        self.requests.lock().push(Recorded::Get(input));
        Ok(GetItemOutput {
            item: self.get_output.lock().clone(),
        })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, StoreError> {
        self.requests.lock().push(Recorded::Put(input));
        Ok(PutItemOutput {})
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, StoreError> {
        self.requests.lock().push(Recorded::Delete(input));
        Ok(DeleteItemOutput {})
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, StoreError> {
        self.requests.lock().push(Recorded::Query(input));
        match self.query_outputs.lock().pop_front() {
            Some(page) => Ok(page),
            None if self.fail_when_exhausted => Err(StoreError::internal_error("scripted failure")),
            None => Ok(QueryOutput::default()),
        }
    }
}

pub fn recording_mapper(store: RecordingStore) -> (Mapper, Arc<RecordingStore>) {
    let store = Arc::new(store);
    (Mapper::new(store.clone()), store)
}
