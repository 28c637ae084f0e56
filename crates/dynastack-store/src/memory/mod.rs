//! In-process document store.
//!
//! [`MemoryStore`] keeps tables in memory and evaluates the same requests a
//! remote store would: key-condition queries over a table or a secondary
//! index, ordered in either direction, with `Limit`/`ExclusiveStartKey`
//! pagination and projection expressions.
//!
//! Every call counts as one round trip; see [`MemoryStore::request_count`].

pub mod key_condition;
pub mod storage;

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use dynastack_model::{
    AttributeValue, DeleteItemInput, DeleteItemOutput, Document, GetItemInput, GetItemOutput,
    PutItemInput, PutItemOutput, QueryInput, QueryOutput, StoreError,
};

use self::key_condition::{KeyCondition, SortKeyCondition, parse_key_condition};
use self::storage::{
    KeySchema, ScalarType, SortableAttributeValue, StorageError, TableStorage,
    extract_primary_key, validate_key_type,
};
use crate::client::DocumentStore;
use crate::config::StoreConfig;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// A table held by a [`MemoryStore`], with its secondary indexes.
///
/// Indexes project every attribute and are evaluated on read, so they never
/// lag behind the base table.
#[derive(Debug)]
pub struct MemoryTable {
    /// Table name.
    pub name: String,
    /// Item storage engine.
    pub storage: TableStorage,
    indexes: RwLock<HashMap<String, KeySchema>>,
}

impl MemoryTable {
    fn index(&self, name: &str) -> Option<KeySchema> {
        self.indexes.read().get(name).cloned()
    }
}

/// Ordering key for one query candidate.
///
/// Base-table queries only need the sort key. Index queries add the base
/// table's primary key so items sharing an index sort key keep a stable
/// order and can be resumed from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EntryKey {
    sort: SortableAttributeValue,
    base_partition: SortableAttributeValue,
    base_sort: SortableAttributeValue,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// An in-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<String, Arc<MemoryTable>>,
    page_size: Option<usize>,
    request_count: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store with no page size cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store using the page size cap from `config`.
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            page_size: config.memory_page_size,
            ..Self::default()
        }
    }

    /// Caps every query page at `page_size` items, regardless of `Limit`.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the table already exists.
    pub fn create_table(&self, name: impl Into<String>, key_schema: KeySchema) -> Result<(), StoreError> {
        let name = name.into();
        match self.tables.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::validation(format!(
                "Table already exists: {name}"
            ))),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                info!(table = %name, "created memory table");
                e.insert(Arc::new(MemoryTable {
                    name,
                    storage: TableStorage::new(key_schema),
                    indexes: RwLock::new(HashMap::new()),
                }));
                Ok(())
            }
        }
    }

    /// Adds a secondary index to an existing table.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFoundException` if the table does not exist, or a
    /// validation error if the index name is taken.
    pub fn create_index(
        &self,
        table: &str,
        index: impl Into<String>,
        key_schema: KeySchema,
    ) -> Result<(), StoreError> {
        let table = self.require_table(table)?;
        let index = index.into();
        let mut indexes = table.indexes.write();
        if indexes.contains_key(&index) {
            return Err(StoreError::validation(format!(
                "Index already exists: {index}"
            )));
        }
        info!(table = %table.name, index = %index, "created memory index");
        indexes.insert(index, key_schema);
        Ok(())
    }

    /// Returns the number of items in a table, if it exists.
    #[must_use]
    pub fn item_count(&self, table: &str) -> Option<u64> {
        self.tables.get(table).map(|t| t.storage.item_count())
    }

    /// Returns the number of requests served so far.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn require_table(&self, name: &str) -> Result<Arc<MemoryTable>, StoreError> {
        self.tables
            .get(name)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| {
                StoreError::resource_not_found(format!(
                    "Requested resource not found: Table: {name} not found"
                ))
            })
    }

    fn begin_request(&self, table: &str) -> Result<Arc<MemoryTable>, StoreError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.require_table(table)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, StoreError> {
        let table = self.begin_request(&input.table_name)?;
        let key = extract_exact_key(table.storage.key_schema(), &input.key)?;
        Ok(GetItemOutput {
            item: table.storage.get_item(&key),
        })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, StoreError> {
        let table = self.begin_request(&input.table_name)?;
        table.storage.put_item(input.item)?;
        Ok(PutItemOutput {})
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, StoreError> {
        let table = self.begin_request(&input.table_name)?;
        let key = extract_exact_key(table.storage.key_schema(), &input.key)?;
        table.storage.delete_item(&key);
        Ok(DeleteItemOutput {})
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, StoreError> {
        let table = self.begin_request(&input.table_name)?;
        run_query(&table, &input, self.page_size)
    }
}

// ---------------------------------------------------------------------------
// Query evaluation
// ---------------------------------------------------------------------------

fn run_query(
    table: &MemoryTable,
    input: &QueryInput,
    page_size: Option<usize>,
) -> Result<QueryOutput, StoreError> {
    if let Some(limit) = input.limit {
        if limit <= 0 {
            return Err(StoreError::validation("Limit must be greater than 0"));
        }
    }
    if input.key_condition_expression.trim().is_empty() {
        return Err(StoreError::validation(
            "Invalid KeyConditionExpression: The expression can not be empty;",
        ));
    }

    let schema = match &input.index_name {
        Some(index) => table.index(index).ok_or_else(|| {
            StoreError::validation(format!(
                "The table does not have the specified index: {index}"
            ))
        })?,
        None => table.storage.key_schema().clone(),
    };
    let is_index = input.index_name.is_some();

    let condition = parse_key_condition(
        &input.key_condition_expression,
        &input.expression_attribute_names,
        &input.expression_attribute_values,
    )
    .map_err(|e| StoreError::validation(format!("Invalid KeyConditionExpression: {e}")))?;
    let (partition, sort_condition) = split_key_condition(&schema, condition)?;

    let mut entries: BTreeMap<EntryKey, Document> = BTreeMap::new();
    if is_index {
        for item in table.storage.snapshot() {
            // Items missing an index key attribute are not in the index.
            let Ok(key) = entry_key(table.storage.key_schema(), &schema, true, &item) else {
                continue;
            };
            let in_partition = item
                .get(&schema.partition_key.name)
                .and_then(|v| SortableAttributeValue::from_attribute_value("", v).ok())
                .is_some_and(|v| v == partition);
            if in_partition {
                entries.insert(key, item);
            }
        }
    } else {
        for (sort, item) in table.storage.partition(&partition) {
            let key = EntryKey {
                sort,
                base_partition: SortableAttributeValue::Sentinel,
                base_sort: SortableAttributeValue::Sentinel,
            };
            entries.insert(key, item);
        }
    }
    if let Some(cond) = &sort_condition {
        entries.retain(|k, _| cond.matches(&k.sort));
    }

    let start = if input.exclusive_start_key.is_empty() {
        None
    } else {
        Some(
            entry_key(
                table.storage.key_schema(),
                &schema,
                is_index,
                &input.exclusive_start_key,
            )
            .map_err(|e| StoreError::validation(format!("The provided starting key is invalid: {e}")))?,
        )
    };

    let forward = input.is_forward();
    let remaining: Vec<(&EntryKey, &Document)> = match (&start, forward) {
        (None, true) => entries.iter().collect(),
        (None, false) => entries.iter().rev().collect(),
        (Some(s), true) => entries
            .range((Bound::Excluded(s), Bound::Unbounded))
            .collect(),
        (Some(s), false) => entries.range(..s).rev().collect(),
    };

    let mut cap = input
        .limit
        .and_then(|l| usize::try_from(l).ok())
        .unwrap_or(usize::MAX);
    if let Some(page_size) = page_size {
        cap = cap.min(page_size);
    }
    let has_more = remaining.len() > cap;
    let page: Vec<&Document> = remaining.into_iter().take(cap).map(|(_, v)| v).collect();

    let last_evaluated_key = if has_more {
        page.last()
            .map(|item| key_attributes(table.storage.key_schema(), &schema, is_index, item))
    } else {
        None
    };

    let items = page
        .into_iter()
        .map(|item| {
            apply_projection(
                item,
                input.projection_expression.as_deref(),
                &input.expression_attribute_names,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    let count = i32::try_from(items.len()).unwrap_or(i32::MAX);

    debug!(
        table = %table.name,
        index = ?input.index_name,
        forward,
        count,
        has_more,
        "evaluated query"
    );

    Ok(QueryOutput {
        items,
        count,
        last_evaluated_key,
    })
}

/// Splits a parsed condition into the partition value and the optional sort
/// condition, rejecting anything a key condition cannot express.
fn split_key_condition(
    schema: &KeySchema,
    condition: KeyCondition,
) -> Result<(SortableAttributeValue, Option<SortKeyCondition>), StoreError> {
    let mut partition = None;
    let mut sort = None;

    for term in condition.terms {
        if term.attribute == schema.partition_key.name {
            let SortKeyCondition::Eq(value) = term.condition else {
                return Err(StoreError::validation("Query key condition not supported"));
            };
            if partition.is_some() {
                return Err(StoreError::validation(
                    "KeyConditionExpressions must only contain one condition per key",
                ));
            }
            validate_key_type(&schema.partition_key, &term.value)?;
            partition = Some(value);
        } else if let Some(sk) = schema.sort_key.as_ref().filter(|sk| sk.name == term.attribute) {
            if sort.is_some() {
                return Err(StoreError::validation(
                    "KeyConditionExpressions must only contain one condition per key",
                ));
            }
            if matches!(term.condition, SortKeyCondition::BeginsWith(_)) && sk.attr_type == ScalarType::N {
                return Err(StoreError::validation(
                    "Invalid KeyConditionExpression: Incorrect operand type for operator or \
                     function; operator or function: begins_with, operand type: N",
                ));
            }
            for operand in term.condition.operands() {
                if let Some(value) = operand.to_attribute_value() {
                    validate_key_type(sk, &value)?;
                }
            }
            sort = Some(term.condition);
        } else {
            return Err(StoreError::validation("Query key condition not supported"));
        }
    }

    let partition = partition.ok_or_else(|| {
        StoreError::validation(format!(
            "Query condition missed key schema element: {}",
            schema.partition_key.name
        ))
    })?;
    Ok((partition, sort))
}

fn entry_key(
    table_schema: &KeySchema,
    schema: &KeySchema,
    is_index: bool,
    doc: &Document,
) -> Result<EntryKey, StorageError> {
    let own = extract_primary_key(schema, doc)?;
    if is_index {
        let base = extract_primary_key(table_schema, doc)?;
        Ok(EntryKey {
            sort: own.sort_key,
            base_partition: base.partition_key,
            base_sort: base.sort_key,
        })
    } else {
        Ok(EntryKey {
            sort: own.sort_key,
            base_partition: SortableAttributeValue::Sentinel,
            base_sort: SortableAttributeValue::Sentinel,
        })
    }
}

/// Extracts the key attributes a caller needs to resume after `item`.
fn key_attributes(
    table_schema: &KeySchema,
    schema: &KeySchema,
    is_index: bool,
    item: &Document,
) -> Document {
    let index_names = is_index.then(|| schema.key_names()).into_iter().flatten();
    table_schema
        .key_names()
        .chain(index_names)
        .filter_map(|name| item.get(name).map(|v| (name.to_owned(), v.clone())))
        .collect()
}

/// Extracts a primary key from a key map that must hold exactly the schema's
/// key attributes.
fn extract_exact_key(
    schema: &KeySchema,
    key: &Document,
) -> Result<storage::PrimaryKey, StoreError> {
    let expected = schema.key_names().count();
    if key.len() != expected || !schema.key_names().all(|name| key.contains_key(name)) {
        return Err(StoreError::validation(
            "The provided key element does not match the schema",
        ));
    }
    Ok(extract_primary_key(schema, key)?)
}

/// Keeps only the top-level attributes named by a projection expression.
fn apply_projection(
    item: &Document,
    projection: Option<&str>,
    names: &HashMap<String, String>,
) -> Result<Document, StoreError> {
    let Some(projection) = projection.filter(|p| !p.trim().is_empty()) else {
        return Ok(item.clone());
    };

    let mut projected = HashMap::new();
    for path in projection.split(',').map(str::trim) {
        let attr = if path.starts_with('#') {
            names.get(path).map(String::as_str).ok_or_else(|| {
                StoreError::validation(format!(
                    "Invalid ProjectionExpression: Unresolved expression attribute name: {path}"
                ))
            })?
        } else {
            path
        };
        if attr.is_empty() {
            return Err(StoreError::validation(
                "Invalid ProjectionExpression: The expression can not be empty;",
            ));
        }
        if let Some(value) = item.get(attr) {
            projected.insert(attr.to_owned(), value.clone());
        }
    }
    Ok(projected)
}

/// Builds a key map from attribute name/value pairs.
#[must_use]
pub fn key_of<const N: usize>(pairs: [(&str, AttributeValue); N]) -> Document {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
