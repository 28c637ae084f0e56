//! In-memory item storage for a single table.
//!
//! Each partition key maps to a [`BTreeMap`] of sort keys to items, so a
//! partition can be walked in sort-key order in either direction.
//!
//! ```text
//! DashMap<PartitionKey, BTreeMap<SortableAttributeValue, Document>>
//! ```
//!
//! Tables without a sort key use a sentinel value as the single `BTreeMap`
//! key per partition.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use dynastack_model::{AttributeValue, Document, StoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while storing or addressing items.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A required key attribute was not found in the item.
    #[error("One or more parameter values were invalid: Missing the key {attr} in the item")]
    MissingKeyAttribute {
        /// The name of the missing attribute.
        attr: String,
    },
    /// A key attribute has the wrong type.
    #[error(
        "One or more parameter values were invalid: Type mismatch for key {attr} expected: {expected} actual: {actual}"
    )]
    InvalidKeyType {
        /// The name of the attribute.
        attr: String,
        /// The expected type descriptor.
        expected: String,
        /// The actual type descriptor.
        actual: String,
    },
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        StoreError::validation(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Key schema
// ---------------------------------------------------------------------------

/// Scalar types allowed for key attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// String.
    S,
    /// Number.
    N,
    /// Binary.
    B,
}

impl ScalarType {
    /// Returns the type descriptor string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S => "S",
            Self::N => "N",
            Self::B => "B",
        }
    }

    fn matches(self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (Self::S, AttributeValue::S(_))
                | (Self::N, AttributeValue::N(_))
                | (Self::B, AttributeValue::B(_))
        )
    }
}

/// A single key attribute definition with its name and scalar type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttribute {
    /// The attribute name.
    pub name: String,
    /// The scalar type.
    pub attr_type: ScalarType,
}

impl KeyAttribute {
    /// A string-typed key attribute.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr_type: ScalarType::S,
        }
    }

    /// A number-typed key attribute.
    #[must_use]
    pub fn number(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr_type: ScalarType::N,
        }
    }

    /// A binary-typed key attribute.
    #[must_use]
    pub fn binary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr_type: ScalarType::B,
        }
    }
}

/// Key schema of a table or index: a partition key and an optional sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    /// Partition (HASH) key.
    pub partition_key: KeyAttribute,
    /// Optional sort (RANGE) key.
    pub sort_key: Option<KeyAttribute>,
}

impl KeySchema {
    /// A schema with only a partition key.
    #[must_use]
    pub fn new(partition_key: KeyAttribute) -> Self {
        Self {
            partition_key,
            sort_key: None,
        }
    }

    /// Adds a sort key.
    #[must_use]
    pub fn with_sort_key(mut self, sort_key: KeyAttribute) -> Self {
        self.sort_key = Some(sort_key);
        self
    }

    /// Returns the key attribute names, partition key first.
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.name.as_str())
            .chain(self.sort_key.as_ref().map(|k| k.name.as_str()))
    }
}

/// A primary key consisting of a partition key and an optional sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    /// The partition key value.
    pub partition_key: SortableAttributeValue,
    /// The sort key value, or the sentinel for tables without one.
    pub sort_key: SortableAttributeValue,
}

// ---------------------------------------------------------------------------
// SortableAttributeValue
// ---------------------------------------------------------------------------

/// A key-eligible [`AttributeValue`] that implements [`Ord`].
///
/// - **Strings (S)**: UTF-8 byte ordering.
/// - **Numbers (N)**: numeric ordering (parsed as `f64`).
/// - **Binary (B)**: unsigned byte ordering.
/// - **Sentinel**: stands in for an absent sort key; equal only to itself.
#[derive(Debug, Clone)]
pub enum SortableAttributeValue {
    /// String key.
    S(String),
    /// Number key (kept as its decimal string, compared numerically).
    N(String),
    /// Binary key.
    B(bytes::Bytes),
    /// Sentinel value for tables without a sort key.
    Sentinel,
}

impl SortableAttributeValue {
    /// Converts this sortable value back into an [`AttributeValue`].
    ///
    /// Returns `None` for the `Sentinel` variant.
    #[must_use]
    pub fn to_attribute_value(&self) -> Option<AttributeValue> {
        match self {
            Self::S(s) => Some(AttributeValue::S(s.clone())),
            Self::N(n) => Some(AttributeValue::N(n.clone())),
            Self::B(b) => Some(AttributeValue::B(b.clone())),
            Self::Sentinel => None,
        }
    }

    /// Creates a `SortableAttributeValue` from an `AttributeValue`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidKeyType` if the value is not S, N or B.
    pub fn from_attribute_value(
        attr_name: &str,
        value: &AttributeValue,
    ) -> Result<Self, StorageError> {
        match value {
            AttributeValue::S(s) => Ok(Self::S(s.clone())),
            AttributeValue::N(n) => Ok(Self::N(n.clone())),
            AttributeValue::B(b) => Ok(Self::B(b.clone())),
            other => Err(StorageError::InvalidKeyType {
                attr: attr_name.to_owned(),
                expected: "S, N, or B".to_owned(),
                actual: other.type_descriptor().to_owned(),
            }),
        }
    }
}

/// Parses a number string to `f64` for comparison purposes.
///
/// Returns `f64::NAN` if parsing fails, which compares equal to everything.
fn parse_number(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(f64::NAN)
}

impl PartialEq for SortableAttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortableAttributeValue {}

impl PartialOrd for SortableAttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortableAttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::S(a), Self::S(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::N(a), Self::N(b)) => parse_number(a)
                .partial_cmp(&parse_number(b))
                .unwrap_or(Ordering::Equal),
            (Self::B(a), Self::B(b)) => a.as_ref().cmp(b.as_ref()),
            (Self::Sentinel, Self::Sentinel) => Ordering::Equal,
            // Mixed variants never share a partition; order them deterministically.
            (Self::S(_), _) => Ordering::Less,
            (_, Self::S(_)) => Ordering::Greater,
            (Self::N(_), _) => Ordering::Less,
            (_, Self::N(_)) => Ordering::Greater,
            (Self::B(_), _) => Ordering::Less,
            (_, Self::B(_)) => Ordering::Greater,
        }
    }
}

impl std::hash::Hash for SortableAttributeValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::S(s) => s.hash(state),
            // Hash the parsed value so "1" and "1.0" land together, matching `eq`.
            Self::N(n) => parse_number(n).to_bits().hash(state),
            Self::B(b) => b.hash(state),
            Self::Sentinel => {}
        }
    }
}

// ---------------------------------------------------------------------------
// TableStorage
// ---------------------------------------------------------------------------

/// In-memory storage for a single table.
#[derive(Debug)]
pub struct TableStorage {
    /// Partition key -> sorted items within that partition.
    data: DashMap<SortableAttributeValue, BTreeMap<SortableAttributeValue, Document>>,
    /// The key schema for this table.
    key_schema: KeySchema,
    /// Total number of items in the table.
    item_count: AtomicU64,
}

impl TableStorage {
    /// Creates a new empty `TableStorage` with the given key schema.
    #[must_use]
    pub fn new(key_schema: KeySchema) -> Self {
        Self {
            data: DashMap::new(),
            key_schema,
            item_count: AtomicU64::new(0),
        }
    }

    /// Returns a reference to the key schema.
    #[must_use]
    pub fn key_schema(&self) -> &KeySchema {
        &self.key_schema
    }

    /// Returns the current item count.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.item_count.load(AtomicOrdering::Relaxed)
    }

    /// Inserts or replaces an item. Returns the replaced item, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if a key attribute is missing or mistyped.
    pub fn put_item(&self, item: Document) -> Result<Option<Document>, StorageError> {
        let key = extract_primary_key(&self.key_schema, &item)?;

        let old = self
            .data
            .entry(key.partition_key)
            .or_default()
            .insert(key.sort_key, item);

        if old.is_some() {
            debug!("replaced existing item");
        } else {
            self.item_count.fetch_add(1, AtomicOrdering::Relaxed);
            debug!("inserted new item");
        }
        Ok(old)
    }

    /// Retrieves an item by its primary key.
    #[must_use]
    pub fn get_item(&self, key: &PrimaryKey) -> Option<Document> {
        self.data
            .get(&key.partition_key)
            .and_then(|partition| partition.get(&key.sort_key).cloned())
    }

    /// Deletes an item by its primary key. Returns the deleted item, if any.
    pub fn delete_item(&self, key: &PrimaryKey) -> Option<Document> {
        let removed = {
            let mut partition = self.data.get_mut(&key.partition_key)?;
            partition.remove(&key.sort_key)?
        };

        self.item_count.fetch_sub(1, AtomicOrdering::Relaxed);
        debug!("deleted item");
        Some(removed)
    }

    /// Returns the items of one partition in ascending sort-key order.
    #[must_use]
    pub fn partition(&self, partition_key: &SortableAttributeValue) -> Vec<(SortableAttributeValue, Document)> {
        self.data
            .get(partition_key)
            .map(|p| p.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Returns a snapshot of every item in the table.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Document> {
        self.data
            .iter()
            .flat_map(|p| p.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Key extraction
// ---------------------------------------------------------------------------

/// Extracts the primary key from an item (or key map) according to a schema.
///
/// # Errors
///
/// Returns `StorageError::MissingKeyAttribute` if a key attribute is missing,
/// or `StorageError::InvalidKeyType` if it has the wrong type.
#[allow(clippy::implicit_hasher)]
pub fn extract_primary_key(
    key_schema: &KeySchema,
    item: &Document,
) -> Result<PrimaryKey, StorageError> {
    let partition_key = extract_key_value(&key_schema.partition_key, item)?;
    let sort_key = match &key_schema.sort_key {
        Some(sk_def) => extract_key_value(sk_def, item)?,
        None => SortableAttributeValue::Sentinel,
    };

    Ok(PrimaryKey {
        partition_key,
        sort_key,
    })
}

fn extract_key_value(
    def: &KeyAttribute,
    item: &Document,
) -> Result<SortableAttributeValue, StorageError> {
    let value = item
        .get(&def.name)
        .ok_or_else(|| StorageError::MissingKeyAttribute {
            attr: def.name.clone(),
        })?;
    validate_key_type(def, value)?;
    SortableAttributeValue::from_attribute_value(&def.name, value)
}

/// Validates that an attribute value matches the key attribute's scalar type.
///
/// # Errors
///
/// Returns `StorageError::InvalidKeyType` on mismatch.
pub fn validate_key_type(def: &KeyAttribute, value: &AttributeValue) -> Result<(), StorageError> {
    if def.attr_type.matches(value) {
        Ok(())
    } else {
        Err(StorageError::InvalidKeyType {
            attr: def.name.clone(),
            expected: def.attr_type.as_str().to_owned(),
            actual: value.type_descriptor().to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
