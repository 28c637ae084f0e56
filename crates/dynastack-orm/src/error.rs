//! Mapper error types.

use dynastack_model::StoreError;

/// Errors raised by the mapper.
///
/// Every variant except [`OrmError::NotFound`] and [`OrmError::Store`] is a
/// validation failure raised before any store round trip.
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    /// The partition key field is empty or not a string or number.
    #[error("Partition key is required: `{field}` must be a non-empty string or a number")]
    MissingPartitionKey {
        /// Name of the partition key field.
        field: &'static str,
    },
    /// A query was run without a partition key value.
    #[error("Partition key value is required")]
    MissingPartitionKeyValue,
    /// The sort key field of an instance is empty.
    #[error("Sort key is required: `{field}` must be a non-empty string or a number")]
    MissingSortKey {
        /// Name of the sort key field.
        field: &'static str,
    },
    /// A single-item lookup omitted the sort key value.
    #[error("Sort key value is required for `{field}`")]
    SortKeyRequired {
        /// Name of the sort key field.
        field: &'static str,
    },
    /// A write was attempted on an entity sourced from a secondary index.
    #[error("Items from index `{index}` are read-only")]
    ReadOnlyIndexEntity {
        /// The index the entity type reads from.
        index: &'static str,
    },
    /// The entity type has no base table.
    #[error("Entity has no table name")]
    MissingTableName,
    /// `begins_with` was used with a key that is not string-typed.
    #[error("Only string keys support begins_with(), `{field}` is not a string")]
    UnsupportedKeyType {
        /// The offending key field.
        field: &'static str,
    },
    /// A single-item lookup or `first` matched nothing.
    #[error("Item not found in table `{table}`")]
    NotFound {
        /// The table that was searched.
        table: &'static str,
    },
    /// A value could not be converted into a field's type.
    #[error("Type mismatch for field `{field}`: expected {expected}, found {found}")]
    TypeMismatch {
        /// The field being assigned, empty when not yet known.
        field: String,
        /// The expected value kind.
        expected: &'static str,
        /// The value kind found.
        found: &'static str,
    },
    /// A page token could not be decoded.
    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),
    /// `all` needed more pages than the configured cap.
    #[error("Query needed more than {max_pages} pages")]
    PageLimitExceeded {
        /// The configured cap.
        max_pages: usize,
    },
    /// A store round trip failed. Passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for mapper operations.
pub type OrmResult<T> = Result<T, OrmError>;

impl OrmError {
    /// Returns `true` for [`OrmError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Fills in the field name of a [`OrmError::TypeMismatch`] raised by a
    /// value conversion that did not know it.
    #[must_use]
    pub fn for_field(self, name: &str) -> Self {
        match self {
            Self::TypeMismatch {
                field,
                expected,
                found,
            } if field.is_empty() => Self::TypeMismatch {
                field: name.to_owned(),
                expected,
                found,
            },
            other => other,
        }
    }

    pub(crate) fn mismatch(expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            field: String::new(),
            expected,
            found,
        }
    }
}
