//! Static per-type entity metadata.

use crate::error::{OrmError, OrmResult};

/// Reserved field refreshed with the creation time on the first save.
pub const CREATED_AT: &str = "createdAt";

/// Reserved field refreshed with the write time on every save.
pub const UPDATED_AT: &str = "updatedAt";

/// Sentinel timestamp meaning "not set yet".
pub const UNSET_TIMESTAMP: i64 = -1;

/// How a field's stored value is rebuilt on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    /// Passed through as stored.
    #[default]
    Scalar,
    /// A homogeneous set of strings or numbers.
    Set,
    /// A key-ordered map.
    Map,
}

/// One declared data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Attribute name in the store.
    pub name: &'static str,
    /// Coercion kind.
    pub kind: FieldKind,
}

impl FieldDef {
    /// A scalar field.
    #[must_use]
    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar,
        }
    }
}

/// Table and key layout of an entity type, declared once per type.
///
/// `fields` lists every data field, key fields and timestamps included, in
/// the order they are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySchema {
    /// Base table name. Empty means no table is configured.
    pub table_name: &'static str,
    /// Secondary index name. Empty for base-table entities.
    pub index_name: &'static str,
    /// Partition key field (of the index, for index-backed entities).
    pub partition_key: &'static str,
    /// Optional sort key field.
    pub sort_key: Option<&'static str>,
    /// Declared data fields.
    pub fields: &'static [FieldDef],
}

impl EntitySchema {
    /// Returns the table name, or `MissingTableName` if none is configured.
    pub fn table(&self) -> OrmResult<&'static str> {
        if self.table_name.is_empty() {
            Err(OrmError::MissingTableName)
        } else {
            Ok(self.table_name)
        }
    }

    /// Returns the index name for index-backed entities.
    #[must_use]
    pub fn index(&self) -> Option<&'static str> {
        (!self.index_name.is_empty()).then_some(self.index_name)
    }

    /// Returns the field definition named `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns `true` if `name` is a declared field.
    #[must_use]
    pub fn declares(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Returns the declared timestamp fields.
    pub fn timestamps(&self) -> impl Iterator<Item = &'static str> + '_ {
        [CREATED_AT, UPDATED_AT]
            .into_iter()
            .filter(|name| self.declares(name))
    }
}
