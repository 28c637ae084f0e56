//! The `Entity` trait and the `entity!` declaration macro.

use crate::coerce::{Direction, Record, fill_item};
use crate::error::OrmResult;
use crate::mapper::Mapper;
use crate::query::QueryBuilder;
use crate::schema::EntitySchema;
use crate::value::Value;

/// A type stored as one record per instance.
///
/// The type's [`Default`] instance is its template: it supplies the value of
/// every field that is absent when a record is loaded, and its field kinds
/// drive coercion. Implement with [`entity!`](crate::entity) unless the
/// field accessors need custom logic.
pub trait Entity: Default + Send + Sync + 'static {
    /// Static table and key layout of the type.
    fn schema() -> &'static EntitySchema;

    /// Returns the value of a declared field, or `None` for unknown names.
    fn get(&self, field: &str) -> Option<Value>;

    /// Assigns a declared field. Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `value` does not fit the field's type.
    fn set(&mut self, field: &str, value: Value) -> OrmResult<()>;

    /// A fresh, zero-valued instance.
    #[must_use]
    fn new_instance() -> Self {
        Self::default()
    }

    /// The declared fields of this instance by name.
    fn to_record(&self) -> Record {
        Self::schema()
            .fields
            .iter()
            .filter_map(|f| self.get(f.name).map(|v| (f.name.to_owned(), v)))
            .collect()
    }

    /// Builds an instance from a record, starting from the default instance.
    /// Names that are not declared fields are skipped.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if a value does not fit its field.
    fn from_record(record: Record) -> OrmResult<Self> {
        let schema = Self::schema();
        let mut entity = Self::default();
        for (name, value) in record {
            if schema.declares(&name) {
                entity.set(&name, value)?;
            }
        }
        Ok(entity)
    }

    /// An independent copy of this instance's data fields. Empty fields take
    /// the template's value.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` only if `get` and `set` disagree on a field.
    fn clone_entity(&self) -> OrmResult<Self> {
        let template = Self::default();
        let mut copy = template.to_record();
        fill_item(&self.to_record(), &mut copy, &template, true, Direction::Neutral)?;
        Self::from_record(copy)
    }

    /// Current partition key value.
    fn partition_key_value(&self) -> Value {
        self.get(Self::schema().partition_key).unwrap_or_default()
    }

    /// Current sort key value, if the type declares a sort key.
    fn sort_key_value(&self) -> Option<Value> {
        Self::schema()
            .sort_key
            .map(|field| self.get(field).unwrap_or_default())
    }

    /// A new query builder for this type.
    fn query_builder(mapper: &Mapper) -> QueryBuilder<Self> {
        mapper.query::<Self>()
    }
}

/// Implements [`Entity`] for a struct from a field list.
///
/// Each entry maps a struct field to its stored attribute name, optionally
/// followed by `as Set` or `as Map` to pick the coercion kind.
///
/// ```
/// use std::collections::BTreeSet;
///
/// #[derive(Debug, Default)]
/// struct Article {
///     slug: String,
///     title: String,
///     tags: BTreeSet<String>,
///     updated_at: i64,
/// }
///
/// dynastack_orm::entity! {
///     Article {
///         table: "articles",
///         index: "",
///         partition_key: "slug",
///         sort_key: None,
///         fields: {
///             slug: "slug",
///             title: "title",
///             tags: "tags" as Set,
///             updated_at: "updatedAt",
///         }
///     }
/// }
///
/// use dynastack_orm::Entity;
/// assert_eq!(Article::schema().table_name, "articles");
/// ```
#[macro_export]
macro_rules! entity {
    (@kind) => {
        $crate::FieldKind::Scalar
    };
    (@kind $kind:ident) => {
        $crate::FieldKind::$kind
    };
    (
        $ty:ident {
            table: $table:expr,
            index: $index:expr,
            partition_key: $pk:expr,
            sort_key: $sk:expr,
            fields: {
                $( $field:ident : $name:literal $(as $kind:ident)? ),* $(,)?
            } $(,)?
        }
    ) => {
        impl $crate::Entity for $ty {
            fn schema() -> &'static $crate::EntitySchema {
                static SCHEMA: $crate::EntitySchema = $crate::EntitySchema {
                    table_name: $table,
                    index_name: $index,
                    partition_key: $pk,
                    sort_key: $sk,
                    fields: &[$(
                        $crate::FieldDef {
                            name: $name,
                            kind: $crate::entity!(@kind $($kind)?),
                        }
                    ),*],
                };
                &SCHEMA
            }

            fn get(&self, field: &str) -> ::std::option::Option<$crate::Value> {
                match field {
                    $( $name => ::std::option::Option::Some($crate::FieldValue::to_value(&self.$field)), )*
                    _ => ::std::option::Option::None,
                }
            }

            fn set(&mut self, field: &str, value: $crate::Value) -> $crate::OrmResult<()> {
                match field {
                    $(
                        $name => {
                            self.$field = $crate::FieldValue::from_value(value)
                                .map_err(|e| e.for_field($name))?;
                        }
                    )*
                    _ => {}
                }
                ::std::result::Result::Ok(())
            }
        }
    };
}
