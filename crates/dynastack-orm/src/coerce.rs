//! Value coercion between entity records and stored documents.
//!
//! An entity is viewed as a [`Record`]: its declared fields by name. Saving
//! runs [`fill_item`] in the [`Direction::ToStore`] direction and encodes the
//! result; loading decodes a document and runs [`Direction::FromStore`]
//! against the type's default instance, which supplies the value for every
//! absent attribute.

use std::collections::{BTreeMap, BTreeSet};

use dynastack_model::Document;

use crate::entity::Entity;
use crate::error::{OrmError, OrmResult};
use crate::schema::FieldKind;
use crate::value::Value;

/// Field name to value.
pub type Record = BTreeMap<String, Value>;

/// Names reserved for schema metadata. Never copied as data.
pub const METADATA_FIELDS: [&str; 4] = ["tableName", "indexName", "partitionKeyName", "sortKeyName"];

/// Which way [`fill_item`] is copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Entity to entity. Empty source values fall back to the template.
    #[default]
    Neutral,
    /// Entity to stored item.
    ToStore,
    /// Stored item to entity.
    FromStore,
}

/// Returns `true` if `value` is absent or empty. See [`Value::is_empty`].
#[must_use]
pub fn is_empty(value: Option<&Value>) -> bool {
    value.is_none_or(Value::is_empty)
}

/// Converts a field value into its stored form.
///
/// Empty values are omitted (`None`). Key-ordered maps become plain records;
/// sets and everything else pass through unchanged.
#[must_use]
pub fn to_store_value(value: Option<&Value>) -> Option<Value> {
    let value = value.filter(|v| !v.is_empty())?;
    Some(match value {
        Value::Map(m) => Value::Object(m.clone()),
        other => other.clone(),
    })
}

/// Rebuilds a field value from its stored form.
///
/// An absent value yields `default`. Set fields (declared as such, or with a
/// set default, or stored as a set) are rebuilt as sets; map fields are
/// rebuilt as key-ordered maps. Anything else passes through.
///
/// # Errors
///
/// Returns `TypeMismatch` when a set field holds something other than
/// strings or integers.
pub fn from_store_value(raw: Option<&Value>, kind: FieldKind, default: &Value) -> OrmResult<Value> {
    let Some(raw) = raw else {
        return Ok(default.clone());
    };

    if kind == FieldKind::Set || default.is_set() || raw.is_set() {
        return into_set(raw, default);
    }

    if kind == FieldKind::Map || matches!(default, Value::Map(_)) {
        if let Value::Object(m) | Value::Map(m) = raw {
            return Ok(Value::Map(m.clone()));
        }
    }

    Ok(raw.clone())
}

fn into_set(raw: &Value, default: &Value) -> OrmResult<Value> {
    match raw {
        Value::StringSet(_) | Value::NumberSet(_) => Ok(raw.clone()),
        Value::Null => Ok(default.clone()),
        Value::List(items) if items.is_empty() => Ok(match default {
            Value::NumberSet(_) => Value::NumberSet(BTreeSet::new()),
            _ => Value::StringSet(BTreeSet::new()),
        }),
        Value::List(items) => {
            if let Some(strings) = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect::<Option<BTreeSet<_>>>()
            {
                return Ok(Value::StringSet(strings));
            }
            items
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Ok(*i),
                    other => Err(OrmError::mismatch("set element", other.kind_name())),
                })
                .collect::<OrmResult<BTreeSet<_>>>()
                .map(Value::NumberSet)
        }
        other => Err(OrmError::mismatch("set", other.kind_name())),
    }
}

/// Copies every field declared on `template`'s type from `from` to `to`.
///
/// Fields are visited in declared order. `ToStore` and `FromStore` apply
/// [`to_store_value`] and [`from_store_value`]; `Neutral` copies non-empty
/// values and uses the template's value otherwise. Metadata names are never
/// copied and, with `strip_non_data_fields`, are removed from `to`. Declared
/// timestamps present in `from` are carried over verbatim.
///
/// # Errors
///
/// Propagates [`from_store_value`] failures.
pub fn fill_item<E: Entity>(
    from: &Record,
    to: &mut Record,
    template: &E,
    strip_non_data_fields: bool,
    direction: Direction,
) -> OrmResult<()> {
    let schema = E::schema();

    for field in schema.fields {
        let name = field.name;
        if METADATA_FIELDS.contains(&name) || schema.timestamps().any(|t| t == name) {
            continue;
        }
        let source = from.get(name);
        let value = match direction {
            Direction::ToStore => to_store_value(source),
            Direction::FromStore => {
                let default = template.get(name).unwrap_or_default();
                Some(from_store_value(source, field.kind, &default)?)
            }
            Direction::Neutral => match source {
                Some(v) if !v.is_empty() => Some(v.clone()),
                _ => template.get(name),
            },
        };
        match value {
            Some(v) => to.insert(name.to_owned(), v),
            None => to.remove(name),
        };
    }

    if strip_non_data_fields {
        for name in METADATA_FIELDS {
            to.remove(name);
        }
    }

    for name in schema.timestamps() {
        if let Some(v) = from.get(name) {
            to.insert(name.to_owned(), v.clone());
        }
    }
    Ok(())
}

/// Encodes a record as a stored document.
#[must_use]
pub fn encode_record(record: &Record) -> Document {
    record
        .iter()
        .map(|(k, v)| (k.clone(), v.to_attribute_value()))
        .collect()
}

/// Decodes a stored document into a record.
///
/// # Errors
///
/// Returns `TypeMismatch` for malformed numbers.
pub fn decode_document(doc: &Document) -> OrmResult<Record> {
    doc.iter()
        .map(|(k, v)| Ok((k.clone(), Value::from_attribute_value(v).map_err(|e| e.for_field(k))?)))
        .collect()
}

/// Builds the stored form of `entity`, before encoding.
pub(crate) fn store_record<E: Entity>(entity: &E) -> OrmResult<Record> {
    let mut item = Record::new();
    fill_item(&entity.to_record(), &mut item, &E::default(), true, Direction::ToStore)?;
    Ok(item)
}

/// Maps a stored document to a new entity.
pub(crate) fn entity_from_document<E: Entity>(
    doc: &Document,
    template: &E,
    strip_non_data_fields: bool,
) -> OrmResult<E> {
    let raw = decode_document(doc)?;
    let mut record = Record::new();
    fill_item(&raw, &mut record, template, strip_non_data_fields, Direction::FromStore)?;
    E::from_record(record)
}
