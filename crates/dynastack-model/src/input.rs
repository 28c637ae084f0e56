//! Request types for the four store operations the mapper issues.
//!
//! All input structs use `PascalCase` JSON field naming to match the DynamoDB
//! wire protocol. Optional fields are omitted when `None`, and empty maps are
//! omitted to produce minimal payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;

/// Input for the `GetItem` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemInput {
    /// The name of the table containing the item.
    pub table_name: String,

    /// The primary key of the item to retrieve.
    pub key: HashMap<String, AttributeValue>,

    /// If `true`, a strongly consistent read is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}

/// Input for the `PutItem` operation (full-item overwrite).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutItemInput {
    /// The name of the table to put the item into.
    pub table_name: String,

    /// A map of attribute name to attribute value, representing the item.
    pub item: HashMap<String, AttributeValue>,
}

/// Input for the `DeleteItem` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteItemInput {
    /// The name of the table from which to delete the item.
    pub table_name: String,

    /// The primary key of the item to delete.
    pub key: HashMap<String, AttributeValue>,
}

/// Input for the `Query` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryInput {
    /// The name of the table to query.
    pub table_name: String,

    /// The name of a secondary index to query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,

    /// The condition that specifies the key values for items to be retrieved.
    pub key_condition_expression: String,

    /// A comma-separated list of attributes to retrieve. `None` means all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,

    /// Substitution tokens for attribute names in an expression.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub expression_attribute_names: HashMap<String, String>,

    /// Substitution tokens for attribute values in an expression.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub expression_attribute_values: HashMap<String, AttributeValue>,

    /// Order of index traversal. `None` or `true` is ascending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_index_forward: Option<bool>,

    /// The maximum number of items to evaluate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,

    /// The primary key of the item after which evaluation resumes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub exclusive_start_key: HashMap<String, AttributeValue>,
}

impl QueryInput {
    /// Returns `true` unless the request asks for a descending scan.
    #[must_use]
    pub fn is_forward(&self) -> bool {
        self.scan_index_forward.unwrap_or(true)
    }
}
