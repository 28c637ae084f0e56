//! Response types for the four store operations the mapper issues.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;

/// Output for the `GetItem` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemOutput {
    /// The item, or `None` if no item matches the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<HashMap<String, AttributeValue>>,
}

/// Output for the `PutItem` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutItemOutput {}

/// Output for the `DeleteItem` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteItemOutput {}

/// Output for the `Query` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryOutput {
    /// Items matching the key condition, in scan order.
    #[serde(default)]
    pub items: Vec<HashMap<String, AttributeValue>>,

    /// The number of items in the response.
    pub count: i32,

    /// The key of the last item evaluated. Present only when more matching
    /// items may remain; pass it back as `ExclusiveStartKey` to continue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<HashMap<String, AttributeValue>>,
}
