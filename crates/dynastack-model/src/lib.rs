//! Wire types for the dynastack document store.
//!
//! These types describe the four store round trips the mapper depends on
//! (`GetItem`, `PutItem`, `DeleteItem`, `Query`) using the DynamoDB JSON
//! protocol shapes, so the same values can be handed to an in-process store or
//! converted for a remote one.
// "DynamoDB" appears in many doc comments in this crate.
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod attribute_value;
pub mod error;
pub mod input;
pub mod output;

use std::collections::HashMap;

pub use attribute_value::AttributeValue;
pub use error::{StoreError, StoreErrorCode};
pub use input::{DeleteItemInput, GetItemInput, PutItemInput, QueryInput};
pub use output::{DeleteItemOutput, GetItemOutput, PutItemOutput, QueryOutput};

/// One stored record: attribute name to attribute value.
pub type Document = HashMap<String, AttributeValue>;
