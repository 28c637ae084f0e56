//! Integration tests for the dynastack mapper over a live store.
//!
//! These tests require a DynamoDB-compatible server at `localhost:4566`
//! (override with `DYNASTACK_ENDPOINT_URL`). They are marked `#[ignore]` so
//! they don't run during normal `cargo test`.
//!
//! Run them with:
//! ```text
//! cargo test -p dynastack-integration -- --ignored
//! ```

use std::sync::{Arc, Once};

use aws_sdk_dynamodb::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType, Projection,
    ProjectionType, ScalarAttributeType,
};
use dynastack_orm::{Mapper, MapperConfig};
use dynastack_store::SdkStore;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Endpoint URL for the server.
fn endpoint_url() -> String {
    std::env::var("DYNASTACK_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_owned())
}

/// Create a configured DynamoDB client pointing at the local server.
#[must_use]
pub fn dynamodb_client() -> aws_sdk_dynamodb::Client {
    init_tracing();

    let creds = Credentials::new("test", "test", None, None, "integration-test");

    let config = aws_sdk_dynamodb::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(creds)
        .endpoint_url(endpoint_url())
        .build();

    aws_sdk_dynamodb::Client::from_conf(config)
}

/// Create a mapper over an [`SdkStore`] for the local server.
#[must_use]
pub fn mapper(config: MapperConfig) -> Mapper {
    let store = SdkStore::new(dynamodb_client()).with_consistent_read(true);
    Mapper::with_config(Arc::new(store), config)
}

/// Generate a unique partition key value so tests sharing a table don't
/// see each other's items.
#[must_use]
pub fn unique_key(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("{prefix}-{id}")
}

/// A key attribute and its scalar type.
pub type KeyDef = (&'static str, ScalarAttributeType);

/// Layout of a secondary index.
#[derive(Debug, Clone)]
pub struct IndexDef {
    /// Index name.
    pub name: &'static str,
    /// Partition key.
    pub partition_key: KeyDef,
    /// Optional sort key.
    pub sort_key: Option<KeyDef>,
}

/// Layout of a table.
#[derive(Debug, Clone)]
pub struct TableDef {
    /// Table name.
    pub name: &'static str,
    /// Partition key.
    pub partition_key: KeyDef,
    /// Optional sort key.
    pub sort_key: Option<KeyDef>,
    /// Global secondary indexes, projecting all attributes.
    pub indexes: Vec<IndexDef>,
}

fn key_schema(partition_key: &KeyDef, sort_key: Option<&KeyDef>) -> anyhow::Result<Vec<KeySchemaElement>> {
    let mut schema = vec![
        KeySchemaElement::builder()
            .attribute_name(partition_key.0)
            .key_type(KeyType::Hash)
            .build()?,
    ];
    if let Some((name, _)) = sort_key {
        schema.push(
            KeySchemaElement::builder()
                .attribute_name(*name)
                .key_type(KeyType::Range)
                .build()?,
        );
    }
    Ok(schema)
}

/// Create the table unless it already exists.
pub async fn ensure_table(client: &aws_sdk_dynamodb::Client, def: &TableDef) -> anyhow::Result<()> {
    if client.describe_table().table_name(def.name).send().await.is_ok() {
        return Ok(());
    }

    let mut attributes: Vec<&KeyDef> = Vec::new();
    let all_keys = std::iter::once(&def.partition_key)
        .chain(def.sort_key.as_ref())
        .chain(def.indexes.iter().flat_map(|i| std::iter::once(&i.partition_key).chain(i.sort_key.as_ref())));
    for key in all_keys {
        if !attributes.iter().any(|a| a.0 == key.0) {
            attributes.push(key);
        }
    }
    let attribute_definitions = attributes
        .into_iter()
        .map(|(name, attr_type)| {
            AttributeDefinition::builder()
                .attribute_name(*name)
                .attribute_type(attr_type.clone())
                .build()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut indexes = Vec::new();
    for index in &def.indexes {
        indexes.push(
            GlobalSecondaryIndex::builder()
                .index_name(index.name)
                .set_key_schema(Some(key_schema(&index.partition_key, index.sort_key.as_ref())?))
                .projection(Projection::builder().projection_type(ProjectionType::All).build())
                .build()?,
        );
    }

    let created = client
        .create_table()
        .table_name(def.name)
        .set_key_schema(Some(key_schema(&def.partition_key, def.sort_key.as_ref())?))
        .set_attribute_definitions(Some(attribute_definitions))
        .set_global_secondary_indexes((!indexes.is_empty()).then_some(indexes))
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await;
    if let Err(e) = created {
        // Another test may have created it concurrently.
        if client.describe_table().table_name(def.name).send().await.is_ok() {
            return Ok(());
        }
        return Err(e.into());
    }
    tracing::info!(table = def.name, "created integration table");
    Ok(())
}

mod test_mapper;
