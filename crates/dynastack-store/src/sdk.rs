//! Remote document store backed by the AWS SDK DynamoDB client.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue as SdkAttributeValue;
use tracing::{debug, warn};

use dynastack_model::{
    AttributeValue, DeleteItemInput, DeleteItemOutput, Document, GetItemInput, GetItemOutput,
    PutItemInput, PutItemOutput, QueryInput, QueryOutput, StoreError, StoreErrorCode,
};

use crate::client::DocumentStore;
use crate::config::StoreConfig;

/// A [`DocumentStore`] that forwards every call to a DynamoDB endpoint.
#[derive(Debug, Clone)]
pub struct SdkStore {
    client: Client,
    consistent_read: bool,
}

impl SdkStore {
    /// Wraps an already configured client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            consistent_read: false,
        }
    }

    /// Loads the shared AWS configuration chain with the region and endpoint
    /// from `config` and builds a client from it.
    pub async fn from_config(config: &StoreConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let Some(url) = &config.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;
        debug!(region = %config.region, endpoint = ?config.endpoint_url, "built remote store client");

        Self {
            client: Client::new(&sdk_config),
            consistent_read: config.consistent_read,
        }
    }

    /// Requests strongly consistent reads for `GetItem` unless the input
    /// says otherwise.
    #[must_use]
    pub fn with_consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = consistent_read;
        self
    }

    /// Returns the underlying SDK client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl DocumentStore for SdkStore {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, StoreError> {
        let consistent_read = input.consistent_read.unwrap_or(self.consistent_read);
        let out = self
            .client
            .get_item()
            .table_name(input.table_name)
            .set_key(Some(document_to_sdk(&input.key)))
            .consistent_read(consistent_read)
            .send()
            .await
            .map_err(store_error)?;

        Ok(GetItemOutput {
            item: out.item().map(document_from_sdk),
        })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, StoreError> {
        self.client
            .put_item()
            .table_name(input.table_name)
            .set_item(Some(document_to_sdk(&input.item)))
            .send()
            .await
            .map_err(store_error)?;
        Ok(PutItemOutput {})
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, StoreError> {
        self.client
            .delete_item()
            .table_name(input.table_name)
            .set_key(Some(document_to_sdk(&input.key)))
            .send()
            .await
            .map_err(store_error)?;
        Ok(DeleteItemOutput {})
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, StoreError> {
        let names = (!input.expression_attribute_names.is_empty())
            .then_some(input.expression_attribute_names);
        let values = (!input.expression_attribute_values.is_empty())
            .then(|| document_to_sdk(&input.expression_attribute_values));
        let start = (!input.exclusive_start_key.is_empty())
            .then(|| document_to_sdk(&input.exclusive_start_key));

        let out = self
            .client
            .query()
            .table_name(input.table_name)
            .set_index_name(input.index_name)
            .key_condition_expression(input.key_condition_expression)
            .set_projection_expression(input.projection_expression)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .set_scan_index_forward(input.scan_index_forward)
            .set_limit(input.limit)
            .set_exclusive_start_key(start)
            .send()
            .await
            .map_err(store_error)?;

        Ok(QueryOutput {
            items: out.items().iter().map(document_from_sdk).collect(),
            count: out.count(),
            last_evaluated_key: out.last_evaluated_key().map(document_from_sdk),
        })
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn store_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = match &err {
        SdkError::ServiceError(_) => err
            .code()
            .map_or(StoreErrorCode::Unknown, StoreErrorCode::from_code),
        _ => StoreErrorCode::Transport,
    };
    let message = err
        .message()
        .map_or_else(|| DisplayErrorContext(&err).to_string(), ToOwned::to_owned);
    warn!(%code, %message, "remote store request failed");
    StoreError::with_message(code, message).with_source(err)
}

fn document_to_sdk(doc: &Document) -> HashMap<String, SdkAttributeValue> {
    doc.iter().map(|(k, v)| (k.clone(), to_sdk(v))).collect()
}

fn document_from_sdk(doc: &HashMap<String, SdkAttributeValue>) -> Document {
    doc.iter().map(|(k, v)| (k.clone(), from_sdk(v))).collect()
}

fn to_sdk(value: &AttributeValue) -> SdkAttributeValue {
    match value {
        AttributeValue::S(s) => SdkAttributeValue::S(s.clone()),
        AttributeValue::N(n) => SdkAttributeValue::N(n.clone()),
        AttributeValue::B(b) => SdkAttributeValue::B(Blob::new(b.to_vec())),
        AttributeValue::Ss(v) => SdkAttributeValue::Ss(v.clone()),
        AttributeValue::Ns(v) => SdkAttributeValue::Ns(v.clone()),
        AttributeValue::Bs(v) => {
            SdkAttributeValue::Bs(v.iter().map(|b| Blob::new(b.to_vec())).collect())
        }
        AttributeValue::Bool(b) => SdkAttributeValue::Bool(*b),
        AttributeValue::Null(b) => SdkAttributeValue::Null(*b),
        AttributeValue::L(list) => SdkAttributeValue::L(list.iter().map(to_sdk).collect()),
        AttributeValue::M(m) => SdkAttributeValue::M(document_to_sdk(m)),
    }
}

fn from_sdk(value: &SdkAttributeValue) -> AttributeValue {
    match value {
        SdkAttributeValue::S(s) => AttributeValue::S(s.clone()),
        SdkAttributeValue::N(n) => AttributeValue::N(n.clone()),
        SdkAttributeValue::B(b) => AttributeValue::B(bytes::Bytes::copy_from_slice(b.as_ref())),
        SdkAttributeValue::Ss(v) => AttributeValue::Ss(v.clone()),
        SdkAttributeValue::Ns(v) => AttributeValue::Ns(v.clone()),
        SdkAttributeValue::Bs(v) => AttributeValue::Bs(
            v.iter()
                .map(|b| bytes::Bytes::copy_from_slice(b.as_ref()))
                .collect(),
        ),
        SdkAttributeValue::Bool(b) => AttributeValue::Bool(*b),
        SdkAttributeValue::Null(b) => AttributeValue::Null(*b),
        SdkAttributeValue::L(list) => AttributeValue::L(list.iter().map(from_sdk).collect()),
        SdkAttributeValue::M(m) => AttributeValue::M(document_from_sdk(m)),
        other => {
            warn!(?other, "unsupported attribute value type from remote store, reading as NULL");
            AttributeValue::Null(true)
        }
    }
}
