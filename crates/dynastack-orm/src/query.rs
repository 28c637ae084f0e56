//! Fluent key-condition query builder.
//!
//! A [`QueryBuilder`] accumulates a partition key, optional sort key
//! conditions, paging and projection, then compiles them into one
//! [`QueryInput`] per round trip. Sort key conditions are ANDed in a fixed
//! order and never cross-checked here; the store rejects combinations it
//! cannot evaluate.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use dynastack_model::{AttributeValue, QueryInput};
use dynastack_store::DocumentStore;
use futures::Stream;
use tracing::{debug, warn};

use crate::coerce::entity_from_document;
use crate::entity::Entity;
use crate::error::{OrmError, OrmResult};
use crate::result::{PageKey, QueryResult};
use crate::value::Value;

const PARTITION_KEY_ALIAS: &str = "#partitionKey";
const SORT_KEY_ALIAS: &str = "#sortKey";

// ---------------------------------------------------------------------------
// Sort order
// ---------------------------------------------------------------------------

/// Scan direction over the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending sort key order.
    #[default]
    Asc,
    /// Descending sort key order.
    Desc,
}

/// A sort order string other than `ASC` or `DESC`.
#[derive(Debug, thiserror::Error)]
#[error("invalid sort order `{0}`, expected ASC or DESC")]
pub struct InvalidSortOrder(String);

impl FromStr for SortOrder {
    type Err = InvalidSortOrder;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(Self::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            Err(InvalidSortOrder(s.to_owned()))
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds and runs key-condition queries for entity type `E`.
///
/// Obtain one from [`Mapper::query`](crate::Mapper::query). Setters consume
/// and return the builder; running methods borrow it, so a builder can be
/// reused across pages.
pub struct QueryBuilder<E> {
    store: Arc<dyn DocumentStore>,
    max_pages: Option<usize>,
    partition_key: Option<Value>,
    sort_key_equals: Option<Value>,
    less_than: Option<Value>,
    less_than_or_equals: Option<Value>,
    greater_than: Option<Value>,
    greater_than_or_equals: Option<Value>,
    between: Option<(Value, Value)>,
    begins_with: Option<Value>,
    page_key: Option<PageKey>,
    limit: usize,
    order: SortOrder,
    select: Vec<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for QueryBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_pages: self.max_pages,
            partition_key: self.partition_key.clone(),
            sort_key_equals: self.sort_key_equals.clone(),
            less_than: self.less_than.clone(),
            less_than_or_equals: self.less_than_or_equals.clone(),
            greater_than: self.greater_than.clone(),
            greater_than_or_equals: self.greater_than_or_equals.clone(),
            between: self.between.clone(),
            begins_with: self.begins_with.clone(),
            page_key: self.page_key.clone(),
            limit: self.limit,
            order: self.order,
            select: self.select.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for QueryBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("partition_key", &self.partition_key)
            .field("sort_key_equals", &self.sort_key_equals)
            .field("between", &self.between)
            .field("begins_with", &self.begins_with)
            .field("page_key", &self.page_key)
            .field("limit", &self.limit)
            .field("order", &self.order)
            .field("select", &self.select)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> QueryBuilder<E> {
    pub(crate) fn new(store: Arc<dyn DocumentStore>, max_pages: Option<usize>) -> Self {
        Self {
            store,
            max_pages,
            partition_key: None,
            sort_key_equals: None,
            less_than: None,
            less_than_or_equals: None,
            greater_than: None,
            greater_than_or_equals: None,
            between: None,
            begins_with: None,
            page_key: None,
            limit: 0,
            order: SortOrder::Asc,
            select: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Restricts the query to one partition. Required before running.
    #[must_use]
    pub fn partition_key_equals(mut self, value: impl Into<Value>) -> Self {
        self.partition_key = Some(value.into());
        self
    }

    /// Matches one sort key exactly. Takes precedence over every other sort
    /// key condition.
    #[must_use]
    pub fn sort_key_equals(mut self, value: impl Into<Value>) -> Self {
        self.sort_key_equals = Some(value.into());
        self
    }

    /// Sort key `<` value.
    #[must_use]
    pub fn sort_key_less_than(mut self, value: impl Into<Value>) -> Self {
        self.less_than = Some(value.into());
        self
    }

    /// Sort key `<=` value.
    #[must_use]
    pub fn sort_key_less_than_or_equals(mut self, value: impl Into<Value>) -> Self {
        self.less_than_or_equals = Some(value.into());
        self
    }

    /// Sort key `>` value.
    #[must_use]
    pub fn sort_key_greater_than(mut self, value: impl Into<Value>) -> Self {
        self.greater_than = Some(value.into());
        self
    }

    /// Sort key `>=` value.
    #[must_use]
    pub fn sort_key_greater_than_or_equals(mut self, value: impl Into<Value>) -> Self {
        self.greater_than_or_equals = Some(value.into());
        self
    }

    /// Sort key within `[lower, upper]`, both ends inclusive.
    #[must_use]
    pub fn sort_key_between(mut self, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        self.between = Some((lower.into(), upper.into()));
        self
    }

    /// Sort key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedKeyType` if the entity's partition key, or its
    /// sort key when it declares one, is not string-typed. A key whose
    /// default is null, such as an `Option<String>` field, is accepted and
    /// left for the store to type-check.
    pub fn sort_key_begins_with(mut self, prefix: impl Into<String>) -> OrmResult<Self> {
        let schema = E::schema();
        let template = E::default();
        let keys = std::iter::once(schema.partition_key).chain(schema.sort_key);
        for field in keys {
            if !matches!(template.get(field), Some(Value::String(_) | Value::Null)) {
                return Err(OrmError::UnsupportedKeyType { field });
            }
        }
        self.begins_with = Some(Value::String(prefix.into()));
        Ok(self)
    }

    /// Resumes after the given cursor. `None` starts from the beginning.
    #[must_use]
    pub fn page_key(mut self, page_key: Option<PageKey>) -> Self {
        self.page_key = page_key;
        self
    }

    /// Alias of [`QueryBuilder::page_key`].
    #[must_use]
    pub fn skip(self, page_key: Option<PageKey>) -> Self {
        self.page_key(page_key)
    }

    /// Caps the items evaluated per round trip. Zero means no cap.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Alias of [`QueryBuilder::limit`].
    #[must_use]
    pub fn take(self, limit: usize) -> Self {
        self.limit(limit)
    }

    /// Sets the scan direction. Ascending by default.
    #[must_use]
    pub fn sort(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Restricts the returned attributes. Declared timestamps are always
    /// added to a non-empty selection.
    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    fn has_sort_condition(&self) -> bool {
        self.sort_key_equals.is_some()
            || self.less_than.is_some()
            || self.less_than_or_equals.is_some()
            || self.greater_than.is_some()
            || self.greater_than_or_equals.is_some()
            || self.between.is_some()
            || self.begins_with.is_some()
    }

    /// Builds the request [`QueryBuilder::query`] would send, without
    /// sending it.
    ///
    /// # Errors
    ///
    /// Returns `MissingTableName` or `MissingPartitionKeyValue`.
    pub fn compile(&self) -> OrmResult<QueryInput> {
        let schema = E::schema();
        let table = schema.table()?;
        let partition_key = self
            .partition_key
            .as_ref()
            .filter(|v| v.is_key_value())
            .ok_or(OrmError::MissingPartitionKeyValue)?;

        let mut values = Placeholders::default();
        let mut expression = format!("{PARTITION_KEY_ALIAS} = {}", values.push(partition_key));

        if let Some(v) = &self.sort_key_equals {
            expression.push_str(&format!(" and {SORT_KEY_ALIAS} = {}", values.push(v)));
        } else {
            let comparisons = [
                ("<", &self.less_than),
                ("<=", &self.less_than_or_equals),
                (">", &self.greater_than),
                (">=", &self.greater_than_or_equals),
            ];
            for (op, value) in comparisons {
                if let Some(v) = value {
                    expression.push_str(&format!(" and {SORT_KEY_ALIAS} {op} {}", values.push(v)));
                }
            }
            if let Some((lower, upper)) = &self.between {
                let lower = values.push(lower);
                let upper = values.push(upper);
                expression.push_str(&format!(" and {SORT_KEY_ALIAS} BETWEEN {lower} and {upper}"));
            }
            if let Some(prefix) = &self.begins_with {
                expression.push_str(&format!(" AND begins_with({SORT_KEY_ALIAS}, {})", values.push(prefix)));
            }
        }

        let mut names = HashMap::from([(PARTITION_KEY_ALIAS.to_owned(), schema.partition_key.to_owned())]);
        if self.has_sort_condition() {
            if let Some(sort_key) = schema.sort_key {
                names.insert(SORT_KEY_ALIAS.to_owned(), sort_key.to_owned());
            }
        }

        let projection_expression = (!self.select.is_empty()).then(|| {
            let mut fields = self.select.clone();
            for ts in schema.timestamps() {
                if !fields.iter().any(|f| f == ts) {
                    fields.push(ts.to_owned());
                }
            }
            fields.join(",")
        });

        Ok(QueryInput {
            table_name: table.to_owned(),
            index_name: schema.index().map(str::to_owned),
            key_condition_expression: expression,
            projection_expression,
            expression_attribute_names: names,
            expression_attribute_values: values.into_map(),
            scan_index_forward: (self.order == SortOrder::Desc).then_some(false),
            limit: (self.limit > 0).then(|| i32::try_from(self.limit).unwrap_or(i32::MAX)),
            exclusive_start_key: self
                .page_key
                .as_ref()
                .map(|k| k.as_document().clone())
                .unwrap_or_default(),
        })
    }

    /// Runs one round trip and maps the returned rows.
    ///
    /// # Errors
    ///
    /// Returns the [`QueryBuilder::compile`] errors, or the store's error.
    pub async fn query(&self, strip_non_data_fields: bool) -> OrmResult<QueryResult<E>> {
        let input = self.compile()?;
        let schema = E::schema();
        debug!(
            table = schema.table_name,
            index = schema.index_name,
            key_condition = %input.key_condition_expression,
            resumed = self.page_key.is_some(),
            "running query"
        );

        let output = self.store.query(input).await?;
        let template = E::default();
        let items = output
            .items
            .iter()
            .map(|doc| entity_from_document(doc, &template, strip_non_data_fields))
            .collect::<OrmResult<Vec<_>>>()?;
        let page_key = output
            .last_evaluated_key
            .filter(|k| !k.is_empty())
            .map(PageKey::from);

        debug!(
            table = schema.table_name,
            items = items.len(),
            has_more = page_key.is_some(),
            "query page returned"
        );
        Ok(QueryResult { items, page_key })
    }

    /// Fetches every matching item, following cursors page by page.
    ///
    /// Any cursor and limit set before the call are cleared first. The
    /// cursor is cleared again when the call returns, on success or error.
    ///
    /// # Errors
    ///
    /// Returns the [`QueryBuilder::query`] errors, or `PageLimitExceeded`
    /// when the mapper's `max_pages` cap is reached with pages remaining.
    pub async fn all(&mut self, strip_non_data_fields: bool) -> OrmResult<Vec<E>> {
        self.page_key = None;
        self.limit = 0;

        let mut items = Vec::new();
        let mut pages = 0usize;
        loop {
            if let Some(max_pages) = self.max_pages {
                if pages >= max_pages {
                    warn!(table = E::schema().table_name, max_pages, "query page cap reached");
                    self.page_key = None;
                    return Err(OrmError::PageLimitExceeded { max_pages });
                }
            }
            let page = match self.query(strip_non_data_fields).await {
                Ok(page) => page,
                Err(e) => {
                    self.page_key = None;
                    return Err(e);
                }
            };
            pages += 1;
            items.extend(page.items);
            match page.page_key {
                Some(next) => self.page_key = Some(next),
                None => break,
            }
        }
        self.page_key = None;
        Ok(items)
    }

    /// Fetches the first matching item.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing matches, plus the
    /// [`QueryBuilder::query`] errors.
    pub async fn first(&mut self, strip_non_data_fields: bool) -> OrmResult<E> {
        self.limit = 1;
        self.query(strip_non_data_fields)
            .await?
            .items
            .into_iter()
            .next()
            .ok_or(OrmError::NotFound {
                table: E::schema().table_name,
            })
    }

    /// Like [`QueryBuilder::first`], returning `default` instead of failing
    /// with `NotFound`.
    ///
    /// # Errors
    ///
    /// Every error except `NotFound`.
    pub async fn first_or_default(
        &mut self,
        default: Option<E>,
        strip_non_data_fields: bool,
    ) -> OrmResult<Option<E>> {
        match self.first(strip_non_data_fields).await {
            Ok(item) => Ok(Some(item)),
            Err(e) if e.is_not_found() => Ok(default),
            Err(e) => Err(e),
        }
    }

    /// Streams result pages lazily, one round trip per page, starting from
    /// the current cursor.
    pub fn pages(
        &self,
        strip_non_data_fields: bool,
    ) -> impl Stream<Item = OrmResult<QueryResult<E>>> + Send + 'static {
        futures::stream::try_unfold(Some(self.clone()), move |state| {
            next_page(state, strip_non_data_fields)
        })
    }
}

async fn next_page<E: Entity>(
    state: Option<QueryBuilder<E>>,
    strip_non_data_fields: bool,
) -> OrmResult<Option<(QueryResult<E>, Option<QueryBuilder<E>>)>> {
    let Some(mut builder) = state else {
        return Ok(None);
    };
    let page = builder.query(strip_non_data_fields).await?;
    let next = page.page_key.clone().map(|key| {
        builder.page_key = Some(key);
        builder
    });
    Ok(Some((page, next)))
}

/// Sequential `:valN` value placeholders.
#[derive(Debug, Default)]
struct Placeholders {
    values: HashMap<String, AttributeValue>,
}

impl Placeholders {
    fn push(&mut self, value: &Value) -> String {
        let alias = format!(":val{}", self.values.len() + 1);
        self.values.insert(alias.clone(), value.to_attribute_value());
        alias
    }

    fn into_map(self) -> HashMap<String, AttributeValue> {
        self.values
    }
}
