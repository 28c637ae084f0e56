//! Entity persistence over a shared [`DocumentStore`] handle.

use std::sync::Arc;

use chrono::Utc;
use dynastack_model::{DeleteItemInput, Document, GetItemInput, PutItemInput};
use dynastack_store::{DocumentStore, SdkStore, StoreConfig};
use tracing::debug;

use crate::coerce::{encode_record, entity_from_document, store_record};
use crate::config::MapperConfig;
use crate::entity::Entity;
use crate::error::{OrmError, OrmResult};
use crate::query::QueryBuilder;
use crate::schema::{CREATED_AT, UPDATED_AT};
use crate::value::Value;

/// Saves, loads, deletes and queries entities.
///
/// Cloning is cheap; clones share one store handle.
#[derive(Debug, Clone)]
pub struct Mapper {
    store: Arc<dyn DocumentStore>,
    config: MapperConfig,
}

impl Mapper {
    /// Creates a mapper with default settings.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, MapperConfig::default())
    }

    /// Creates a mapper with explicit settings.
    #[must_use]
    pub fn with_config(store: Arc<dyn DocumentStore>, config: MapperConfig) -> Self {
        Self { store, config }
    }

    /// Creates a mapper backed by a remote store.
    pub async fn connect(store_config: &StoreConfig, config: MapperConfig) -> Self {
        let store = SdkStore::from_config(store_config).await;
        Self::with_config(Arc::new(store), config)
    }

    /// The shared store handle.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The mapper settings.
    #[must_use]
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// A new query builder for `E`.
    #[must_use]
    pub fn query<E: Entity>(&self) -> QueryBuilder<E> {
        QueryBuilder::new(Arc::clone(&self.store), self.config.max_pages)
    }

    /// Writes the whole entity, replacing any stored item with the same key.
    ///
    /// Declared timestamps are refreshed in the same write: `updatedAt`
    /// always, `createdAt` only while still unset. The entity is updated to
    /// match what was stored.
    ///
    /// # Errors
    ///
    /// `ReadOnlyIndexEntity`, `MissingTableName`, `MissingPartitionKey` and
    /// `MissingSortKey` are raised before the store is contacted.
    pub async fn save<E: Entity>(&self, entity: &mut E) -> OrmResult<()> {
        let table = writable_table::<E>()?;
        check_keys(entity)?;

        let mut record = store_record(entity)?;
        let schema = E::schema();
        let now = Value::Int(Utc::now().timestamp_millis());
        let created = schema.declares(CREATED_AT) && is_unset_timestamp(entity.get(CREATED_AT));
        if created {
            record.insert(CREATED_AT.to_owned(), now.clone());
        }
        let updated = schema.declares(UPDATED_AT);
        if updated {
            record.insert(UPDATED_AT.to_owned(), now.clone());
        }

        debug!(table, attributes = record.len(), "putting item");
        self.store
            .put_item(PutItemInput {
                table_name: table.to_owned(),
                item: encode_record(&record),
            })
            .await?;

        if created {
            entity.set(CREATED_AT, now.clone())?;
        }
        if updated {
            entity.set(UPDATED_AT, now)?;
        }
        Ok(())
    }

    /// Deletes the item identified by the entity's key fields. Deleting an
    /// absent item succeeds.
    ///
    /// # Errors
    ///
    /// `ReadOnlyIndexEntity`, `MissingTableName`, `MissingPartitionKey` and
    /// `MissingSortKey` are raised before the store is contacted.
    pub async fn delete<E: Entity>(&self, entity: &E) -> OrmResult<()> {
        let table = writable_table::<E>()?;
        check_keys(entity)?;

        let key = key_document::<E>(&entity.partition_key_value(), entity.sort_key_value().as_ref());
        debug!(table, "deleting item");
        self.store
            .delete_item(DeleteItemInput {
                table_name: table.to_owned(),
                key,
            })
            .await?;
        Ok(())
    }

    /// Deletes by key without loading the item first.
    ///
    /// # Errors
    ///
    /// As [`Mapper::delete`]. A sort key entity given no sort key value fails
    /// with `MissingSortKey`.
    pub async fn delete_by_key<E: Entity>(
        &self,
        partition_key: impl Into<Value>,
        sort_key: Option<Value>,
    ) -> OrmResult<()> {
        writable_table::<E>()?;
        let schema = E::schema();
        let mut entity = E::new_instance();
        entity.set(schema.partition_key, partition_key.into())?;
        if let Some(field) = schema.sort_key {
            let value = sort_key
                .filter(Value::is_key_value)
                .ok_or(OrmError::MissingSortKey { field })?;
            entity.set(field, value)?;
        }
        self.delete(&entity).await
    }

    /// Loads one entity by key, with metadata stripped.
    ///
    /// # Errors
    ///
    /// See [`Mapper::find_with`].
    pub async fn find<E: Entity>(&self, partition_key: impl Into<Value>, sort_key: Option<Value>) -> OrmResult<E> {
        self.find_with(partition_key, sort_key, true).await
    }

    /// Loads one entity by key.
    ///
    /// Base table entities use a direct key lookup. Index entities run a
    /// query on both index keys and take the first match.
    ///
    /// # Errors
    ///
    /// `SortKeyRequired` if the entity declares a sort key and `sort_key` is
    /// empty, `NotFound` if nothing matches, and store errors unchanged.
    pub async fn find_with<E: Entity>(
        &self,
        partition_key: impl Into<Value>,
        sort_key: Option<Value>,
        strip_non_data_fields: bool,
    ) -> OrmResult<E> {
        let schema = E::schema();
        let partition_key = partition_key.into();
        let sort_key = sort_key.filter(Value::is_key_value);
        if let Some(field) = schema.sort_key {
            if sort_key.is_none() {
                return Err(OrmError::SortKeyRequired { field });
            }
        }

        if schema.index().is_some() {
            let mut builder = self.query::<E>().partition_key_equals(partition_key);
            if let Some(sort_key) = sort_key {
                builder = builder.sort_key_equals(sort_key);
            }
            return builder.first(strip_non_data_fields).await;
        }

        let table = schema.table()?;
        if !partition_key.is_key_value() {
            return Err(OrmError::MissingPartitionKey {
                field: schema.partition_key,
            });
        }
        let key = key_document::<E>(&partition_key, sort_key.as_ref());
        debug!(table, "getting item");
        let output = self
            .store
            .get_item(GetItemInput {
                table_name: table.to_owned(),
                key,
                consistent_read: None,
            })
            .await?;
        match output.item {
            Some(doc) => entity_from_document(&doc, &E::default(), strip_non_data_fields),
            None => Err(OrmError::NotFound { table }),
        }
    }

    /// Like [`Mapper::find`], returning `default` instead of failing with
    /// `NotFound`.
    ///
    /// # Errors
    ///
    /// Every [`Mapper::find`] error except `NotFound`.
    pub async fn find_or_default<E: Entity>(
        &self,
        partition_key: impl Into<Value>,
        sort_key: Option<Value>,
        default: Option<E>,
    ) -> OrmResult<Option<E>> {
        self.find_or_default_with(partition_key, sort_key, default, true).await
    }

    /// Like [`Mapper::find_with`], returning `default` instead of failing
    /// with `NotFound`.
    ///
    /// # Errors
    ///
    /// Every [`Mapper::find_with`] error except `NotFound`.
    pub async fn find_or_default_with<E: Entity>(
        &self,
        partition_key: impl Into<Value>,
        sort_key: Option<Value>,
        default: Option<E>,
        strip_non_data_fields: bool,
    ) -> OrmResult<Option<E>> {
        match self.find_with(partition_key, sort_key, strip_non_data_fields).await {
            Ok(entity) => Ok(Some(entity)),
            Err(e) if e.is_not_found() => Ok(default),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Key validation
// ---------------------------------------------------------------------------

fn writable_table<E: Entity>() -> OrmResult<&'static str> {
    let schema = E::schema();
    if let Some(index) = schema.index() {
        return Err(OrmError::ReadOnlyIndexEntity { index });
    }
    schema.table()
}

fn check_keys<E: Entity>(entity: &E) -> OrmResult<()> {
    let schema = E::schema();
    if !entity.partition_key_value().is_key_value() {
        return Err(OrmError::MissingPartitionKey {
            field: schema.partition_key,
        });
    }
    if let (Some(field), Some(value)) = (schema.sort_key, entity.sort_key_value()) {
        if !value.is_key_value() {
            return Err(OrmError::MissingSortKey { field });
        }
    }
    Ok(())
}

fn is_unset_timestamp(value: Option<Value>) -> bool {
    match value {
        Some(Value::Int(ts)) => ts < 0,
        Some(Value::Null) | None => true,
        Some(_) => false,
    }
}

fn key_document<E: Entity>(partition_key: &Value, sort_key: Option<&Value>) -> Document {
    let schema = E::schema();
    let mut key = Document::from([(schema.partition_key.to_owned(), partition_key.to_attribute_value())]);
    if let (Some(field), Some(value)) = (schema.sort_key, sort_key) {
        key.insert(field.to_owned(), value.to_attribute_value());
    }
    key
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use dynastack_model::{AttributeValue, StoreErrorCode};
    use dynastack_store::MemoryStore;

    use super::*;
    use crate::schema::UNSET_TIMESTAMP;
    use crate::test_support::{
        Note, Order, OrderByStatus, Orphan, Recorded, RecordingStore, User, memory_mapper,
        recording_mapper,
    };

    fn alice() -> User {
        User {
            user_id: "u1".to_owned(),
            name: "Alice".to_owned(),
            age: 0,
            tags: ["admin", "ops"].into_iter().map(str::to_owned).collect(),
            prefs: BTreeMap::from([("theme".to_owned(), "dark".to_owned())]),
            ..User::default()
        }
    }

    #[tokio::test]
    async fn test_should_round_trip_partition_key_entity() {
        let (mapper, _) = memory_mapper(None);
        let mut user = alice();
        mapper.save(&mut user).await.unwrap();

        let found: User = mapper.find("u1", None).await.unwrap();
        assert_eq!(found, user);
    }

    #[tokio::test]
    async fn test_should_round_trip_sort_key_entity() {
        let (mapper, _) = memory_mapper(None);
        for slug in ["a", "b"] {
            let mut note = Note {
                owner: "ann".to_owned(),
                slug: slug.to_owned(),
                body: format!("body {slug}"),
            };
            mapper.save(&mut note).await.unwrap();
        }

        let found: Note = mapper.find("ann", Some(Value::from("b"))).await.unwrap();
        assert_eq!(found.body, "body b");
    }

    #[tokio::test]
    async fn test_should_stamp_timestamps_on_save() {
        let (mapper, _) = memory_mapper(None);
        let mut user = alice();
        assert_eq!(user.created_at, UNSET_TIMESTAMP);

        mapper.save(&mut user).await.unwrap();
        let created_at = user.created_at;
        assert!(created_at > 0);
        assert_eq!(user.updated_at, created_at);

        user.name = "Alicia".to_owned();
        mapper.save(&mut user).await.unwrap();
        assert_eq!(user.created_at, created_at);
        assert!(user.updated_at >= created_at);

        let stored: User = mapper.find("u1", None).await.unwrap();
        assert_eq!(stored.created_at, created_at);
        assert_eq!(stored.updated_at, user.updated_at);
        assert_eq!(stored.name, "Alicia");
    }

    #[tokio::test]
    async fn test_should_write_stored_form_of_fields() {
        let (mapper, store) = recording_mapper(RecordingStore::default());
        let mut user = User {
            tags: Default::default(),
            ..alice()
        };
        mapper.save(&mut user).await.unwrap();

        let requests = store.requests();
        let [Recorded::Put(put)] = requests.as_slice() else {
            panic!("expected one put, got {requests:?}");
        };
        assert_eq!(put.table_name, "users");
        assert_eq!(put.item["userId"], AttributeValue::string("u1"));
        assert_eq!(put.item["age"], AttributeValue::number(0));
        assert!(!put.item.contains_key("tags"));
        assert_eq!(
            put.item["prefs"],
            AttributeValue::M([("theme".to_owned(), AttributeValue::string("dark"))].into())
        );
        assert_eq!(put.item["createdAt"], AttributeValue::number(user.created_at));
    }

    #[tokio::test]
    async fn test_should_reject_missing_keys_without_contacting_store() {
        let (mapper, store) = recording_mapper(RecordingStore::default());

        let mut user = User::default();
        let err = mapper.save(&mut user).await.unwrap_err();
        assert!(matches!(err, OrmError::MissingPartitionKey { field: "userId" }));

        let mut note = Note {
            owner: "ann".to_owned(),
            ..Note::default()
        };
        let err = mapper.save(&mut note).await.unwrap_err();
        assert!(matches!(err, OrmError::MissingSortKey { field: "slug" }));
        assert!(matches!(mapper.delete(&note).await, Err(OrmError::MissingSortKey { .. })));

        assert_eq!(store.call_count(), 0);
        assert_eq!(user.created_at, UNSET_TIMESTAMP);
    }

    #[tokio::test]
    async fn test_should_refuse_writes_to_index_entities() {
        let (mapper, store) = recording_mapper(RecordingStore::default());
        let mut view = OrderByStatus {
            customer_id: "c1".to_owned(),
            order_id: 1,
            status: "open".to_owned(),
            placed_at: 1,
        };

        let err = mapper.save(&mut view).await.unwrap_err();
        assert!(matches!(err, OrmError::ReadOnlyIndexEntity { index: "by-status" }));
        assert!(matches!(
            mapper.delete(&view).await,
            Err(OrmError::ReadOnlyIndexEntity { .. })
        ));
        assert!(matches!(
            mapper.delete_by_key::<OrderByStatus>("open", Some(Value::Int(1))).await,
            Err(OrmError::ReadOnlyIndexEntity { .. })
        ));
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_should_require_table_name() {
        let (mapper, store) = recording_mapper(RecordingStore::default());
        let mut orphan = Orphan { id: "x".to_owned() };

        assert!(matches!(mapper.save(&mut orphan).await, Err(OrmError::MissingTableName)));
        assert!(matches!(mapper.find::<Orphan>("x", None).await, Err(OrmError::MissingTableName)));
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_should_report_not_found_or_default() {
        let (mapper, _) = memory_mapper(None);

        let err = mapper.find::<User>("ghost", None).await.unwrap_err();
        assert!(matches!(err, OrmError::NotFound { table: "users" }));

        let fallback = User {
            name: "guest".to_owned(),
            ..User::default()
        };
        let got = mapper
            .find_or_default::<User>("ghost", None, Some(fallback.clone()))
            .await
            .unwrap();
        assert_eq!(got, Some(fallback));
        assert_eq!(mapper.find_or_default::<User>("ghost", None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_should_require_sort_key_value_for_find() {
        let (mapper, store) = recording_mapper(RecordingStore::default());

        let err = mapper.find::<Note>("ann", None).await.unwrap_err();
        assert!(matches!(err, OrmError::SortKeyRequired { field: "slug" }));
        let err = mapper.find::<Note>("ann", Some(Value::from(""))).await.unwrap_err();
        assert!(matches!(err, OrmError::SortKeyRequired { .. }));
        let err = mapper
            .find_or_default::<OrderByStatus>("open", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::SortKeyRequired { field: "placedAt" }));
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_should_send_exact_key_for_lookup() {
        let item = Document::from([
            ("customerId".to_owned(), AttributeValue::string("c1")),
            ("orderId".to_owned(), AttributeValue::number(9)),
            ("status".to_owned(), AttributeValue::string("open")),
        ]);
        let (mapper, store) = recording_mapper(RecordingStore::with_item(item));

        let order: Order = mapper.find("c1", Some(Value::Int(9))).await.unwrap();
        assert_eq!(order.status, "open");
        assert_eq!(order.placed_at, 0);

        let requests = store.requests();
        let [Recorded::Get(get)] = requests.as_slice() else {
            panic!("expected one get, got {requests:?}");
        };
        assert_eq!(get.table_name, "orders");
        assert_eq!(get.key.len(), 2);
        assert_eq!(get.key["orderId"], AttributeValue::number(9));
    }

    #[tokio::test]
    async fn test_should_find_index_entity_through_query() {
        let (mapper, _) = memory_mapper(None);
        let mut order = Order {
            customer_id: "c1".to_owned(),
            order_id: 3,
            status: "open".to_owned(),
            placed_at: 1_003,
        };
        mapper.save(&mut order).await.unwrap();

        let view: OrderByStatus = mapper.find("open", Some(Value::Int(1_003))).await.unwrap();
        assert_eq!(view.order_id, 3);
        assert_eq!(view.customer_id, "c1");

        let err = mapper
            .find::<OrderByStatus>("open", Some(Value::Int(9_999)))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_should_delete_by_instance_and_by_key() {
        let (mapper, store) = memory_mapper(None);
        let mut first = Order {
            customer_id: "c1".to_owned(),
            order_id: 1,
            ..Order::default()
        };
        let mut second = Order {
            order_id: 2,
            ..first.clone()
        };
        mapper.save(&mut first).await.unwrap();
        mapper.save(&mut second).await.unwrap();
        assert_eq!(store.item_count("orders"), Some(2));

        mapper.delete(&first).await.unwrap();
        assert!(mapper.find::<Order>("c1", Some(Value::Int(1))).await.unwrap_err().is_not_found());

        let err = mapper.delete_by_key::<Order>("c1", None).await.unwrap_err();
        assert!(matches!(err, OrmError::MissingSortKey { field: "orderId" }));

        mapper.delete_by_key::<Order>("c1", Some(Value::Int(2))).await.unwrap();
        assert_eq!(store.item_count("orders"), Some(0));

        // Absent items delete cleanly.
        mapper.delete_by_key::<Order>("c1", Some(Value::Int(2))).await.unwrap();
    }

    #[tokio::test]
    async fn test_should_pass_store_errors_through() {
        let mapper = Mapper::new(Arc::new(MemoryStore::new()));
        let err = mapper.save(&mut alice()).await.unwrap_err();
        let OrmError::Store(store_err) = err else {
            panic!("expected a store error, got {err:?}");
        };
        assert_eq!(store_err.code, StoreErrorCode::ResourceNotFoundException);
    }

    #[tokio::test]
    async fn test_should_share_store_between_clones() {
        let (mapper, store) = memory_mapper(None);
        let other = mapper.clone();
        other.save(&mut alice()).await.unwrap();
        assert!(mapper.find::<User>("u1", None).await.is_ok());
        assert_eq!(store.request_count(), 2);
        assert_eq!(mapper.config(), &MapperConfig::default());
    }

    #[tokio::test]
    async fn test_should_treat_unset_numeric_sort_key_as_missing() {
        let (mapper, store) = memory_mapper(None);
        let mut order = Order {
            customer_id: "c1".to_owned(),
            ..Order::default()
        };

        let err = mapper.save(&mut order).await.unwrap_err();
        assert!(matches!(err, OrmError::MissingSortKey { field: "orderId" }));
        let err = mapper.delete(&order).await.unwrap_err();
        assert!(matches!(err, OrmError::MissingSortKey { field: "orderId" }));
        let err = mapper
            .delete_by_key::<Order>("c1", Some(Value::Int(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, OrmError::MissingSortKey { .. }));
        let err = mapper.find::<Order>("c1", Some(Value::Int(0))).await.unwrap_err();
        assert!(matches!(err, OrmError::SortKeyRequired { field: "orderId" }));

        assert_eq!(store.item_count("orders"), Some(0));
        assert_eq!(store.request_count(), 0);
    }

    #[tokio::test]
    async fn test_should_find_or_default_with_strip_flag() {
        let (mapper, _) = memory_mapper(None);
        let mut user = alice();
        mapper.save(&mut user).await.unwrap();

        let found = mapper
            .find_or_default_with::<User>("u1", None, None, false)
            .await
            .unwrap();
        assert_eq!(found, Some(user));

        let fallback = User {
            name: "guest".to_owned(),
            ..User::default()
        };
        let got = mapper
            .find_or_default_with::<User>("ghost", None, Some(fallback.clone()), false)
            .await
            .unwrap();
        assert_eq!(got, Some(fallback));
    }
}
