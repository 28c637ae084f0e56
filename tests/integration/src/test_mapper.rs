//! Mapper integration tests against a running DynamoDB-compatible server.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use aws_sdk_dynamodb::types::ScalarAttributeType;
    use dynastack_orm::{Entity, MapperConfig, OrmError, PageKey, SortOrder, UNSET_TIMESTAMP, Value};
    use futures::TryStreamExt;

    use crate::{IndexDef, TableDef, dynamodb_client, ensure_table, mapper, unique_key};

    #[derive(Debug, Clone, PartialEq)]
    struct Profile {
        handle: String,
        display_name: String,
        followers: i64,
        labels: BTreeSet<String>,
        created_at: i64,
        updated_at: i64,
    }

    impl Default for Profile {
        fn default() -> Self {
            Self {
                handle: String::new(),
                display_name: String::new(),
                followers: 0,
                labels: BTreeSet::new(),
                created_at: UNSET_TIMESTAMP,
                updated_at: UNSET_TIMESTAMP,
            }
        }
    }

    dynastack_orm::entity! {
        Profile {
            table: "dynastack-it-profiles",
            index: "",
            partition_key: "handle",
            sort_key: None,
            fields: {
                handle: "handle",
                display_name: "displayName",
                followers: "followers",
                labels: "labels" as Set,
                created_at: "createdAt",
                updated_at: "updatedAt",
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Event {
        stream: String,
        seq: i64,
        kind: String,
    }

    dynastack_orm::entity! {
        Event {
            table: "dynastack-it-events",
            index: "",
            partition_key: "stream",
            sort_key: Some("seq"),
            fields: {
                stream: "stream",
                seq: "seq",
                kind: "kind",
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct EventByKind {
        stream: String,
        seq: i64,
        kind: String,
    }

    dynastack_orm::entity! {
        EventByKind {
            table: "dynastack-it-events",
            index: "by-kind",
            partition_key: "kind",
            sort_key: Some("seq"),
            fields: {
                stream: "stream",
                seq: "seq",
                kind: "kind",
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Ghost {
        id: String,
    }

    dynastack_orm::entity! {
        Ghost {
            table: "dynastack-it-missing",
            index: "",
            partition_key: "id",
            sort_key: None,
            fields: {
                id: "id",
            }
        }
    }

    async fn setup() -> anyhow::Result<()> {
        let client = dynamodb_client();
        ensure_table(
            &client,
            &TableDef {
                name: "dynastack-it-profiles",
                partition_key: ("handle", ScalarAttributeType::S),
                sort_key: None,
                indexes: Vec::new(),
            },
        )
        .await?;
        ensure_table(
            &client,
            &TableDef {
                name: "dynastack-it-events",
                partition_key: ("stream", ScalarAttributeType::S),
                sort_key: Some(("seq", ScalarAttributeType::N)),
                indexes: vec![IndexDef {
                    name: "by-kind",
                    partition_key: ("kind", ScalarAttributeType::S),
                    sort_key: Some(("seq", ScalarAttributeType::N)),
                }],
            },
        )
        .await?;
        Ok(())
    }

    async fn seed_events(mapper: &dynastack_orm::Mapper, stream: &str, count: i64) -> anyhow::Result<()> {
        for seq in 1..=count {
            let mut event = Event {
                stream: stream.to_owned(),
                seq,
                kind: format!("{stream}-{}", if seq % 2 == 0 { "even" } else { "odd" }),
            };
            mapper.save(&mut event).await?;
        }
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_round_trip_entity() -> anyhow::Result<()> {
        setup().await?;
        let mapper = mapper(MapperConfig::default());
        let handle = unique_key("profile");

        let mut profile = Profile {
            handle: handle.clone(),
            display_name: "Ada".to_owned(),
            followers: 0,
            labels: ["early".to_owned()].into_iter().collect(),
            ..Profile::default()
        };
        mapper.save(&mut profile).await?;
        assert!(profile.created_at > 0);

        let found: Profile = mapper.find(handle.as_str(), None).await?;
        assert_eq!(found, profile);

        mapper.delete(&found).await?;
        let gone = mapper.find_or_default::<Profile>(handle.as_str(), None, None).await?;
        assert!(gone.is_none());
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_query_ranges_and_pages() -> anyhow::Result<()> {
        setup().await?;
        let mapper = mapper(MapperConfig::default());
        let stream = unique_key("stream");
        seed_events(&mapper, &stream, 7).await?;

        let all = mapper.query::<Event>().partition_key_equals(stream.as_str()).all(true).await?;
        assert_eq!(all.iter().map(|e| e.seq).collect::<Vec<_>>(), (1..=7).collect::<Vec<_>>());

        let between = mapper
            .query::<Event>()
            .partition_key_equals(stream.as_str())
            .sort_key_between(2, 4)
            .sort(SortOrder::Desc)
            .all(true)
            .await?;
        assert_eq!(between.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 3, 2]);

        let pages: Vec<_> = mapper
            .query::<Event>()
            .partition_key_equals(stream.as_str())
            .limit(3)
            .pages(true)
            .try_collect()
            .await?;
        let sizes: Vec<_> = pages.iter().map(|p| p.items.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 7);
        assert!(sizes.iter().all(|n| *n <= 3));

        let first = mapper
            .query::<Event>()
            .partition_key_equals(stream.as_str())
            .limit(3)
            .query(true)
            .await?;
        let token = first.page_key.expect("more pages").to_token()?;
        let next = mapper
            .query::<Event>()
            .partition_key_equals(stream.as_str())
            .skip(Some(PageKey::from_token(&token)?))
            .query(true)
            .await?;
        assert_eq!(next.items.first().map(|e| e.seq), Some(4));

        for seq in 1..=7 {
            mapper.delete_by_key::<Event>(stream.as_str(), Some(Value::Int(seq))).await?;
        }
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_read_through_index() -> anyhow::Result<()> {
        setup().await?;
        let mapper = mapper(MapperConfig::default());
        let stream = unique_key("indexed");
        seed_events(&mapper, &stream, 4).await?;

        let odd = mapper
            .query::<EventByKind>()
            .partition_key_equals(format!("{stream}-odd"))
            .all(true)
            .await?;
        assert_eq!(odd.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 3]);

        let mut view = EventByKind::query_builder(&mapper)
            .partition_key_equals(format!("{stream}-even"))
            .first(true)
            .await?;
        assert_eq!(view.seq, 2);
        assert!(matches!(
            mapper.save(&mut view).await,
            Err(OrmError::ReadOnlyIndexEntity { index: "by-kind" })
        ));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_pass_store_errors_through() {
        let mapper = mapper(MapperConfig::default());
        let err = mapper.find::<Ghost>("nobody", None).await.unwrap_err();
        assert!(matches!(err, OrmError::Store(_)), "unexpected error: {err:?}");
    }
}
