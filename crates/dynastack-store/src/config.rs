//! Store connection configuration.
//!
//! Provides [`StoreConfig`], used to build an [`SdkStore`](crate::SdkStore)
//! against a remote endpoint or a [`MemoryStore`](crate::MemoryStore) for
//! local use. Values are loaded from environment variables.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Store connection configuration.
///
/// # Examples
///
/// ```
/// use dynastack_store::StoreConfig;
///
/// let config = StoreConfig::builder()
///     .endpoint_url(Some("http://localhost:4566".to_owned()))
///     .build();
/// assert_eq!(config.region, "us-east-1");
/// assert!(!config.consistent_read);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Endpoint override (e.g. `"http://localhost:4566"`). `None` uses the
    /// regional default endpoint.
    #[builder(default)]
    pub endpoint_url: Option<String>,

    /// Region the client signs requests for.
    #[builder(default = String::from("us-east-1"))]
    pub region: String,

    /// Whether single-item reads ask for strong consistency.
    #[builder(default = false)]
    pub consistent_read: bool,

    /// Upper bound on items a [`MemoryStore`](crate::MemoryStore) returns per
    /// query page, standing in for the remote response size cap. `None` means
    /// no cap beyond the request's `Limit`.
    #[builder(default)]
    pub memory_page_size: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: String::from("us-east-1"),
            consistent_read: false,
            memory_page_size: None,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DYNASTACK_ENDPOINT_URL` | unset |
    /// | `AWS_REGION`, then `DEFAULT_REGION` | `us-east-1` |
    /// | `DYNASTACK_CONSISTENT_READ` | `false` |
    /// | `DYNASTACK_MEMORY_PAGE_SIZE` | unset |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DYNASTACK_ENDPOINT_URL") {
            if !v.is_empty() {
                config.endpoint_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("AWS_REGION").or_else(|_| std::env::var("DEFAULT_REGION")) {
            config.region = v;
        }
        if let Ok(v) = std::env::var("DYNASTACK_CONSISTENT_READ") {
            config.consistent_read = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("DYNASTACK_MEMORY_PAGE_SIZE") {
            config.memory_page_size = v.parse::<usize>().ok().filter(|n| *n > 0);
        }

        config
    }
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_default_to_us_east_1_without_endpoint() {
        let config = StoreConfig::default();
        assert_eq!(config.region, "us-east-1");
        assert!(config.endpoint_url.is_none());
        assert!(config.memory_page_size.is_none());
    }

    #[test]
    fn test_should_build_with_overrides() {
        let config = StoreConfig::builder()
            .region("eu-west-1".to_owned())
            .memory_page_size(Some(2))
            .consistent_read(true)
            .build();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.memory_page_size, Some(2));
        assert!(config.consistent_read);
    }

    #[test]
    fn test_should_parse_bool_values() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn test_should_serialize_camel_case() {
        let json = serde_json::to_value(StoreConfig::default()).unwrap();
        assert!(json.get("memoryPageSize").is_some());
        assert!(json.get("consistentRead").is_some());
    }
}
