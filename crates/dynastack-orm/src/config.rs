//! Mapper configuration.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Mapper behaviour settings.
///
/// # Examples
///
/// ```
/// use dynastack_orm::MapperConfig;
///
/// let config = MapperConfig::builder().max_pages(Some(10)).build();
/// assert_eq!(config.max_pages, Some(10));
/// assert_eq!(MapperConfig::default().max_pages, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct MapperConfig {
    /// Most pages `all()` fetches before failing with `PageLimitExceeded`.
    /// `None` follows the cursor until the query is exhausted.
    #[builder(default)]
    pub max_pages: Option<usize>,
}

impl MapperConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DYNASTACK_MAX_PAGES` | unset (unbounded) |
    ///
    /// Zero or unparsable values leave the cap unset.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("DYNASTACK_MAX_PAGES") {
            config.max_pages = parse_max_pages(&v);
        }
        config
    }
}

fn parse_max_pages(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
