//! Cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::KeyNamespace;

/// Default routing/namespace prefix
pub const DEFAULT_KEY_PREFIX: &str = "my-app-cache:";

/// Default name of the shared tag index hash
pub const DEFAULT_SHARED_TAGS_KEY: &str = "_sharedTags_";

/// Default per-command deadline in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default number of fields requested per `HSCAN` page
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 100;

/// Marker the rendering layer puts in front of path-derived tags
pub const DEFAULT_IMPLICIT_TAG_PREFIX: &str = "_N_T_";

/// Options recognised by [`TagCache`](crate::TagCache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Namespace prefix; also the cluster routing tag
    pub key_prefix: String,
    /// Name of the tag index hash
    #[serde(alias = "sharedTagsIndexName")]
    pub shared_tags_key: String,
    /// Deadline applied to every store command
    pub timeout_ms: u64,
    /// Fields per tag index scan page
    pub scan_page_size: usize,
    /// Tags starting with this prefix are implicit
    pub implicit_tag_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            shared_tags_key: DEFAULT_SHARED_TAGS_KEY.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            implicit_tag_prefix: DEFAULT_IMPLICIT_TAG_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Parse a JSON document, filling unspecified options with defaults
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::Config("keyPrefix must not be empty".to_string()));
        }
        if self.key_prefix.contains(['{', '}']) {
            return Err(Error::Config(
                "keyPrefix must not contain '{' or '}'".to_string(),
            ));
        }
        if self.shared_tags_key.is_empty() {
            return Err(Error::Config("sharedTagsKey must not be empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeoutMs must be positive".to_string()));
        }
        if self.scan_page_size == 0 {
            return Err(Error::Config("scanPageSize must be positive".to_string()));
        }
        // An empty prefix would make every tag implicit
        if self.implicit_tag_prefix.is_empty() {
            return Err(Error::Config(
                "implicitTagPrefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-command deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Key derivation for this configuration
    pub fn namespace(&self) -> KeyNamespace {
        KeyNamespace::new(&self.key_prefix, &self.shared_tags_key)
    }

    /// Whether `tag` is supplied by readers rather than stored with entries
    pub fn is_implicit_tag(&self, tag: &str) -> bool {
        tag.starts_with(&self.implicit_tag_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.scan_page_size, 100);
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            CacheConfig::from_json(r#"{"keyPrefix":"site:","timeoutMs":250}"#).unwrap();
        assert_eq!(config.key_prefix, "site:");
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.shared_tags_key, DEFAULT_SHARED_TAGS_KEY);
    }

    #[test]
    fn test_shared_tags_index_name_alias() {
        let config = CacheConfig::from_json(r#"{"sharedTagsIndexName":"idx"}"#).unwrap();
        assert_eq!(config.shared_tags_key, "idx");
    }

    #[test]
    fn test_validate_rejects() {
        let bad = [
            CacheConfig {
                key_prefix: String::new(),
                ..Default::default()
            },
            CacheConfig {
                key_prefix: "a{b}".to_string(),
                ..Default::default()
            },
            CacheConfig {
                timeout_ms: 0,
                ..Default::default()
            },
            CacheConfig {
                scan_page_size: 0,
                ..Default::default()
            },
            CacheConfig {
                implicit_tag_prefix: String::new(),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_implicit_tags() {
        let config = CacheConfig::default();
        assert!(config.is_implicit_tag("_N_T_/timezone/UTC"));
        assert!(!config.is_implicit_tag("time-data"));

        let err = CacheConfig::from_json(r#"{"implicitTagPrefix":""}"#).unwrap_err();
        assert!(err.to_string().contains("implicitTagPrefix"));
    }
}
