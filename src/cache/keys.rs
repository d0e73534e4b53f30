//! Key namespacing
//!
//! Data keys are caller-constructed (`<domain-prefix>:<identifier>`).
//! Metadata and tag records live under reserved prefixes so that anything
//! inspecting the store directly can tell them apart.

use crate::cache::types::CacheKey;

/// Prefix of metadata records (`metadata:<key>`)
pub const METADATA_PREFIX: &str = "metadata:";

/// Prefix of tag key-sets (`tags:<tag>`)
pub const TAG_PREFIX: &str = "tags:";

/// Store key of the metadata record for `key`
pub fn metadata_key(key: &str) -> String {
    format!("{}{}", METADATA_PREFIX, key)
}

/// Store key of the key-set for `tag`
pub fn tag_key(tag: &str) -> String {
    format!("{}{}", TAG_PREFIX, tag)
}

/// Recover the data key from a metadata record key
pub fn data_key_from_metadata(store_key: &str) -> Option<&str> {
    store_key.strip_prefix(METADATA_PREFIX)
}

/// Recover the tag name from a tag record key
pub fn tag_from_store_key(store_key: &str) -> Option<&str> {
    store_key.strip_prefix(TAG_PREFIX)
}

/// Whether `key` falls in one of the reserved namespaces
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(METADATA_PREFIX) || key.starts_with(TAG_PREFIX)
}

/// Builder for `prefix:identifier[?k=v&...]` cache keys
pub struct CacheKeyBuilder {
    prefix: String,
    identifier: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder for a domain prefix (e.g. `"project"`)
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            identifier: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}:{}", self.prefix, self.identifier);

        if !self.params.is_empty() {
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&params_str.join("&"));
        }

        key
    }
}
