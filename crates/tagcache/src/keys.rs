//! Key derivation for one logical cache
//!
//! Every key is built from `{prefix}`. Redis Cluster hashes only the text
//! between the first `{` and `}` when choosing a slot, so the entries, the tag
//! index and the revalidation hash all land on the same shard.

const REVALIDATED_TAGS_SUFFIX: &str = "__revalidated_tags__";

/// Storage keys of one cache instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    routing_prefix: String,
    tags_index_key: String,
    revalidated_tags_key: String,
}

impl KeyNamespace {
    /// Derive the namespace for `key_prefix`, using `shared_tags_key` as the tag index name
    pub fn new(key_prefix: &str, shared_tags_key: &str) -> Self {
        let routing_prefix = format!("{{{}}}", key_prefix);
        let tags_index_key = format!("{}{}", routing_prefix, shared_tags_key);
        let revalidated_tags_key = format!("{}{}", routing_prefix, REVALIDATED_TAGS_SUFFIX);

        Self {
            routing_prefix,
            tags_index_key,
            revalidated_tags_key,
        }
    }

    /// The hash-tagged prefix shared by every key
    pub fn routing_prefix(&self) -> &str {
        &self.routing_prefix
    }

    /// Storage key of the entry cached under `key`
    pub fn entry_key(&self, key: &str) -> String {
        format!("{}{}", self.routing_prefix, key)
    }

    /// Storage keys for a batch of caller keys
    pub fn entry_keys<'a, I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter().map(|k| self.entry_key(k)).collect()
    }

    /// Hash holding `caller key -> declared tags`
    pub fn tags_index_key(&self) -> &str {
        &self.tags_index_key
    }

    /// Hash holding `implicit tag -> last revalidation ms`
    pub fn revalidated_tags_key(&self) -> &str {
        &self.revalidated_tags_key
    }
}

/// The slot-hashing portion of a Redis key: the `{...}` section if present
/// and non-empty, otherwise the whole key
pub fn hash_slot_tag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(len) = key[open + 1..].find('}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_keys() {
        let ns = KeyNamespace::new("my-app-cache:", "_sharedTags_");

        assert_eq!(ns.routing_prefix(), "{my-app-cache:}");
        assert_eq!(ns.entry_key("/home"), "{my-app-cache:}/home");
        assert_eq!(ns.tags_index_key(), "{my-app-cache:}_sharedTags_");
        assert_eq!(
            ns.revalidated_tags_key(),
            "{my-app-cache:}__revalidated_tags__"
        );
    }

    #[test]
    fn test_all_keys_share_one_slot() {
        let ns = KeyNamespace::new("app:", "_tags_");
        let keys = [
            ns.entry_key("a"),
            ns.entry_key("{other}b"),
            ns.tags_index_key().to_string(),
            ns.revalidated_tags_key().to_string(),
        ];

        for key in &keys {
            assert_eq!(hash_slot_tag(key), "app:");
        }
    }

    #[test]
    fn test_hash_slot_tag_edge_cases() {
        assert_eq!(hash_slot_tag("plain"), "plain");
        assert_eq!(hash_slot_tag("{}empty"), "{}empty");
        assert_eq!(hash_slot_tag("open{only"), "open{only");
    }

    #[test]
    fn test_entry_keys_batch() {
        let ns = KeyNamespace::new("p", "t");
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(ns.entry_keys(&keys), vec!["{p}a", "{p}b"]);
    }
}
