//! Bidirectional tag index.
//!
//! Tracks which cache keys carry which invalidation tags so a tag flush can find
//! every affected entry, and so evicted entries can be removed from the index.

use std::collections::{BTreeSet, HashMap, HashSet};

/// Tag for a single content record, e.g. `tt_content_9`.
pub fn record_tag(table: &str, uid: u64) -> String {
    format!("{table}_{uid}")
}

/// Tracks tag → keys and key → tags mappings.
///
/// Not synchronized on its own; the owning store guards it together with the
/// entries it describes.
#[derive(Debug, Default)]
pub struct TagIndex {
    tag_to_keys: HashMap<String, HashSet<String>>,
    key_to_tags: HashMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key with its tags, replacing any previous registration.
    pub fn register(&mut self, key: &str, tags: &BTreeSet<String>) {
        self.unregister(key);
        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.key_to_tags.insert(key.to_string(), tags.clone());
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        self.tag_to_keys.get(tag).cloned().unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &str) -> BTreeSet<String> {
        self.key_to_tags.get(key).cloned().unwrap_or_default()
    }

    /// Remove a key and clean up tag mappings.
    pub fn unregister(&mut self, key: &str) {
        let Some(tags) = self.key_to_tags.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(&tag);
                }
            }
        }
    }

    /// Remove every key carrying any of `tags`.
    ///
    /// Returns the affected keys.
    pub fn take_tagged<'a, I>(&mut self, tags: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut affected = HashSet::new();
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get(tag.as_str()) {
                affected.extend(keys.iter().cloned());
            }
        }
        for key in &affected {
            self.unregister(key);
        }
        affected
    }

    pub fn clear(&mut self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }

    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn register_and_lookup() {
        let mut index = TagIndex::new();
        index.register("k1", &tags(&["pages_5", "tt_content_9"]));

        assert!(index.keys_for_tag("pages_5").contains("k1"));
        assert_eq!(index.tags_for_key("k1"), tags(&["pages_5", "tt_content_9"]));
    }

    #[test]
    fn re_register_replaces_previous_tags() {
        let mut index = TagIndex::new();
        index.register("k1", &tags(&["pages_5"]));
        index.register("k1", &tags(&["pages_6"]));

        assert!(index.keys_for_tag("pages_5").is_empty());
        assert_eq!(index.tag_count(), 1);
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn unregister_cleans_up_mappings() {
        let mut index = TagIndex::new();
        index.register("k1", &tags(&["pages_5"]));
        index.unregister("k1");

        assert_eq!(index.key_count(), 0);
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn take_tagged_returns_all_affected_keys() {
        let mut index = TagIndex::new();
        index.register("k1", &tags(&["pages_5"]));
        index.register("k2", &tags(&["pages_5", "tt_content_9"]));
        index.register("k3", &tags(&["tt_content_1"]));

        let affected = index.take_tagged(&tags(&["pages_5"]));
        assert_eq!(affected.len(), 2);
        assert!(affected.contains("k1") && affected.contains("k2"));
        assert!(index.keys_for_tag("tt_content_9").is_empty());
        assert_eq!(index.key_count(), 1);
    }

    #[test]
    fn record_tag_uses_table_and_uid() {
        assert_eq!(record_tag("tt_content", 9), "tt_content_9");
    }
}
