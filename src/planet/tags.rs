//! Deduplicated storage for `(key, value)` tag pairs.
//!
//! Elements store `TagIndex` values instead of strings. The cache is append-only:
//! an index, once handed out, always refers to the same pair.

use std::collections::HashMap;

pub type TagIndex = u32;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TagCache {
    values: Vec<Tag>,
    index: HashMap<String, HashMap<String, TagIndex>>,
}

impl TagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(&mut self, tag: Tag) -> TagIndex {
        let values = &mut self.values;
        let by_value = self.index.entry(tag.key.clone()).or_default();
        if let Some(existing) = by_value.get(&tag.value) {
            return *existing;
        }
        let position = values.len() as TagIndex;
        by_value.insert(tag.value.clone(), position);
        values.push(tag);
        position
    }

    pub fn add_tags(&mut self, tags: Vec<Tag>) -> Vec<TagIndex> {
        tags.into_iter().map(|tag| self.add_tag(tag)).collect()
    }

    /// Every tag in index order.
    pub fn into_tags(self) -> Vec<Tag> {
        self.values
    }

    pub fn get(&self, index: TagIndex) -> Option<&Tag> {
        self.values.get(index as usize)
    }

    /// Tags behind `indices`, in order. Invalid indices are skipped.
    pub fn resolve<'a>(&'a self, indices: &'a [TagIndex]) -> impl Iterator<Item = &'a Tag> + 'a {
        indices.iter().filter_map(|index| self.get(*index))
    }

    pub fn map(&self, indices: &[TagIndex]) -> HashMap<String, String> {
        self.resolve(indices)
            .map(|tag| (tag.key.clone(), tag.value.clone()))
            .collect()
    }

    pub fn has_key(&self, indices: &[TagIndex], key: &str) -> bool {
        self.resolve(indices).any(|tag| tag.key == key)
    }

    /// Number of distinct `(key, value)` pairs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_pairs_share_an_index() {
        let mut cache = TagCache::new();
        let a = cache.add_tag(Tag::new("amenity", "cafe"));
        let b = cache.add_tag(Tag::new("amenity", "bar"));
        let c = cache.add_tag(Tag::new("amenity", "cafe"));
        let d = cache.add_tag(Tag::new("name", "cafe"));

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_ne!(a, d);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.key_count(), 2);
    }

    #[test]
    fn index_count_matches_distinct_pairs() {
        let pairs = [
            ("highway", "primary"),
            ("lanes", "2"),
            ("highway", "primary"),
            ("highway", "secondary"),
            ("lanes", "2"),
            ("oneway", "yes"),
        ];
        let mut cache = TagCache::new();
        let mut seen: HashMap<(&str, &str), TagIndex> = HashMap::new();
        for (k, v) in pairs {
            let index = cache.add_tag(Tag::new(k, v));
            let first = *seen.entry((k, v)).or_insert(index);
            assert_eq!(first, index);
        }
        assert_eq!(cache.len(), seen.len());
    }

    #[test]
    fn indices_are_stable_after_growth() {
        let mut cache = TagCache::new();
        let first = cache.add_tags(vec![Tag::new("a", "1"), Tag::new("b", "2")]);
        for i in 0..100 {
            cache.add_tag(Tag::new("n", i.to_string()));
        }
        assert_eq!(cache.get(first[0]), Some(&Tag::new("a", "1")));
        assert_eq!(cache.get(first[1]), Some(&Tag::new("b", "2")));
    }

    #[test]
    fn map_materializes_tags() {
        let mut cache = TagCache::new();
        let indices = cache.add_tags(vec![Tag::new("name", "District Taco"), Tag::new("amenity", "restaurant")]);
        let map = cache.map(&indices);
        assert_eq!(map.get("name").map(String::as_str), Some("District Taco"));
        assert_eq!(map.len(), 2);
        assert!(cache.has_key(&indices, "amenity"));
        assert!(!cache.has_key(&indices, "shop"));
    }
}
