use std::collections::BTreeSet;

/// Which tag keys a resource carries. A non-empty keep list wins over the drop list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagProjection {
    pub keep: BTreeSet<String>,
    pub drop: BTreeSet<String>,
}

impl TagProjection {
    pub fn new<K, D>(keep: K, drop: D) -> Self
    where
        K: IntoIterator<Item = String>,
        D: IntoIterator<Item = String>,
    {
        Self {
            keep: keep.into_iter().collect(),
            drop: drop.into_iter().collect(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.keep.is_empty() && self.drop.is_empty()
    }

    pub fn allows(&self, key: &str) -> bool {
        if !self.keep.is_empty() {
            return self.keep.contains(key);
        }
        !self.drop.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn keep_list_takes_precedence() {
        let projection = TagProjection::new(keys(&["name"]), keys(&["name", "source"]));
        assert!(projection.allows("name"));
        assert!(!projection.allows("source"));
        assert!(!projection.allows("amenity"));
    }

    #[test]
    fn drop_list_alone() {
        let projection = TagProjection::new(Vec::new(), keys(&["source"]));
        assert!(projection.allows("name"));
        assert!(!projection.allows("source"));
        assert!(TagProjection::default().is_identity());
    }
}
