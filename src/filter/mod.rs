//! Element filters: key allow/deny lists, a bounding box and an optional memoized
//! expression.
//!
//! A `Filter` is immutable once compiled and can be shared across threads. The memo
//! table lives in a separate `FilterCache` created per pass.

mod projection;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::dfl;
use crate::error::FilterError;
use crate::expr::{CelContext, CelProgram, compile_cel, evaluate_cel_predicate};
use crate::planet::{Bounds, Element, Node, Planet, Relation, Way};

pub use projection::TagProjection;

/// Synthetic attributes derived from element metadata.
pub const META_ATTRIBUTES: [&str; 4] = ["timestamp", "version", "uid", "user"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Dfl,
    Cel,
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Dfl(dfl::Expression),
    Cel(CelProgram),
}

impl Predicate {
    pub fn compile(source: &str, language: Language) -> Result<Self, FilterError> {
        match language {
            Language::Dfl => dfl::Expression::compile(source)
                .map(Predicate::Dfl)
                .map_err(|e| FilterError::Compile {
                    source_text: source.to_string(),
                    message: e.to_string(),
                }),
            Language::Cel => compile_cel(source).map(Predicate::Cel),
        }
    }
}

/// Memo table for one filter over one pass.
#[derive(Debug, Default)]
pub struct FilterCache {
    results: HashMap<String, bool>,
    hits: u64,
}

impl FilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    keys_keep: Vec<String>,
    keys_drop: Vec<String>,
    bbox: Option<Bounds>,
    predicate: Option<Predicate>,
    use_cache: bool,
}

impl Filter {
    /// A filter that keeps everything.
    pub fn keep_all() -> Self {
        Self::default()
    }

    pub fn compile(
        keys_keep: Vec<String>,
        keys_drop: Vec<String>,
        expression: Option<&str>,
        language: Language,
        use_cache: bool,
        bbox: Option<&[f64]>,
    ) -> Result<Self, FilterError> {
        let bbox = match bbox {
            None => None,
            Some([min_lon, min_lat, max_lon, max_lat]) => {
                Some(Bounds::new(*min_lon, *min_lat, *max_lon, *max_lat))
            }
            Some(values) => return Err(FilterError::BoundingBox(values.len())),
        };

        let predicate = expression
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| Predicate::compile(text, language))
            .transpose()?;

        Ok(Self {
            keys_keep,
            keys_drop,
            bbox,
            predicate,
            use_cache,
        })
    }

    pub fn keys_keep(&self) -> &[String] {
        &self.keys_keep
    }

    pub fn keys_drop(&self) -> &[String] {
        &self.keys_drop
    }

    pub fn bbox(&self) -> Option<&Bounds> {
        self.bbox.as_ref()
    }

    pub fn has_expression(&self) -> bool {
        self.predicate.is_some()
    }

    /// True when no check is configured, so every node passes.
    pub fn keeps_every_node(&self) -> bool {
        self.keys_keep.is_empty()
            && self.keys_drop.is_empty()
            && self.bbox.is_none()
            && self.predicate.is_none()
    }

    /// Whether evaluating this filter reads the synthetic `attribute`
    /// (`timestamp`, `version`, `uid` or `user`).
    pub fn reads_attribute(&self, attribute: &str) -> bool {
        match &self.predicate {
            None => false,
            Some(Predicate::Dfl(expression)) => {
                expression.attributes().iter().any(|a| a == attribute)
            }
            Some(Predicate::Cel(program)) => program.reads_meta(),
        }
    }

    /// Tag keys this filter inspects, or `None` when the set cannot be known
    /// statically (a CEL program over `tags`).
    pub fn referenced_keys(&self) -> Option<BTreeSet<String>> {
        let mut keys: BTreeSet<String> = self
            .keys_keep
            .iter()
            .chain(self.keys_drop.iter())
            .cloned()
            .collect();
        match &self.predicate {
            None => {}
            Some(Predicate::Dfl(expression)) => {
                keys.extend(expression.attributes().iter().cloned());
            }
            Some(Predicate::Cel(program)) => {
                if program.reads_tags() {
                    return None;
                }
            }
        }
        Some(keys)
    }

    pub fn keep_node(&self, planet: &Planet, node: &Node, cache: &mut FilterCache) -> Result<bool, FilterError> {
        if !self.passes_keys(planet, node) {
            return Ok(false);
        }
        if let Some(bbox) = &self.bbox
            && !bbox.contains(node.lon, node.lat)
        {
            return Ok(false);
        }
        self.passes_predicate(planet, node, cache)
    }

    pub fn keep_way(&self, planet: &Planet, way: &Way, cache: &mut FilterCache) -> Result<bool, FilterError> {
        if !self.passes_keys(planet, way) {
            return Ok(false);
        }
        self.passes_predicate(planet, way, cache)
    }

    pub fn keep_relation(
        &self,
        planet: &Planet,
        relation: &Relation,
        cache: &mut FilterCache,
    ) -> Result<bool, FilterError> {
        if !self.passes_keys(planet, relation) {
            return Ok(false);
        }
        self.passes_predicate(planet, relation, cache)
    }

    fn passes_keys(&self, planet: &Planet, element: &impl Element) -> bool {
        let tags = planet.tags();
        if !self.keys_keep.is_empty()
            && !self.keys_keep.iter().any(|key| tags.has_key(element.tags(), key))
        {
            return false;
        }
        if !self.keys_drop.is_empty()
            && self.keys_drop.iter().any(|key| tags.has_key(element.tags(), key))
        {
            return false;
        }
        true
    }

    fn passes_predicate(
        &self,
        planet: &Planet,
        element: &impl Element,
        cache: &mut FilterCache,
    ) -> Result<bool, FilterError> {
        let Some(predicate) = &self.predicate else {
            return Ok(true);
        };

        match predicate {
            Predicate::Dfl(expression) => {
                let mut attributes = planet.tags().map(element.tags());
                attributes.extend(meta_attributes(planet, element));

                let key = self
                    .use_cache
                    .then(|| cache_key(expression.attributes(), &attributes));
                if let Some(key) = &key
                    && let Some(hit) = cache.results.get(key)
                {
                    cache.hits += 1;
                    return Ok(*hit);
                }

                let result = match expression.evaluate(&attributes)? {
                    dfl::Value::Bool(b) => b,
                    other => return Err(FilterError::NotBoolean(other.to_string())),
                };
                if let Some(key) = key {
                    cache.results.insert(key, result);
                }
                Ok(result)
            }
            Predicate::Cel(program) => {
                let tags = planet.tags().map(element.tags());
                let meta: HashMap<String, String> = meta_attributes(planet, element).collect();

                let key = if self.use_cache {
                    Some(cel_cache_key(program, &tags, &meta)?)
                } else {
                    None
                };
                if let Some(key) = &key
                    && let Some(hit) = cache.results.get(key)
                {
                    cache.hits += 1;
                    return Ok(*hit);
                }

                let ctx = CelContext {
                    tags: &tags,
                    meta: &meta,
                };
                let result = evaluate_cel_predicate(program, &ctx)?;
                if let Some(key) = key {
                    cache.results.insert(key, result);
                }
                Ok(result)
            }
        }
    }
}

/// `timestamp`, `version`, `uid` and `user`, each present only when set.
fn meta_attributes<'a>(
    planet: &'a Planet,
    element: &'a impl Element,
) -> impl Iterator<Item = (String, String)> + 'a {
    let meta = element.meta();
    let user = (meta.uid != 0)
        .then(|| planet.user_name(meta.uid))
        .flatten()
        .map(|name| ("user".to_string(), name.to_string()));

    meta.timestamp_string()
        .map(|ts| ("timestamp".to_string(), ts))
        .into_iter()
        .chain((meta.version != 0).then(|| ("version".to_string(), meta.version.to_string())))
        .chain((meta.uid != 0).then(|| ("uid".to_string(), meta.uid.to_string())))
        .chain(user)
}

/// Encodes the values of `attributes` in order. A present value is written as
/// `<byte length>:<value>` and a missing one as `!`, so every piece is self-delimiting
/// and distinct attribute tuples never share a key.
fn cache_key(attributes: &[String], values: &HashMap<String, String>) -> String {
    let mut key = String::new();
    for name in attributes {
        match values.get(name) {
            Some(value) => {
                key.push_str(&value.len().to_string());
                key.push(':');
                key.push_str(value);
            }
            None => key.push('!'),
        }
    }
    key
}

fn cel_cache_key(
    program: &CelProgram,
    tags: &HashMap<String, String>,
    meta: &HashMap<String, String>,
) -> Result<String, FilterError> {
    let sorted = |map: &HashMap<String, String>| -> BTreeMap<String, String> {
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    };
    let mut parts = Vec::with_capacity(2);
    if program.reads_tags() {
        parts.push(serde_json::to_string(&sorted(tags)).map_err(|e| FilterError::Cel(e.to_string()))?);
    }
    if program.reads_meta() {
        parts.push(serde_json::to_string(&sorted(meta)).map_err(|e| FilterError::Cel(e.to_string()))?);
    }
    Ok(parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ElementMeta, parse_timestamp};
    use crate::planet::Tag;

    fn planet_with_nodes() -> Planet {
        let mut planet = Planet::new();
        let specs: [(u64, f64, f64, &[(&str, &str)]); 5] = [
            (1, 0.5, 0.5, &[("amenity", "cafe")]),
            (2, 1.5, 0.5, &[("amenity", "cafe"), ("name", "")]),
            (3, 0.2, 0.8, &[("amenity", "bar")]),
            (4, 0.3, 0.3, &[("shop", "bakery")]),
            (5, 5.0, 5.0, &[("amenity", "cafe")]),
        ];
        for (id, lon, lat, tags) in specs {
            let indices = planet
                .tags_mut()
                .add_tags(tags.iter().map(|(k, v)| Tag::new(*k, *v)).collect());
            let mut meta = ElementMeta::new(id);
            meta.version = 2;
            planet
                .add_node(Node {
                    meta,
                    tags: indices,
                    lon,
                    lat,
                })
                .unwrap();
        }
        planet
    }

    fn kept(filter: &Filter, planet: &Planet, cache: &mut FilterCache) -> Vec<u64> {
        planet
            .nodes()
            .iter()
            .filter(|node| filter.keep_node(planet, node, cache).unwrap())
            .map(|node| node.meta.id)
            .collect()
    }

    #[test]
    fn keys_then_bbox_then_expression() {
        let planet = planet_with_nodes();
        let filter = Filter::compile(
            vec!["amenity".into()],
            vec!["name".into()],
            Some("@amenity == 'cafe'"),
            Language::Dfl,
            false,
            Some(&[0.0, 0.0, 1.0, 1.0]),
        )
        .unwrap();
        assert_eq!(kept(&filter, &planet, &mut FilterCache::new()), vec![1]);
    }

    #[test]
    fn bbox_edges_are_inclusive() {
        let planet = planet_with_nodes();
        let filter =
            Filter::compile(vec![], vec![], None, Language::Dfl, false, Some(&[0.3, 0.3, 1.5, 0.5])).unwrap();
        assert_eq!(kept(&filter, &planet, &mut FilterCache::new()), vec![1, 2, 4]);
    }

    #[test]
    fn memoized_results_match_uncached() {
        let planet = planet_with_nodes();
        let text = Some("@amenity == 'cafe' and @version == 2");
        let cached = Filter::compile(vec![], vec![], text, Language::Dfl, true, None).unwrap();
        let plain = Filter::compile(vec![], vec![], text, Language::Dfl, false, None).unwrap();

        let mut cache = FilterCache::new();
        let with_cache = kept(&cached, &planet, &mut cache);
        assert_eq!(with_cache, kept(&plain, &planet, &mut FilterCache::new()));
        assert_eq!(with_cache, vec![1, 2, 5]);
        assert!(cache.hits() >= 2);
    }

    #[test]
    fn cache_key_distinguishes_missing_from_empty() {
        let attributes = vec!["name".to_string()];
        let empty: HashMap<String, String> = [("name".to_string(), String::new())].into();
        let missing = HashMap::new();
        assert_ne!(cache_key(&attributes, &empty), cache_key(&attributes, &missing));

        // Separators inside values cannot shift a value into the next attribute.
        let attributes = vec!["a".to_string(), "b".to_string()];
        let shifted: HashMap<String, String> = [("a".to_string(), "1\n=2".to_string())].into();
        let split: HashMap<String, String> =
            [("a".to_string(), "1".to_string()), ("b".to_string(), "2\n!".to_string())].into();
        assert_ne!(cache_key(&attributes, &shifted), cache_key(&attributes, &split));
        let prefixed: HashMap<String, String> = [("a".to_string(), "1:x!".to_string())].into();
        let tail: HashMap<String, String> =
            [("a".to_string(), "1".to_string()), ("b".to_string(), "x".to_string())].into();
        assert_ne!(cache_key(&attributes, &prefixed), cache_key(&attributes, &tail));
    }

    #[test]
    fn memoized_results_match_uncached_for_multiline_values() {
        let mut planet = Planet::new();
        let specs: [(u64, &[(&str, &str)]); 2] = [(1, &[("a", "1\n=2")]), (2, &[("a", "1"), ("b", "2\n!")])];
        for (id, tags) in specs {
            let indices = planet
                .tags_mut()
                .add_tags(tags.iter().map(|(k, v)| Tag::new(*k, *v)).collect());
            planet
                .add_node(Node {
                    meta: ElementMeta::new(id),
                    tags: indices,
                    lon: 0.0,
                    lat: 0.0,
                })
                .unwrap();
        }

        let text = Some("@a == '1' and @b != null");
        let cached = Filter::compile(vec![], vec![], text, Language::Dfl, true, None).unwrap();
        let plain = Filter::compile(vec![], vec![], text, Language::Dfl, false, None).unwrap();
        assert_eq!(kept(&plain, &planet, &mut FilterCache::new()), vec![2]);
        assert_eq!(kept(&cached, &planet, &mut FilterCache::new()), vec![2]);
    }

    #[test]
    fn like_treats_star_literally() {
        let mut planet = Planet::new();
        let indices = planet.tags_mut().add_tags(vec![Tag::new("a", "Abc")]);
        planet
            .add_node(Node {
                meta: ElementMeta::new(1),
                tags: indices,
                lon: 0.0,
                lat: 0.0,
            })
            .unwrap();

        let star = Filter::compile(vec![], vec![], Some("@a like 'A*'"), Language::Dfl, true, None).unwrap();
        assert!(kept(&star, &planet, &mut FilterCache::new()).is_empty());
        let percent = Filter::compile(vec![], vec![], Some("@a like 'A%'"), Language::Dfl, true, None).unwrap();
        assert_eq!(kept(&percent, &planet, &mut FilterCache::new()), vec![1]);
    }

    #[test]
    fn non_boolean_expression_is_fatal() {
        let planet = planet_with_nodes();
        let filter = Filter::compile(vec![], vec![], Some("@amenity"), Language::Dfl, false, None).unwrap();
        let result = filter.keep_node(&planet, &planet.nodes()[0], &mut FilterCache::new());
        assert!(matches!(result, Err(FilterError::NotBoolean(_))));
    }

    #[test]
    fn synthetic_attributes_are_present_only_when_set() {
        let mut planet = Planet::new();
        let mut meta = ElementMeta::new(1);
        meta.uid = 42;
        meta.timestamp = parse_timestamp("2017-01-01T00:00:00Z");
        planet.set_user_name(42, "mapper".into());
        planet
            .add_node(Node {
                meta,
                tags: vec![],
                lon: 0.0,
                lat: 0.0,
            })
            .unwrap();

        let filter = Filter::compile(
            vec![],
            vec![],
            Some("@user == 'mapper' and @uid == 42 and @version == null and @timestamp like '2017%'"),
            Language::Dfl,
            false,
            None,
        )
        .unwrap();
        assert!(filter.keep_node(&planet, &planet.nodes()[0], &mut FilterCache::new()).unwrap());
    }

    #[test]
    fn cel_filters_over_tags() {
        let planet = planet_with_nodes();
        let filter = Filter::compile(
            vec![],
            vec![],
            Some("'amenity' in tags && tags.amenity == 'bar'"),
            Language::Cel,
            true,
            None,
        )
        .unwrap();
        assert_eq!(kept(&filter, &planet, &mut FilterCache::new()), vec![3]);
        assert_eq!(filter.referenced_keys(), None);
    }

    #[test]
    fn referenced_keys_cover_lists_and_expression() {
        let filter = Filter::compile(
            vec!["amenity".into()],
            vec!["disused".into()],
            Some("@name != '' and @version > 1"),
            Language::Dfl,
            false,
            None,
        )
        .unwrap();
        let keys = filter.referenced_keys().unwrap();
        assert!(keys.contains("amenity") && keys.contains("disused") && keys.contains("name"));
        assert!(filter.reads_attribute("version"));
        assert!(!filter.reads_attribute("timestamp"));
        assert!(!filter.keeps_every_node());
        assert!(Filter::keep_all().keeps_every_node());
    }

    #[test]
    fn bbox_needs_four_values() {
        let err = Filter::compile(vec![], vec![], None, Language::Dfl, false, Some(&[1.0, 2.0])).unwrap_err();
        assert!(matches!(err, FilterError::BoundingBox(2)));
    }
}
