//! In-memory planet graph: nodes, ways and relations plus the indices derived from
//! them.
//!
//! A `Planet` is populated during the single-threaded decode phase and then shared
//! read-only (`&Planet`) by every output task. Nothing mutates it after decode.

pub mod tags;

use geo::Centroid;
use geo_types::{MultiPoint, Point};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;

use crate::error::PlanetError;
use crate::metadata::{
    AttributeDrops, ElementMeta, drop_changeset, drop_timestamp, drop_user_id, drop_version,
};

pub use tags::{Tag, TagCache, TagIndex};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Edges are inclusive.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn extend(&mut self, other: &Bounds) {
        self.min_lon = self.min_lon.min(other.min_lon);
        self.min_lat = self.min_lat.min(other.min_lat);
        self.max_lon = self.max_lon.max(other.max_lon);
        self.max_lat = self.max_lat.max(other.max_lat);
    }

    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points.into_iter().fold(None, |acc, (lon, lat)| {
            let point = Bounds::new(lon, lat, lon, lat);
            Some(match acc {
                Some(mut bounds) => {
                    bounds.extend(&point);
                    bounds
                }
                None => point,
            })
        })
    }

    /// `minlon,minlat,maxlon,maxlat` with six decimals.
    pub fn bbox_string(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6},{:.6}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub meta: ElementMeta,
    pub tags: Vec<TagIndex>,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Way {
    pub meta: ElementMeta,
    pub tags: Vec<TagIndex>,
    pub refs: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    pub kind: String,
    pub reference: u64,
    pub role: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Relation {
    pub meta: ElementMeta,
    pub tags: Vec<TagIndex>,
    pub members: Vec<Member>,
}

/// Shared view over nodes, ways and relations.
pub trait Element {
    fn meta(&self) -> &ElementMeta;
    fn tags(&self) -> &[TagIndex];
}

macro_rules! impl_element {
    ($($ty:ty),*) => {
        $(impl Element for $ty {
            fn meta(&self) -> &ElementMeta {
                &self.meta
            }

            fn tags(&self) -> &[TagIndex] {
                &self.tags
            }
        })*
    };
}

impl_element!(Node, Way, Relation);

/// Attributes of the `<osm>` root element.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentHeader {
    pub version: String,
    pub generator: String,
    pub timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct KindCounts {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub bbox: String,
    pub users: usize,
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
    pub keys: usize,
    pub tags: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_key: BTreeMap<String, KindCounts>,
}

#[derive(Debug, Default)]
pub struct Planet {
    pub header: DocumentHeader,
    bounds: Option<Bounds>,
    nodes: Vec<Node>,
    node_index: HashMap<u64, usize>,
    ways: Vec<Way>,
    way_index: HashMap<u64, usize>,
    relations: Vec<Relation>,
    relation_index: HashMap<u64, usize>,
    tags: TagCache,
    user_names: HashMap<u64, String>,
    max_id: u64,
}

impl Planet {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty planet whose minted ids start after `max_id`. Used to stage a
    /// document before it is merged into an existing planet.
    pub fn staged_after(max_id: u64) -> Self {
        Self {
            max_id,
            ..Self::default()
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn ways(&self) -> &[Way] {
        &self.ways
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn node(&self, id: u64) -> Option<&Node> {
        self.node_index.get(&id).map(|position| &self.nodes[*position])
    }

    pub fn way(&self, id: u64) -> Option<&Way> {
        self.way_index.get(&id).map(|position| &self.ways[*position])
    }

    pub fn tags(&self) -> &TagCache {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagCache {
        &mut self.tags
    }

    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    pub fn user_name(&self, uid: u64) -> Option<&str> {
        self.user_names.get(&uid).map(String::as_str)
    }

    pub fn set_user_name(&mut self, uid: u64, name: String) {
        if uid != 0 && !name.is_empty() {
            self.user_names.entry(uid).or_insert(name);
        }
    }

    /// Document bounds if the input declared them, else the extent of the nodes,
    /// else all zeros.
    pub fn bounds(&self) -> Bounds {
        self.bounds
            .or_else(|| Bounds::from_points(self.nodes.iter().map(|n| (n.lon, n.lat))))
            .unwrap_or_default()
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        match &mut self.bounds {
            Some(existing) => existing.extend(&bounds),
            None => self.bounds = Some(bounds),
        }
    }

    fn bump_max_id(&mut self, id: u64) {
        if id > self.max_id {
            self.max_id = id;
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), PlanetError> {
        let id = node.meta.id;
        if let Some(position) = self.node_index.get(&id) {
            return Err(PlanetError::DuplicateId {
                kind: "node",
                id,
                position: *position,
            });
        }
        self.node_index.insert(id, self.nodes.len());
        self.nodes.push(node);
        self.bump_max_id(id);
        Ok(())
    }

    pub fn add_way(&mut self, way: Way) -> Result<(), PlanetError> {
        let id = way.meta.id;
        if let Some(position) = self.way_index.get(&id) {
            return Err(PlanetError::DuplicateId {
                kind: "way",
                id,
                position: *position,
            });
        }
        self.way_index.insert(id, self.ways.len());
        self.ways.push(way);
        self.bump_max_id(id);
        Ok(())
    }

    pub fn add_relation(&mut self, relation: Relation) -> Result<(), PlanetError> {
        let id = relation.meta.id;
        if let Some(position) = self.relation_index.get(&id) {
            return Err(PlanetError::DuplicateId {
                kind: "relation",
                id,
                position: *position,
            });
        }
        self.relation_index.insert(id, self.relations.len());
        self.relations.push(relation);
        self.bump_max_id(id);
        Ok(())
    }

    /// Keeps only the elements at the given positions, in arrival order, and
    /// rebuilds the indices.
    pub fn retain_positions(&mut self, nodes: &[usize], ways: &[usize], relations: &[usize]) {
        self.nodes = select(std::mem::take(&mut self.nodes), nodes);
        self.ways = select(std::mem::take(&mut self.ways), ways);
        self.relations = select(std::mem::take(&mut self.relations), relations);
        self.node_index = index_by_id(&self.nodes);
        self.way_index = index_by_id(&self.ways);
        self.relation_index = index_by_id(&self.relations);
    }

    /// A node at the arithmetic mean of the way's node coordinates, carrying the
    /// way's tags and meta under `id`.
    pub fn way_to_node(&self, way: &Way, id: u64) -> Result<Node, PlanetError> {
        let points = way
            .refs
            .iter()
            .map(|reference| {
                self.node(*reference)
                    .map(|node| Point::new(node.lon, node.lat))
                    .ok_or(PlanetError::DanglingReference {
                        way: way.meta.id,
                        node: *reference,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let centroid = MultiPoint::new(points)
            .centroid()
            .ok_or(PlanetError::EmptyWay(way.meta.id))?;

        Ok(Node {
            meta: ElementMeta {
                id,
                ..way.meta.clone()
            },
            tags: way.tags.clone(),
            lon: centroid.x(),
            lat: centroid.y(),
        })
    }

    /// Centroid nodes for the ways at `positions`, with ids minted from `max_id + 1`
    /// in the given order.
    pub fn centroid_nodes(&self, positions: &[usize]) -> Result<Vec<Node>, PlanetError> {
        positions
            .iter()
            .zip(self.max_id + 1..)
            .map(|(position, id)| self.way_to_node(&self.ways[*position], id))
            .collect()
    }

    /// Drops every way and adds `nodes` in their place. Returns the number of nodes added.
    pub fn replace_ways(&mut self, nodes: Vec<Node>) -> Result<usize, PlanetError> {
        let count = nodes.len();
        self.drop_ways();
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(count)
    }

    pub fn drop_ways(&mut self) {
        self.ways.clear();
        self.way_index.clear();
    }

    pub fn drop_relations(&mut self) {
        self.relations.clear();
        self.relation_index.clear();
    }

    fn for_each_meta(&mut self, f: impl Fn(&mut ElementMeta)) {
        self.nodes.iter_mut().for_each(|n| f(&mut n.meta));
        self.ways.iter_mut().for_each(|w| f(&mut w.meta));
        self.relations.iter_mut().for_each(|r| f(&mut r.meta));
    }

    pub fn drop_version(&mut self) {
        self.for_each_meta(drop_version);
    }

    pub fn drop_timestamp(&mut self) {
        self.for_each_meta(drop_timestamp);
    }

    pub fn drop_changeset(&mut self) {
        self.for_each_meta(drop_changeset);
    }

    pub fn drop_user_id(&mut self) {
        self.for_each_meta(drop_user_id);
    }

    pub fn drop_user_name(&mut self) {
        self.user_names.clear();
    }

    pub fn drop_attributes(&mut self, drops: &AttributeDrops) {
        if drops.version {
            self.drop_version();
        }
        if drops.timestamp {
            self.drop_timestamp();
        }
        if drops.changeset {
            self.drop_changeset();
        }
        if drops.user_id {
            self.drop_user_id();
        }
        if drops.user_name {
            self.drop_user_name();
        }
    }

    /// Moves a fully decoded `staged` planet into this one.
    ///
    /// Tag indices are remapped into this planet's cache. Duplicate ids are fatal and
    /// are detected before anything is touched, so a failed merge leaves this planet
    /// unchanged.
    pub fn merge(&mut self, staged: Planet) -> Result<(), PlanetError> {
        self.check_disjoint(&staged)?;
        let Planet {
            header,
            bounds,
            nodes,
            ways,
            relations,
            tags,
            user_names,
            ..
        } = staged;

        if self.header.version.is_empty() && self.header.generator.is_empty() {
            self.header = header;
        }
        if let Some(bounds) = bounds.or_else(|| Bounds::from_points(nodes.iter().map(|n| (n.lon, n.lat)))) {
            self.set_bounds(bounds);
        }
        for (uid, name) in user_names {
            self.set_user_name(uid, name);
        }

        // Staged index i becomes mapping[i] in this planet's cache.
        let mapping = self.tags.add_tags(tags.into_tags());
        let remap = |indices: Vec<TagIndex>| -> Vec<TagIndex> {
            indices
                .into_iter()
                .filter_map(|index| mapping.get(index as usize).copied())
                .collect()
        };

        for mut node in nodes {
            node.tags = remap(std::mem::take(&mut node.tags));
            self.add_node(node)?;
        }
        for mut way in ways {
            way.tags = remap(std::mem::take(&mut way.tags));
            self.add_way(way)?;
        }
        for mut relation in relations {
            relation.tags = remap(std::mem::take(&mut relation.tags));
            self.add_relation(relation)?;
        }
        Ok(())
    }

    fn check_disjoint(&self, staged: &Planet) -> Result<(), PlanetError> {
        fn first_clash<T: Element>(
            kind: &'static str,
            index: &HashMap<u64, usize>,
            elements: &[T],
        ) -> Result<(), PlanetError> {
            match elements.iter().find_map(|e| index.get(&e.meta().id).map(|p| (e.meta().id, *p))) {
                Some((id, position)) => Err(PlanetError::DuplicateId { kind, id, position }),
                None => Ok(()),
            }
        }
        first_clash("node", &self.node_index, &staged.nodes)?;
        first_clash("way", &self.way_index, &staged.ways)?;
        first_clash("relation", &self.relation_index, &staged.relations)
    }

    pub fn summarize(&self, keys: &[String]) -> Summary {
        let by_key = keys
            .par_iter()
            .map(|key| {
                let counts = KindCounts {
                    nodes: self.count_with_key(self.nodes.iter().map(|n| &n.tags), key),
                    ways: self.count_with_key(self.ways.iter().map(|w| &w.tags), key),
                    relations: self.count_with_key(self.relations.iter().map(|r| &r.tags), key),
                };
                (key.clone(), counts)
            })
            .collect();

        Summary {
            bbox: self.bounds().bbox_string(),
            users: self.user_names.len(),
            nodes: self.nodes.len(),
            ways: self.ways.len(),
            relations: self.relations.len(),
            keys: self.tags.key_count(),
            tags: self.tags.len(),
            by_key,
        }
    }

    fn count_with_key<'a>(&self, elements: impl Iterator<Item = &'a Vec<TagIndex>>, key: &str) -> usize {
        elements.filter(|tags| self.tags.has_key(tags, key)).count()
    }
}

fn select<T>(items: Vec<T>, positions: &[usize]) -> Vec<T> {
    let mut keep = vec![false; items.len()];
    for position in positions {
        if let Some(slot) = keep.get_mut(*position) {
            *slot = true;
        }
    }
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, kept)| kept.then_some(item))
        .collect()
}

fn index_by_id<E: Element>(elements: &[E]) -> HashMap<u64, usize> {
    elements
        .iter()
        .enumerate()
        .map(|(position, element)| (element.meta().id, position))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn node(id: u64, lon: f64, lat: f64) -> Node {
        Node {
            meta: ElementMeta::new(id),
            tags: Vec::new(),
            lon,
            lat,
        }
    }

    pub(crate) fn way(id: u64, refs: &[u64]) -> Way {
        Way {
            meta: ElementMeta::new(id),
            tags: Vec::new(),
            refs: refs.to_vec(),
        }
    }

    fn square() -> Planet {
        let mut planet = Planet::new();
        planet.add_node(node(1, 0.0, 0.0)).unwrap();
        planet.add_node(node(2, 2.0, 0.0)).unwrap();
        planet.add_node(node(3, 2.0, 2.0)).unwrap();
        planet.add_node(node(4, 0.0, 2.0)).unwrap();
        planet
    }

    #[test]
    fn centroid_of_square_is_its_center() {
        let mut planet = square();
        let tag = planet.tags_mut().add_tag(Tag::new("building", "yes"));
        let mut w = way(10, &[1, 2, 3, 4]);
        w.tags = vec![tag];
        w.meta.version = 4;
        planet.add_way(w).unwrap();

        let centroids = planet.centroid_nodes(&[0]).unwrap();
        assert_eq!(planet.replace_ways(centroids).unwrap(), 1);
        assert!(planet.ways().is_empty());

        let synthetic = planet.nodes().last().unwrap();
        assert_eq!(synthetic.lon, 1.0);
        assert_eq!(synthetic.lat, 1.0);
        assert_eq!(synthetic.meta.id, 11);
        assert_eq!(synthetic.meta.version, 4);
        assert_eq!(synthetic.tags, vec![tag]);
    }

    #[test]
    fn minted_ids_increase_per_conversion() {
        let mut planet = square();
        planet.add_way(way(20, &[1, 2])).unwrap();
        planet.add_way(way(21, &[3, 4])).unwrap();
        let centroids = planet.centroid_nodes(&[1, 0]).unwrap();
        planet.replace_ways(centroids).unwrap();
        let ids: Vec<u64> = planet.nodes().iter().skip(4).map(|n| n.meta.id).collect();
        assert_eq!(ids, vec![22, 23]);
    }

    #[test]
    fn empty_way_is_a_structural_error() {
        let mut planet = square();
        planet.add_way(way(30, &[])).unwrap();
        assert!(matches!(
            planet.centroid_nodes(&[0]),
            Err(PlanetError::EmptyWay(30))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut planet = square();
        let err = planet.add_node(node(2, 5.0, 5.0)).unwrap_err();
        assert!(matches!(err, PlanetError::DuplicateId { kind: "node", id: 2, position: 1 }));
    }

    #[test]
    fn merge_remaps_tag_indices() {
        let mut planet = Planet::new();
        planet.tags_mut().add_tag(Tag::new("unrelated", "x"));

        let mut staged = Planet::staged_after(planet.max_id());
        let index = staged.tags_mut().add_tag(Tag::new("amenity", "cafe"));
        let mut n = node(5, 1.0, 1.0);
        n.tags = vec![index];
        staged.add_node(n).unwrap();
        staged.set_user_name(3, "mapper".into());

        planet.merge(staged).unwrap();
        let merged = planet.node(5).unwrap();
        let tags = planet.tags().map(&merged.tags);
        assert_eq!(tags.get("amenity").map(String::as_str), Some("cafe"));
        assert_eq!(planet.user_name(3), Some("mapper"));
        assert_eq!(planet.max_id(), 5);
    }

    #[test]
    fn failed_merge_leaves_planet_untouched() {
        let mut planet = square();
        let tag_count = planet.tags().len();

        let mut staged = Planet::staged_after(planet.max_id());
        let index = staged.tags_mut().add_tag(Tag::new("amenity", "cafe"));
        let mut fresh = node(9, 5.0, 5.0);
        fresh.tags = vec![index];
        staged.add_node(fresh).unwrap();
        staged.add_node(node(3, 1.0, 1.0)).unwrap();
        staged.set_user_name(3, "mapper".into());
        staged.set_bounds(Bounds::new(-10.0, -10.0, 10.0, 10.0));
        let bounds = planet.bounds();

        let err = planet.merge(staged).unwrap_err();
        assert!(matches!(err, PlanetError::DuplicateId { kind: "node", id: 3, position: 2 }));
        assert_eq!(planet.nodes().len(), 4);
        assert!(planet.node(9).is_none());
        assert_eq!(planet.tags().len(), tag_count);
        assert_eq!(planet.user_name(3), None);
        assert_eq!(planet.bounds(), bounds);
        assert_eq!(planet.max_id(), 4);
    }

    #[test]
    fn retain_positions_rebuilds_indices() {
        let mut planet = square();
        planet.add_way(way(10, &[1, 2])).unwrap();
        planet.retain_positions(&[1, 3], &[], &[]);
        assert_eq!(planet.nodes().len(), 2);
        assert_eq!(planet.node(4).map(|n| n.lon), Some(0.0));
        assert!(planet.node(1).is_none());
        assert!(planet.way(10).is_none());
    }

    #[test]
    fn bounds_fall_back_to_node_extent() {
        let planet = square();
        assert_eq!(planet.bounds(), Bounds::new(0.0, 0.0, 2.0, 2.0));
        assert_eq!(planet.bounds().bbox_string(), "0.000000,0.000000,2.000000,2.000000");
    }

    #[test]
    fn bulk_drops_apply_to_every_kind() {
        let mut planet = square();
        planet.add_way(way(10, &[1, 2])).unwrap();
        planet.nodes[0].meta.version = 2;
        planet.ways[0].meta.version = 5;
        planet.ways[0].meta.changeset = 9;
        planet.set_user_name(1, "a".into());

        planet.drop_attributes(&AttributeDrops {
            version: true,
            changeset: true,
            user_name: true,
            ..AttributeDrops::default()
        });
        assert_eq!(planet.nodes()[0].meta.version, 0);
        assert_eq!(planet.ways()[0].meta.version, 0);
        assert_eq!(planet.ways()[0].meta.changeset, 0);
        assert_eq!(planet.user_name(1), None);
    }

    #[test]
    fn summarize_counts_keys_by_kind() {
        let mut planet = square();
        let t = planet.tags_mut().add_tag(Tag::new("highway", "primary"));
        planet.nodes[1].tags.push(t);
        let mut w = way(10, &[1, 2]);
        w.tags.push(t);
        planet.add_way(w).unwrap();

        let summary = planet.summarize(&["highway".to_string()]);
        assert_eq!(summary.nodes, 4);
        assert_eq!(summary.ways, 1);
        let counts = &summary.by_key["highway"];
        assert_eq!((counts.nodes, counts.ways, counts.relations), (1, 1, 0));
    }
}
