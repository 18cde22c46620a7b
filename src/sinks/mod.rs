use anyhow::Result;
use serde_json::{Map, Value};

use crate::filter::TagProjection;
use crate::metadata::AttributeDrops;
use crate::planet::{Element, Node, Planet, Relation, Tag, Way};
use crate::resource::{Codec, OutputStream, ResourceFormat};

pub mod geojson;
pub mod osm;

pub use self::geojson::GeoJsonSink;
pub use self::osm::OsmXmlSink;

/// Emission-time settings of one output.
#[derive(Clone, Debug, Default)]
pub struct SinkOptions {
    pub drops: AttributeDrops,
    pub projection: TagProjection,
    pub pretty: bool,
}

impl SinkOptions {
    /// Tags of `element` that survive the output's projection, in stored order.
    pub fn tags<'a>(&'a self, planet: &'a Planet, element: &'a impl Element) -> impl Iterator<Item = &'a Tag> + 'a {
        planet
            .tags()
            .resolve(element.tags())
            .filter(|tag| self.projection.allows(&tag.key))
    }

    pub fn properties(&self, planet: &Planet, element: &impl Element) -> Map<String, Value> {
        self.tags(planet, element)
            .map(|tag| (tag.key.clone(), Value::String(tag.value.clone())))
            .collect()
    }
}

/// Receives the elements of one output in emission order.
pub trait DataSink: Send {
    fn begin(&mut self, planet: &Planet) -> Result<()>;
    fn add_node(&mut self, planet: &Planet, node: &Node) -> Result<()>;
    fn add_way(&mut self, planet: &Planet, way: &Way) -> Result<()>;
    fn add_relation(&mut self, planet: &Planet, relation: &Relation) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<()>;
}

pub fn init_sink(format: ResourceFormat, stream: OutputStream, options: SinkOptions) -> Box<dyn DataSink> {
    match format.codec {
        Codec::Osm => Box::new(OsmXmlSink::new(stream, options)),
        Codec::GeoJson => Box::new(GeoJsonSink::new(stream, options)),
    }
}
