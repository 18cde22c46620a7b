use super::{DataSink, SinkOptions};
use anyhow::{Context, Result, anyhow};
use geo_types::{Coord, LineString, Point, Polygon};
use geojson::feature::Id;
use geojson::{Feature, GeoJson};
use std::io::{BufWriter, Write};

use crate::planet::{Element, Node, Planet, Relation, Way};
use crate::resource::OutputStream;

/// Streams a FeatureCollection. Nodes become points and ways become line strings,
/// or polygons when closed. Relations carry no geometry and are skipped.
pub struct GeoJsonSink {
    writer: BufWriter<OutputStream>,
    options: SinkOptions,
    first_feature: bool,
}

impl GeoJsonSink {
    pub fn new(stream: OutputStream, options: SinkOptions) -> Self {
        Self {
            writer: BufWriter::new(stream),
            options,
            first_feature: true,
        }
    }

    fn write_feature(&mut self, planet: &Planet, element: &impl Element, geometry: geo_types::Geometry) -> Result<()> {
        if !self.first_feature {
            writeln!(self.writer, ",")?;
        }
        self.first_feature = false;

        let feature = Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::from(&geometry)),
            id: Some(Id::Number(element.meta().id.into())),
            properties: Some(self.options.properties(planet, element)),
            foreign_members: None,
        };
        let geojson = GeoJson::Feature(feature);
        if self.options.pretty {
            serde_json::to_writer_pretty(&mut self.writer, &geojson)?;
        } else {
            serde_json::to_writer(&mut self.writer, &geojson)?;
        }
        Ok(())
    }
}

fn way_geometry(planet: &Planet, way: &Way) -> Result<geo_types::Geometry> {
    let coords = way
        .refs
        .iter()
        .map(|id| {
            planet
                .node(*id)
                .map(|node| Coord { x: node.lon, y: node.lat })
                .ok_or_else(|| anyhow!("way {} references missing node {}", way.meta.id, id))
        })
        .collect::<Result<Vec<_>>>()?;

    let line = LineString::new(coords);
    if line.is_closed() && line.0.len() >= 4 {
        Ok(Polygon::new(line, vec![]).into())
    } else {
        Ok(line.into())
    }
}

impl DataSink for GeoJsonSink {
    fn begin(&mut self, _planet: &Planet) -> Result<()> {
        writeln!(self.writer, "{{")?;
        writeln!(self.writer, "  \"type\": \"FeatureCollection\",")?;
        writeln!(self.writer, "  \"features\": [")?;
        Ok(())
    }

    fn add_node(&mut self, planet: &Planet, node: &Node) -> Result<()> {
        self.write_feature(planet, node, Point::new(node.lon, node.lat).into())
    }

    fn add_way(&mut self, planet: &Planet, way: &Way) -> Result<()> {
        let geometry = way_geometry(planet, way)?;
        self.write_feature(planet, way, geometry)
    }

    fn add_relation(&mut self, _planet: &Planet, _relation: &Relation) -> Result<()> {
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        if !self.first_feature {
            writeln!(self.writer)?;
        }
        writeln!(self.writer, "  ]")?;
        writeln!(self.writer, "}}")?;
        let stream = self
            .writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flushing GeoJSON")?;
        stream.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TagProjection;
    use crate::planet::Tag;
    use crate::planet::tests::{node, way};
    use crate::resource::{Backends, Resource};
    use serde_json::Value;
    use tempfile::TempDir;

    fn fixture() -> Planet {
        let mut planet = Planet::new();
        let name = planet.tags_mut().add_tag(Tag::new("name", "Corner"));
        let note = planet.tags_mut().add_tag(Tag::new("note", "internal"));

        let mut corner = node(1, 0.0, 0.0);
        corner.tags = vec![name, note];
        planet.add_node(corner).unwrap();
        planet.add_node(node(2, 1.0, 0.0)).unwrap();
        planet.add_node(node(3, 1.0, 1.0)).unwrap();
        planet.add_way(way(10, &[1, 2, 3])).unwrap();
        planet.add_way(way(11, &[1, 2, 3, 1])).unwrap();
        planet
    }

    fn render(planet: &Planet, options: SinkOptions) -> Value {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.geojson");
        let resource = Resource::output(&path.to_string_lossy(), None).unwrap();
        let stream = resource.create(&Backends::default()).unwrap();

        let mut sink: Box<dyn DataSink> = Box::new(GeoJsonSink::new(stream, options));
        sink.begin(planet).unwrap();
        for node in planet.nodes() {
            sink.add_node(planet, node).unwrap();
        }
        for way in planet.ways() {
            sink.add_way(planet, way).unwrap();
        }
        sink.finish().unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.ends_with("}\n"));
        serde_json::from_str(&content).unwrap()
    }

    #[test]
    fn writes_feature_collection() {
        let parsed = render(&fixture(), SinkOptions::default());
        assert_eq!(parsed["type"], "FeatureCollection");

        let features = parsed["features"].as_array().unwrap();
        assert_eq!(features.len(), 5);
        assert_eq!(features[0]["id"], 1);
        assert_eq!(features[0]["geometry"]["type"], "Point");
        assert_eq!(features[0]["properties"]["name"], "Corner");
        assert_eq!(features[3]["geometry"]["type"], "LineString");
        assert_eq!(features[4]["geometry"]["type"], "Polygon");
        assert_eq!(features[4]["id"], 11);
    }

    #[test]
    fn properties_follow_projection() {
        let options = SinkOptions {
            projection: TagProjection::new(vec!["name".to_string()], Vec::new()),
            ..SinkOptions::default()
        };
        let parsed = render(&fixture(), options);
        let properties = parsed["features"][0]["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 1);
        assert!(properties.contains_key("name"));
    }

    #[test]
    fn writes_empty_collection() {
        let parsed = render(&Planet::new(), SinkOptions::default());
        assert!(parsed["features"].as_array().unwrap().is_empty());
    }

    #[test]
    fn missing_way_node_is_an_error() {
        let mut planet = Planet::new();
        planet.add_node(node(1, 0.0, 0.0)).unwrap();
        planet.add_way(way(10, &[1, 9])).unwrap();
        assert!(way_geometry(&planet, &planet.ways()[0]).is_err());
    }
}
