//! OSM XML encoder.

use super::{DataSink, SinkOptions};
use anyhow::{Context, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::io::{BufWriter, Write};

use crate::metadata::ElementMeta;
use crate::planet::{Element, Node, Planet, Relation, Way};
use crate::resource::OutputStream;

const INDENT: usize = 4;

pub struct OsmXmlSink {
    writer: Writer<BufWriter<OutputStream>>,
    options: SinkOptions,
}

impl OsmXmlSink {
    pub fn new(stream: OutputStream, options: SinkOptions) -> Self {
        let inner = BufWriter::new(stream);
        let writer = if options.pretty {
            Writer::new_with_indent(inner, b' ', INDENT)
        } else {
            Writer::new(inner)
        };
        Self { writer, options }
    }

    /// Appends the optional attributes that are set and not dropped.
    fn push_meta(&self, planet: &Planet, start: &mut BytesStart, meta: &ElementMeta) {
        let meta = self.options.drops.project(meta);
        if meta.version != 0 {
            start.push_attribute(("version", meta.version.to_string().as_str()));
        }
        if let Some(ts) = meta.timestamp_string() {
            start.push_attribute(("timestamp", ts.as_str()));
        }
        if meta.changeset != 0 {
            start.push_attribute(("changeset", meta.changeset.to_string().as_str()));
        }
        if meta.uid != 0 {
            start.push_attribute(("uid", meta.uid.to_string().as_str()));
            if !self.options.drops.user_name
                && let Some(user) = planet.user_name(meta.uid)
            {
                start.push_attribute(("user", user));
            }
        }
    }

    fn write_tags(&mut self, planet: &Planet, element: &impl Element) -> Result<()> {
        let tags: Vec<_> = self.options.tags(planet, element).cloned().collect();
        for tag in tags {
            let mut start = BytesStart::new("tag");
            start.push_attribute(("k", tag.key.as_str()));
            start.push_attribute(("v", tag.value.as_str()));
            self.writer.write_event(Event::Empty(start))?;
        }
        Ok(())
    }

    fn has_tags(&self, planet: &Planet, element: &impl Element) -> bool {
        self.options.tags(planet, element).next().is_some()
    }
}

fn coordinate(value: f64) -> String {
    format!("{:.7}", value)
}

impl DataSink for OsmXmlSink {
    fn begin(&mut self, planet: &Planet) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        if !self.options.pretty {
            self.writer.get_mut().write_all(b"\n")?;
        }

        let mut root = BytesStart::new("osm");
        if !self.options.drops.version && !planet.header.version.is_empty() {
            root.push_attribute(("version", planet.header.version.as_str()));
        }
        if !self.options.drops.timestamp
            && let Some(ts) = planet.header.timestamp.and_then(crate::metadata::format_timestamp)
        {
            root.push_attribute(("timestamp", ts.as_str()));
        }
        self.writer.write_event(Event::Start(root))?;

        let bounds = planet.bounds();
        let mut start = BytesStart::new("bounds");
        start.push_attribute(("minlon", format!("{:.6}", bounds.min_lon).as_str()));
        start.push_attribute(("minlat", format!("{:.6}", bounds.min_lat).as_str()));
        start.push_attribute(("maxlon", format!("{:.6}", bounds.max_lon).as_str()));
        start.push_attribute(("maxlat", format!("{:.6}", bounds.max_lat).as_str()));
        self.writer.write_event(Event::Empty(start))?;
        Ok(())
    }

    fn add_node(&mut self, planet: &Planet, node: &Node) -> Result<()> {
        let mut start = BytesStart::new("node");
        start.push_attribute(("id", node.meta.id.to_string().as_str()));
        start.push_attribute(("lat", coordinate(node.lat).as_str()));
        start.push_attribute(("lon", coordinate(node.lon).as_str()));
        self.push_meta(planet, &mut start, &node.meta);

        if !self.has_tags(planet, node) {
            self.writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        self.writer.write_event(Event::Start(start))?;
        self.write_tags(planet, node)?;
        self.writer.write_event(Event::End(BytesEnd::new("node")))?;
        Ok(())
    }

    fn add_way(&mut self, planet: &Planet, way: &Way) -> Result<()> {
        let mut start = BytesStart::new("way");
        start.push_attribute(("id", way.meta.id.to_string().as_str()));
        self.push_meta(planet, &mut start, &way.meta);

        if way.refs.is_empty() && !self.has_tags(planet, way) {
            self.writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        self.writer.write_event(Event::Start(start))?;
        for reference in &way.refs {
            let mut nd = BytesStart::new("nd");
            nd.push_attribute(("ref", reference.to_string().as_str()));
            self.writer.write_event(Event::Empty(nd))?;
        }
        self.write_tags(planet, way)?;
        self.writer.write_event(Event::End(BytesEnd::new("way")))?;
        Ok(())
    }

    fn add_relation(&mut self, planet: &Planet, relation: &Relation) -> Result<()> {
        let mut start = BytesStart::new("relation");
        start.push_attribute(("id", relation.meta.id.to_string().as_str()));
        self.push_meta(planet, &mut start, &relation.meta);

        if relation.members.is_empty() && !self.has_tags(planet, relation) {
            self.writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        self.writer.write_event(Event::Start(start))?;
        for member in &relation.members {
            let mut element = BytesStart::new("member");
            element.push_attribute(("type", member.kind.as_str()));
            element.push_attribute(("ref", member.reference.to_string().as_str()));
            element.push_attribute(("role", member.role.as_str()));
            self.writer.write_event(Event::Empty(element))?;
        }
        self.write_tags(planet, relation)?;
        self.writer.write_event(Event::End(BytesEnd::new("relation")))?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new("osm")))?;
        self.writer.get_mut().write_all(b"\n")?;
        let stream = self
            .writer
            .into_inner()
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flushing OSM XML")?;
        stream.finish()?;
        Ok(())
    }
}
