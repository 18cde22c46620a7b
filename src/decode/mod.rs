//! Streaming OSM XML decoder.
//!
//! A document is decoded into a staged `Planet`, filtered, optionally converted
//! and only then merged into the shared planet. A failing document leaves no
//! trace in the shared graph.

pub mod retain;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashSet;
use std::io::BufRead;
use std::str::FromStr;

use crate::error::PlanetError;
use crate::filter::{Filter, TagProjection};
use crate::metadata::{AttributeDrops, ElementMeta, parse_timestamp};
use crate::planet::{Bounds, Member, Node, Planet, Relation, Tag, TagIndex, Way};
use crate::utils::ProgressCounter;

pub use retain::{Retained, RetentionRules, retain};

/// Per-input decode settings.
pub struct DecodeOptions<'a> {
    pub filter: &'a Filter,
    pub drops: AttributeDrops,
    pub projection: &'a TagProjection,
    pub drop_nodes: bool,
    pub drop_ways: bool,
    pub drop_relations: bool,
    pub ways_to_nodes: bool,
    pub progress: Option<&'a ProgressCounter>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub nodes_read: usize,
    pub ways_read: usize,
    pub relations_read: usize,
    pub nodes_kept: usize,
    pub ways_kept: usize,
    pub relations_kept: usize,
    pub ways_converted: usize,
}

enum State {
    AwaitingRoot,
    InRoot,
    InNode(Node),
    InWay(Way),
    InRelation(Relation),
    Done,
}

/// Decodes one document from `reader` and merges it into `planet`.
pub fn decode_into<R: BufRead>(
    reader: R,
    planet: &mut Planet,
    options: &DecodeOptions,
) -> Result<DecodeStats, PlanetError> {
    let mut staged = Planet::staged_after(planet.max_id());
    let mut stats = parse_document(reader, &mut staged, options)?;

    check_references(&staged)?;

    let retained = retain(
        &staged,
        &RetentionRules {
            filter: options.filter,
            drop_nodes: options.drop_nodes,
            drop_ways: options.drop_ways,
            drop_relations: options.drop_relations,
            ways_to_nodes: options.ways_to_nodes,
        },
    )?;
    // Centroids are computed before pruning: member nodes of converted ways are not
    // retained on their own.
    let centroids = if options.ways_to_nodes {
        staged.centroid_nodes(&retained.ways)?
    } else {
        Vec::new()
    };
    staged.retain_positions(&retained.nodes, &retained.ways, &retained.relations);
    stats.nodes_kept = staged.nodes().len();
    stats.ways_kept = staged.ways().len();
    stats.relations_kept = staged.relations().len();

    if options.ways_to_nodes {
        stats.ways_converted = staged.replace_ways(centroids)?;
    }

    planet.merge(staged)?;
    Ok(stats)
}

/// Every way reference must name a node declared in the same document.
fn check_references(staged: &Planet) -> Result<(), PlanetError> {
    let declared: HashSet<u64> = staged.nodes().iter().map(|n| n.meta.id).collect();
    for way in staged.ways() {
        if let Some(missing) = way.refs.iter().find(|r| !declared.contains(r)) {
            return Err(PlanetError::DanglingReference {
                way: way.meta.id,
                node: *missing,
            });
        }
    }
    Ok(())
}

fn parse_document<R: BufRead>(
    reader: R,
    staged: &mut Planet,
    options: &DecodeOptions,
) -> Result<DecodeStats, PlanetError> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut stats = DecodeStats::default();
    let mut state = State::AwaitingRoot;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                state = on_open(state, &e, false, staged, options, &mut stats)?;
            }
            Event::Empty(e) => {
                state = on_open(state, &e, true, staged, options, &mut stats)?;
            }
            Event::End(e) => {
                state = on_close(state, e.name().as_ref(), staged, options)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match state {
        State::AwaitingRoot => Err(PlanetError::MissingRoot),
        _ => Ok(stats),
    }
}

fn on_open(
    state: State,
    e: &BytesStart,
    self_closing: bool,
    staged: &mut Planet,
    options: &DecodeOptions,
    stats: &mut DecodeStats,
) -> Result<State, PlanetError> {
    let name = e.name();
    match (state, name.as_ref()) {
        (State::AwaitingRoot, b"osm") => {
            read_header(e, staged)?;
            Ok(if self_closing { State::Done } else { State::InRoot })
        }
        (State::AwaitingRoot, _) => Ok(State::AwaitingRoot),

        (State::InRoot, b"bounds") => {
            staged.set_bounds(read_bounds(e)?);
            Ok(State::InRoot)
        }
        (State::InRoot, b"node") => {
            stats.nodes_read += 1;
            let node = read_node(e, staged, &options.drops)?;
            progress(options);
            if self_closing {
                staged.add_node(node)?;
                Ok(State::InRoot)
            } else {
                Ok(State::InNode(node))
            }
        }
        (State::InRoot, b"way") => {
            stats.ways_read += 1;
            let way = Way {
                meta: read_meta(e, "way", staged, &options.drops)?,
                tags: Vec::new(),
                refs: Vec::new(),
            };
            progress(options);
            if self_closing {
                finish_way(way, staged, options)?;
                Ok(State::InRoot)
            } else {
                Ok(State::InWay(way))
            }
        }
        (State::InRoot, b"relation") => {
            stats.relations_read += 1;
            let relation = Relation {
                meta: read_meta(e, "relation", staged, &options.drops)?,
                tags: Vec::new(),
                members: Vec::new(),
            };
            progress(options);
            if self_closing {
                finish_relation(relation, staged, options)?;
                Ok(State::InRoot)
            } else {
                Ok(State::InRelation(relation))
            }
        }
        (State::InRoot, _) => Ok(State::InRoot),

        (State::InNode(mut node), b"tag") => {
            push_tag(e, "node", &mut node.tags, staged, options.projection)?;
            Ok(State::InNode(node))
        }
        (State::InWay(mut way), b"tag") => {
            push_tag(e, "way", &mut way.tags, staged, options.projection)?;
            Ok(State::InWay(way))
        }
        (State::InWay(mut way), b"nd") => {
            way.refs.push(required(e, "nd", "ref")?);
            Ok(State::InWay(way))
        }
        (State::InRelation(mut relation), b"tag") => {
            push_tag(e, "relation", &mut relation.tags, staged, options.projection)?;
            Ok(State::InRelation(relation))
        }
        (State::InRelation(mut relation), b"member") => {
            relation.members.push(read_member(e)?);
            Ok(State::InRelation(relation))
        }
        (state, _) => Ok(state),
    }
}

fn on_close(
    state: State,
    name: &[u8],
    staged: &mut Planet,
    options: &DecodeOptions,
) -> Result<State, PlanetError> {
    match (state, name) {
        (State::InNode(node), b"node") => {
            staged.add_node(node)?;
            Ok(State::InRoot)
        }
        (State::InWay(way), b"way") => {
            finish_way(way, staged, options)?;
            Ok(State::InRoot)
        }
        (State::InRelation(relation), b"relation") => {
            finish_relation(relation, staged, options)?;
            Ok(State::InRoot)
        }
        (State::InRoot, b"osm") => Ok(State::Done),
        (state, _) => Ok(state),
    }
}

fn finish_way(way: Way, staged: &mut Planet, options: &DecodeOptions) -> Result<(), PlanetError> {
    if options.drop_ways {
        return Ok(());
    }
    staged.add_way(way)
}

fn finish_relation(
    relation: Relation,
    staged: &mut Planet,
    options: &DecodeOptions,
) -> Result<(), PlanetError> {
    if options.drop_relations {
        return Ok(());
    }
    staged.add_relation(relation)
}

fn progress(options: &DecodeOptions) {
    if let Some(counter) = options.progress {
        counter.inc(1);
    }
}

fn attribute(e: &BytesStart, name: &[u8]) -> Result<Option<String>, PlanetError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_value<T: FromStr>(
    raw: String,
    element: &'static str,
    attribute: &'static str,
) -> Result<T, PlanetError> {
    raw.trim().parse().map_err(|_| PlanetError::InvalidAttribute {
        element,
        attribute,
        value: raw,
    })
}

fn required<T: FromStr>(
    e: &BytesStart,
    element: &'static str,
    name: &'static str,
) -> Result<T, PlanetError> {
    let raw = attribute(e, name.as_bytes())?.ok_or(PlanetError::MissingAttribute {
        element,
        attribute: name,
    })?;
    parse_value(raw, element, name)
}

fn optional<T: FromStr>(
    e: &BytesStart,
    element: &'static str,
    name: &'static str,
) -> Result<Option<T>, PlanetError> {
    attribute(e, name.as_bytes())?
        .map(|raw| parse_value(raw, element, name))
        .transpose()
}

fn read_header(e: &BytesStart, staged: &mut Planet) -> Result<(), PlanetError> {
    if let Some(version) = attribute(e, b"version")? {
        staged.header.version = version;
    }
    if let Some(generator) = attribute(e, b"generator")? {
        staged.header.generator = generator;
    }
    if let Some(raw) = attribute(e, b"timestamp")? {
        staged.header.timestamp = Some(parse_timestamp(&raw).ok_or(PlanetError::InvalidTimestamp {
            element: "osm",
            value: raw,
        })?);
    }
    Ok(())
}

fn read_bounds(e: &BytesStart) -> Result<Bounds, PlanetError> {
    Ok(Bounds::new(
        required(e, "bounds", "minlon")?,
        required(e, "bounds", "minlat")?,
        required(e, "bounds", "maxlon")?,
        required(e, "bounds", "maxlat")?,
    ))
}

/// Reads the shared attributes. Dropped attributes are not parsed at all.
fn read_meta(
    e: &BytesStart,
    element: &'static str,
    staged: &mut Planet,
    drops: &AttributeDrops,
) -> Result<ElementMeta, PlanetError> {
    let mut meta = ElementMeta::new(required(e, element, "id")?);

    if !drops.version {
        meta.version = optional(e, element, "version")?.unwrap_or(0);
    }
    if !drops.timestamp
        && let Some(raw) = attribute(e, b"timestamp")?
    {
        meta.timestamp = Some(
            parse_timestamp(&raw).ok_or(PlanetError::InvalidTimestamp { element, value: raw })?,
        );
    }
    if !drops.changeset {
        meta.changeset = optional(e, element, "changeset")?.unwrap_or(0);
    }
    if !drops.user_id {
        meta.uid = optional(e, element, "uid")?.unwrap_or(0);
    }
    if !drops.user_name
        && meta.uid != 0
        && let Some(user) = attribute(e, b"user")?
    {
        staged.set_user_name(meta.uid, user);
    }
    Ok(meta)
}

fn read_node(e: &BytesStart, staged: &mut Planet, drops: &AttributeDrops) -> Result<Node, PlanetError> {
    Ok(Node {
        meta: read_meta(e, "node", staged, drops)?,
        tags: Vec::new(),
        lon: required(e, "node", "lon")?,
        lat: required(e, "node", "lat")?,
    })
}

fn read_member(e: &BytesStart) -> Result<Member, PlanetError> {
    Ok(Member {
        kind: attribute(e, b"type")?.unwrap_or_default(),
        reference: required(e, "member", "ref")?,
        role: attribute(e, b"role")?.unwrap_or_default(),
    })
}

/// Registers the tag in the cache unless the projection drops its key.
fn push_tag(
    e: &BytesStart,
    element: &'static str,
    tags: &mut Vec<TagIndex>,
    staged: &mut Planet,
    projection: &TagProjection,
) -> Result<(), PlanetError> {
    let key = attribute(e, b"k")?.ok_or(PlanetError::MissingAttribute {
        element,
        attribute: "k",
    })?;
    if !projection.allows(&key) {
        return Ok(());
    }
    let value = attribute(e, b"v")?.unwrap_or_default();
    tags.push(staged.tags_mut().add_tag(Tag::new(key, value)));
    Ok(())
}
