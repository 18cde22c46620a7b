//! Two-phase node retention.
//!
//! Ways and relations are filtered first. A node is then kept when a retained way
//! references it, or when it passes the node filter and nodes are not dropped.
//! Way membership always wins over the node filter.

use std::collections::HashSet;

use crate::error::FilterError;
use crate::filter::{Filter, FilterCache};
use crate::planet::Planet;

#[derive(Debug, Clone, Copy)]
pub struct RetentionRules<'a> {
    pub filter: &'a Filter,
    pub drop_nodes: bool,
    pub drop_ways: bool,
    pub drop_relations: bool,
    /// Retained ways become centroid nodes, so their references do not protect
    /// member nodes.
    pub ways_to_nodes: bool,
}

/// Positions, in arrival order, of the elements that survive.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Retained {
    pub nodes: Vec<usize>,
    pub ways: Vec<usize>,
    pub relations: Vec<usize>,
}

pub fn retain(planet: &Planet, rules: &RetentionRules) -> Result<Retained, FilterError> {
    let mut cache = FilterCache::new();
    let filter = rules.filter;

    let mut ways = Vec::new();
    if !rules.drop_ways {
        for (position, way) in planet.ways().iter().enumerate() {
            if filter.keep_way(planet, way, &mut cache)? {
                ways.push(position);
            }
        }
    }

    let mut relations = Vec::new();
    if !rules.drop_relations {
        for (position, relation) in planet.relations().iter().enumerate() {
            if filter.keep_relation(planet, relation, &mut cache)? {
                relations.push(position);
            }
        }
    }

    let way_nodes: HashSet<u64> = if rules.ways_to_nodes {
        HashSet::new()
    } else {
        ways.iter()
            .flat_map(|position| planet.ways()[*position].refs.iter().copied())
            .collect()
    };

    let mut nodes = Vec::new();
    for (position, node) in planet.nodes().iter().enumerate() {
        let keep = way_nodes.contains(&node.meta.id)
            || (!rules.drop_nodes && filter.keep_node(planet, node, &mut cache)?);
        if keep {
            nodes.push(position);
        }
    }

    tracing::debug!(
        "Retention: {} nodes, {} ways, {} relations (filter cache: {} entries, {} hits)",
        nodes.len(),
        ways.len(),
        relations.len(),
        cache.len(),
        cache.hits()
    );

    Ok(Retained {
        nodes,
        ways,
        relations,
    })
}
