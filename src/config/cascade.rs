//! Pushes output settings down onto inputs, so data no output can see is skipped at
//! decode time. Every rule is a set operation over all outputs, so the result does not
//! depend on output order.

use std::collections::BTreeSet;

use super::{Input, Output};
use crate::filter::Filter;

pub fn cascade(inputs: &mut [Input], outputs: &[Output]) {
    if outputs.is_empty() {
        return;
    }

    let filters: Vec<&Filter> = inputs
        .iter()
        .map(|input| &input.filter)
        .chain(outputs.iter().map(|output| &output.filter))
        .collect();
    let reads = |attribute: &str| filters.iter().any(|filter| filter.reads_attribute(attribute));
    let every = |check: &dyn Fn(&Output) -> bool| outputs.iter().all(check);

    let drop_relations = every(&|o| o.drop_relations);
    let drop_ways = every(&|o| o.drop_ways);
    let drop_version = every(&|o| o.drops.version) && !reads("version");
    let drop_timestamp = every(&|o| o.drops.timestamp) && !reads("timestamp");
    let drop_changeset = every(&|o| o.drops.changeset);
    let drop_user_name = every(&|o| o.drops.user_name) && !reads("user");
    let drop_user_id = drop_user_name && every(&|o| o.drops.user_id) && !reads("uid");

    let read_keys = filters
        .iter()
        .map(|filter| filter.referenced_keys())
        .collect::<Option<Vec<_>>>()
        .map(|sets| sets.into_iter().flatten().collect::<BTreeSet<String>>());

    let keep_keys = match &read_keys {
        Some(read) if outputs.iter().all(|o| !o.projection.keep.is_empty()) => {
            let mut keep: BTreeSet<String> = outputs
                .iter()
                .flat_map(|o| o.projection.keep.iter().cloned())
                .collect();
            keep.extend(read.iter().cloned());
            Some(keep)
        }
        _ => None,
    };

    let drop_keys = read_keys.as_ref().map(|read| {
        let mut common = outputs[0].projection.drop.clone();
        for output in &outputs[1..] {
            common.retain(|key| output.projection.drop.contains(key));
        }
        common.retain(|key| !read.contains(key));
        common
    });

    for input in inputs.iter_mut() {
        input.drop_relations |= drop_relations;
        if drop_ways && input.filter.keeps_every_node() && !input.drop_nodes && !input.ways_to_nodes {
            input.drop_ways = true;
        }
        input.drops.version |= drop_version;
        input.drops.timestamp |= drop_timestamp;
        input.drops.changeset |= drop_changeset;
        input.drops.user_name |= drop_user_name;
        input.drops.user_id |= drop_user_id;

        if let Some(keep) = &keep_keys {
            input.projection.keep = if input.projection.keep.is_empty() {
                keep.clone()
            } else {
                input.projection.keep.intersection(keep).cloned().collect()
            };
        }
        if let Some(drop) = &drop_keys {
            input.projection.drop.extend(drop.iter().cloned());
        }

        tracing::debug!(
            "Cascade: {} drops {:?}, projection {:?}, drop_ways={}, drop_relations={}",
            input.resource.uri(),
            input.drops,
            input.projection,
            input.drop_ways,
            input.drop_relations
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterConfig, ResourceConfig};

    fn input(config: ResourceConfig) -> Input {
        Input::resolve(config).unwrap()
    }

    fn output(uri: &str, drops: &[&str], keep: &[&str], drop: &[&str]) -> Output {
        let mut config = ResourceConfig::with_uri(uri);
        config.apply_drop_list(drops).unwrap();
        if !keep.is_empty() {
            config.keep_keys = Some(keep.iter().map(|k| k.to_string()).collect());
        }
        if !drop.is_empty() {
            config.drop_keys = Some(drop.iter().map(|k| k.to_string()).collect());
        }
        Output::resolve(config).unwrap()
    }

    fn expression(text: &str) -> Option<FilterConfig> {
        Some(FilterConfig {
            expression: Some(text.to_string()),
            ..FilterConfig::default()
        })
    }

    fn cascaded(outputs: &[Output]) -> Input {
        let mut inputs = vec![input(ResourceConfig::with_uri("in.osm"))];
        cascade(&mut inputs, outputs);
        inputs.remove(0)
    }

    #[test]
    fn unanimous_drops_reach_inputs() {
        let input = cascaded(&[
            output("a.osm", &["relations", "version", "author"], &[], &[]),
            output("b.osm", &["relations", "version", "user"], &[], &[]),
        ]);
        assert!(input.drop_relations);
        assert!(input.drops.version);
        assert!(input.drops.user_name);
        // b.osm still writes uids
        assert!(!input.drops.user_id);
        assert!(!input.drops.timestamp);
    }

    #[test]
    fn order_does_not_matter() {
        let make = || {
            vec![
                output("a.osm", &["ways", "timestamp"], &["name", "amenity"], &[]),
                output("b.osm", &["ways", "timestamp", "changeset"], &["shop"], &[]),
                output("c.osm", &["ways", "timestamp", "changeset"], &["name"], &[]),
            ]
        };
        let forward = cascaded(&make());
        let mut reversed = make();
        reversed.reverse();
        let backward = cascaded(&reversed);

        assert_eq!(forward.drops, backward.drops);
        assert_eq!(forward.projection, backward.projection);
        assert_eq!(forward.drop_ways, backward.drop_ways);
        assert!(forward.drop_ways);
        assert!(forward.drops.timestamp);
        assert!(!forward.drops.changeset);
        let keep: Vec<_> = forward.projection.keep.iter().map(String::as_str).collect();
        assert_eq!(keep, ["amenity", "name", "shop"]);
    }

    #[test]
    fn filters_protect_what_they_read() {
        let mut reading = ResourceConfig::with_uri("a.osm");
        reading.apply_drop_list(&["version"]).unwrap();
        reading.keep_keys = Some(vec!["name".into()]);
        reading.filter = expression("@version > 2 and @highway == 'primary'");
        let reading = Output::resolve(reading).unwrap();

        let input = cascaded(&[reading, output("b.osm", &["version"], &["name"], &[])]);
        assert!(!input.drops.version);
        let keep: Vec<_> = input.projection.keep.iter().map(String::as_str).collect();
        assert!(keep.contains(&"highway"));
        assert!(keep.contains(&"name"));
    }

    #[test]
    fn drop_lists_intersect() {
        let input = cascaded(&[
            output("a.osm", &[], &[], &["source", "note", "fixme"]),
            output("b.osm", &[], &[], &["note", "source"]),
        ]);
        let drop: Vec<_> = input.projection.drop.iter().map(String::as_str).collect();
        assert_eq!(drop, ["note", "source"]);
        assert!(input.projection.keep.is_empty());
    }

    #[test]
    fn filtered_input_keeps_its_ways() {
        let mut inputs = vec![input(ResourceConfig {
            filter: Some(FilterConfig {
                keys_keep: vec!["amenity".into()],
                ..FilterConfig::default()
            }),
            ..ResourceConfig::with_uri("in.osm")
        })];
        cascade(&mut inputs, &[output("a.osm", &["ways"], &[], &[])]);
        assert!(!inputs[0].drop_ways);
    }

    #[test]
    fn cel_over_tags_blocks_key_cascade() {
        let mut config = ResourceConfig::with_uri("a.osm");
        config.keep_keys = Some(vec!["name".into()]);
        config.filter = Some(FilterConfig {
            expression: Some("has(tags.amenity)".into()),
            language: crate::filter::Language::Cel,
            ..FilterConfig::default()
        });
        let input = cascaded(&[Output::resolve(config).unwrap()]);
        assert!(input.projection.keep.is_empty());
    }
}
