//! Run configuration. A YAML file (loaded with the `config` crate) and CLI flags both
//! produce `ResourceConfig`s, which are merged with the globals block, validated and
//! resolved into `Input`s and `Output`s.

mod cascade;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::filter::{Filter, Language, TagProjection};
use crate::metadata::AttributeDrops;
use crate::resource::Resource;

pub use cascade::cascade;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub keys_keep: Vec<String>,
    pub keys_drop: Vec<String>,
    pub expression: Option<String>,
    pub language: Language,
    pub use_cache: bool,
    pub bbox: Option<Vec<f64>>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            keys_keep: Vec::new(),
            keys_drop: Vec::new(),
            expression: None,
            language: Language::Dfl,
            use_cache: true,
            bbox: None,
        }
    }
}

impl FilterConfig {
    pub fn compile(&self) -> Result<Filter> {
        let filter = Filter::compile(
            self.keys_keep.clone(),
            self.keys_drop.clone(),
            self.expression.as_deref(),
            self.language,
            self.use_cache,
            self.bbox.as_deref(),
        )?;
        Ok(filter)
    }
}

/// Settings of one input or output. Every field is optional so the same shape serves
/// the globals block; unset fields fall back to the globals, then to defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceConfig {
    pub uri: Option<String>,
    pub format: Option<String>,
    pub drop_nodes: Option<bool>,
    pub drop_ways: Option<bool>,
    pub drop_relations: Option<bool>,
    pub drop_version: Option<bool>,
    pub drop_timestamp: Option<bool>,
    pub drop_changeset: Option<bool>,
    pub drop_uid: Option<bool>,
    pub drop_user: Option<bool>,
    pub drop_author: Option<bool>,
    pub keep_keys: Option<Vec<String>>,
    pub drop_keys: Option<Vec<String>>,
    pub ways_to_nodes: Option<bool>,
    pub pretty: Option<bool>,
    pub filter: Option<FilterConfig>,
}

impl ResourceConfig {
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// Fills every unset field from `defaults`.
    pub fn merged(self, defaults: &ResourceConfig) -> ResourceConfig {
        ResourceConfig {
            uri: self.uri.or_else(|| defaults.uri.clone()),
            format: self.format.or_else(|| defaults.format.clone()),
            drop_nodes: self.drop_nodes.or(defaults.drop_nodes),
            drop_ways: self.drop_ways.or(defaults.drop_ways),
            drop_relations: self.drop_relations.or(defaults.drop_relations),
            drop_version: self.drop_version.or(defaults.drop_version),
            drop_timestamp: self.drop_timestamp.or(defaults.drop_timestamp),
            drop_changeset: self.drop_changeset.or(defaults.drop_changeset),
            drop_uid: self.drop_uid.or(defaults.drop_uid),
            drop_user: self.drop_user.or(defaults.drop_user),
            drop_author: self.drop_author.or(defaults.drop_author),
            keep_keys: self.keep_keys.or_else(|| defaults.keep_keys.clone()),
            drop_keys: self.drop_keys.or_else(|| defaults.drop_keys.clone()),
            ways_to_nodes: self.ways_to_nodes.or(defaults.ways_to_nodes),
            pretty: self.pretty.or(defaults.pretty),
            filter: self.filter.or_else(|| defaults.filter.clone()),
        }
    }

    /// Applies a `--drop` style list such as `version,uid,relations`.
    pub fn apply_drop_list<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        for name in names {
            let target = match name.as_ref().trim().to_ascii_lowercase().as_str() {
                "nodes" => &mut self.drop_nodes,
                "ways" => &mut self.drop_ways,
                "relations" => &mut self.drop_relations,
                "version" => &mut self.drop_version,
                "timestamp" => &mut self.drop_timestamp,
                "changeset" => &mut self.drop_changeset,
                "uid" => &mut self.drop_uid,
                "user" => &mut self.drop_user,
                "author" => &mut self.drop_author,
                other => bail!("Config: unknown drop target {:?}", other),
            };
            *target = Some(true);
        }
        Ok(())
    }

    fn drops(&self) -> AttributeDrops {
        let author = flag(self.drop_author);
        AttributeDrops {
            version: flag(self.drop_version),
            timestamp: flag(self.drop_timestamp),
            changeset: flag(self.drop_changeset),
            user_id: flag(self.drop_uid) || author,
            user_name: flag(self.drop_user) || author,
        }
    }

    fn projection(&self) -> TagProjection {
        TagProjection::new(
            self.keep_keys.clone().unwrap_or_default(),
            self.drop_keys.clone().unwrap_or_default(),
        )
    }

    fn filter(&self) -> Result<Filter> {
        match &self.filter {
            Some(filter) => filter.compile(),
            None => Ok(Filter::keep_all()),
        }
    }
}

fn flag(value: Option<bool>) -> bool {
    value.unwrap_or(false)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalsConfig {
    pub input: ResourceConfig,
    pub output: ResourceConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PlanetConfig {
    pub globals: GlobalsConfig,
    pub inputs: Vec<ResourceConfig>,
    pub outputs: Vec<ResourceConfig>,
}

impl PlanetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .with_context(|| format!("Config: failed to read {}", path.display()))?;
        settings
            .try_deserialize()
            .with_context(|| format!("Config: invalid configuration in {}", path.display()))
    }

    /// Merges globals, validates and resolves every resource.
    pub fn resolve(self) -> Result<RunConfig> {
        let inputs = self
            .inputs
            .into_iter()
            .enumerate()
            .map(|(n, input)| {
                Input::resolve(input.merged(&self.globals.input))
                    .with_context(|| format!("Config: input #{}", n + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        let outputs = self
            .outputs
            .into_iter()
            .enumerate()
            .map(|(n, output)| {
                Output::resolve(output.merged(&self.globals.output))
                    .with_context(|| format!("Config: output #{}", n + 1))
            })
            .collect::<Result<Vec<_>>>()?;

        if inputs.is_empty() {
            bail!("Config: at least one input is required");
        }
        Ok(RunConfig { inputs, outputs })
    }
}

#[derive(Debug)]
pub struct Input {
    pub resource: Resource,
    pub filter: Filter,
    pub drops: AttributeDrops,
    pub projection: TagProjection,
    pub drop_nodes: bool,
    pub drop_ways: bool,
    pub drop_relations: bool,
    pub ways_to_nodes: bool,
}

impl Input {
    pub fn resolve(config: ResourceConfig) -> Result<Self> {
        let Some(uri) = config.uri.as_deref() else {
            bail!("missing uri");
        };
        let resource = Resource::input(uri, config.format.as_deref())?;
        Ok(Self {
            filter: config.filter()?,
            drops: config.drops(),
            projection: config.projection(),
            drop_nodes: flag(config.drop_nodes),
            drop_ways: flag(config.drop_ways),
            drop_relations: flag(config.drop_relations),
            ways_to_nodes: flag(config.ways_to_nodes),
            resource,
        })
    }
}

#[derive(Debug)]
pub struct Output {
    pub resource: Resource,
    pub filter: Filter,
    pub drops: AttributeDrops,
    pub projection: TagProjection,
    pub drop_nodes: bool,
    pub drop_ways: bool,
    pub drop_relations: bool,
    pub ways_to_nodes: bool,
    pub pretty: bool,
}

impl Output {
    pub fn resolve(config: ResourceConfig) -> Result<Self> {
        let Some(uri) = config.uri.as_deref() else {
            bail!("missing uri");
        };
        let resource = Resource::output(uri, config.format.as_deref())?;
        let output = Self {
            filter: config.filter()?,
            drops: config.drops(),
            projection: config.projection(),
            drop_nodes: flag(config.drop_nodes),
            drop_ways: flag(config.drop_ways),
            drop_relations: flag(config.drop_relations),
            ways_to_nodes: flag(config.ways_to_nodes),
            pretty: flag(config.pretty),
            resource,
        };

        if output.ways_to_nodes && output.drop_ways {
            bail!("{}: ways_to_nodes cannot be combined with drop_ways", uri);
        }
        if output.drop_nodes && output.drop_ways && output.drop_relations {
            bail!("{}: dropping nodes, ways and relations leaves nothing to write", uri);
        }
        Ok(output)
    }
}

/// Resolved inputs and outputs of one run.
#[derive(Debug)]
pub struct RunConfig {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Codec, Compression};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
globals:
  output:
    drop_version: true
    pretty: true
inputs:
  - uri: planet.osm.gz
    filter:
      keys_keep: [amenity]
      bbox: [-78.0, 38.0, -77.0, 39.0]
outputs:
  - uri: cafes.osm
    filter:
      expression: "@amenity == 'cafe'"
  - uri: cafes.geojson
    pretty: false
    drop_author: true
"#;

    fn load(yaml: &str) -> Result<PlanetConfig> {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        PlanetConfig::load(file.path())
    }

    #[test]
    fn loads_and_applies_globals() {
        let config = load(YAML).unwrap();
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.outputs.len(), 2);

        let run = config.resolve().unwrap();
        let input = &run.inputs[0];
        assert_eq!(input.resource.format().compression, Compression::Gzip);
        assert_eq!(input.filter.keys_keep(), ["amenity".to_string()]);
        assert!(input.filter.bbox().is_some());

        let osm = &run.outputs[0];
        assert!(osm.drops.version);
        assert!(osm.pretty);
        assert!(osm.filter.has_expression());

        let geojson = &run.outputs[1];
        assert_eq!(geojson.resource.format().codec, Codec::GeoJson);
        assert!(!geojson.pretty);
        assert!(geojson.drops.version);
        assert!(geojson.drops.user_id && geojson.drops.user_name);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(load("inputs:\n  - uri: a.osm\n    colour: red\n").is_err());
    }

    #[test]
    fn input_requires_uri() {
        let config = PlanetConfig {
            inputs: vec![ResourceConfig::default()],
            ..PlanetConfig::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn rejects_bzip2_output() {
        let config = PlanetConfig {
            inputs: vec![ResourceConfig::with_uri("in.osm")],
            outputs: vec![ResourceConfig::with_uri("out.osm.bz2")],
            ..PlanetConfig::default()
        };
        let err = config.resolve().unwrap_err();
        assert!(format!("{:#}", err).contains("bzip2"));
    }

    #[test]
    fn rejects_ways_to_nodes_with_drop_ways() {
        let output = ResourceConfig {
            ways_to_nodes: Some(true),
            drop_ways: Some(true),
            ..ResourceConfig::with_uri("out.osm")
        };
        assert!(Output::resolve(output).is_err());
    }

    #[test]
    fn rejects_dropping_everything() {
        let mut output = ResourceConfig::with_uri("out.osm");
        output.apply_drop_list(&["nodes", "ways", "relations"]).unwrap();
        assert!(Output::resolve(output).is_err());
    }

    #[test]
    fn rejects_short_bbox() {
        let input = ResourceConfig {
            filter: Some(FilterConfig {
                bbox: Some(vec![1.0, 2.0]),
                ..FilterConfig::default()
            }),
            ..ResourceConfig::with_uri("in.osm")
        };
        assert!(Input::resolve(input).is_err());
    }

    #[test]
    fn drop_list_rejects_unknown_names() {
        let mut config = ResourceConfig::default();
        config.apply_drop_list(&["version", "author"]).unwrap();
        assert_eq!(config.drop_version, Some(true));
        assert_eq!(config.drop_author, Some(true));
        assert!(config.apply_drop_list(&["colour"]).is_err());
    }

    #[test]
    fn explicit_settings_win_over_globals() {
        let globals = ResourceConfig {
            drop_version: Some(true),
            keep_keys: Some(vec!["name".into()]),
            ..ResourceConfig::default()
        };
        let merged = ResourceConfig {
            drop_version: Some(false),
            ..ResourceConfig::with_uri("out.osm")
        }
        .merged(&globals);
        assert_eq!(merged.drop_version, Some(false));
        assert_eq!(merged.keep_keys, Some(vec!["name".to_string()]));
        assert_eq!(merged.uri.as_deref(), Some("out.osm"));
    }
}
