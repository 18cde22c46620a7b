use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::{FilterConfig, PlanetConfig, ResourceConfig, RunConfig, cascade};
use crate::decode::{DecodeOptions, decode_into};
use crate::filter::Language;
use crate::pipeline::run_outputs;
use crate::planet::Planet;
use crate::resource::{Backends, DEFAULT_READ_BUFFER};
use crate::utils::ProgressCounter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Filter OSM planet files into one or more outputs", long_about = None)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Input resource: path, file://, http(s)://, s3://, hdfs:// or stdin
    #[arg(short, long)]
    pub input: Option<String>,

    /// Input format (osm, osm.gz, osm.bz2); inferred from the extension if omitted
    #[arg(long)]
    pub input_format: Option<String>,

    /// Output resource; may be repeated
    #[arg(short, long)]
    pub output: Vec<String>,

    /// Output format (osm, osm.gz, geojson, geojson.gz); inferred if omitted
    #[arg(long)]
    pub output_format: Option<String>,

    /// Input filter: keep elements having any of these keys
    #[arg(long, value_delimiter = ',')]
    pub filter_keys_keep: Vec<String>,

    /// Input filter: drop elements having any of these keys
    #[arg(long, value_delimiter = ',')]
    pub filter_keys_drop: Vec<String>,

    /// Input filter expression
    #[arg(long)]
    pub filter_expression: Option<String>,

    /// Language of the filter expression
    #[arg(long, value_enum)]
    pub filter_language: Option<Language>,

    /// Memoize filter results by the attributes the expression reads
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub filter_use_cache: bool,

    /// Input filter bounding box: min_lon,min_lat,max_lon,max_lat
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub bbox: Option<Vec<f64>>,

    /// Output drops as a list: nodes, ways, relations, version, timestamp, changeset, uid, user, author
    #[arg(long, value_delimiter = ',')]
    pub drop: Vec<String>,

    #[arg(long)]
    pub drop_ways: bool,

    #[arg(long)]
    pub drop_relations: bool,

    #[arg(long)]
    pub drop_version: bool,

    #[arg(long)]
    pub drop_timestamp: bool,

    #[arg(long)]
    pub drop_changeset: bool,

    #[arg(long)]
    pub drop_uid: bool,

    #[arg(long)]
    pub drop_user: bool,

    /// Drop both uid and user
    #[arg(long)]
    pub drop_author: bool,

    /// Only write these tag keys
    #[arg(long, value_delimiter = ',', conflicts_with = "output_keys_drop")]
    pub output_keys_keep: Vec<String>,

    /// Never write these tag keys
    #[arg(long, value_delimiter = ',')]
    pub output_keys_drop: Vec<String>,

    /// Replace every retained way with a node at its centroid
    #[arg(long)]
    pub ways_to_nodes: bool,

    /// Indent output documents
    #[arg(long)]
    pub pretty: bool,

    /// Print a summary of the decoded planet (YAML) to stdout
    #[arg(long)]
    pub summarize: bool,

    /// Keys to count per element kind in the summary
    #[arg(long, value_delimiter = ',')]
    pub summarize_keys: Vec<String>,

    /// Replace existing outputs
    #[arg(long)]
    pub overwrite: bool,

    /// Stop after the preflight checks
    #[arg(long)]
    pub dry_run: bool,

    /// Number of threads (default: all cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Read buffer size in bytes
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER)]
    pub read_buffer_size: usize,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn set(flag: bool) -> Option<bool> {
    flag.then_some(true)
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

impl Cli {
    fn input_filter(&self) -> Option<FilterConfig> {
        let configured = !self.filter_keys_keep.is_empty()
            || !self.filter_keys_drop.is_empty()
            || self.filter_expression.is_some()
            || self.bbox.is_some();
        configured.then(|| FilterConfig {
            keys_keep: self.filter_keys_keep.clone(),
            keys_drop: self.filter_keys_drop.clone(),
            expression: self.filter_expression.clone(),
            language: self.filter_language.unwrap_or_default(),
            use_cache: self.filter_use_cache,
            bbox: self.bbox.clone(),
        })
    }

    fn output_settings(&self, uri: &str) -> Result<ResourceConfig> {
        let mut output = ResourceConfig {
            uri: Some(uri.to_string()),
            format: self.output_format.clone(),
            drop_ways: set(self.drop_ways),
            drop_relations: set(self.drop_relations),
            drop_version: set(self.drop_version),
            drop_timestamp: set(self.drop_timestamp),
            drop_changeset: set(self.drop_changeset),
            drop_uid: set(self.drop_uid),
            drop_user: set(self.drop_user),
            drop_author: set(self.drop_author),
            keep_keys: non_empty(&self.output_keys_keep),
            drop_keys: non_empty(&self.output_keys_drop),
            ways_to_nodes: set(self.ways_to_nodes),
            pretty: set(self.pretty),
            ..ResourceConfig::default()
        };
        output.apply_drop_list(&self.drop)?;
        Ok(output)
    }

    /// The configuration file (if any) extended with the resources given as flags.
    pub fn planet_config(&self) -> Result<PlanetConfig> {
        let mut config = match &self.config {
            Some(path) => PlanetConfig::load(path)?,
            None => PlanetConfig::default(),
        };

        let filter = self.input_filter();
        match &self.input {
            Some(uri) => config.inputs.push(ResourceConfig {
                uri: Some(uri.clone()),
                format: self.input_format.clone(),
                filter,
                ..ResourceConfig::default()
            }),
            None if filter.is_some() => bail!("CLI: filter flags require --input"),
            None => {}
        }

        for uri in &self.output {
            config.outputs.push(self.output_settings(uri)?);
        }
        Ok(config)
    }
}

/// Fails when an input is missing, an output already exists without `overwrite`, or
/// two outputs share a destination.
pub fn preflight(run: &RunConfig, backends: &Backends, overwrite: bool) -> Result<()> {
    for input in &run.inputs {
        let resource = &input.resource;
        if resource.is_stream() {
            continue;
        }
        let exists = resource
            .exists(backends)
            .with_context(|| format!("Preflight: failed to check {}", resource.uri()))?;
        if !exists {
            bail!("Preflight: input {} does not exist", resource.uri());
        }
    }

    let mut seen = HashSet::new();
    for output in &run.outputs {
        let resource = &output.resource;
        if !resource.is_stream() && !seen.insert(resource.uri()) {
            bail!("Preflight: output {} is configured more than once", resource.uri());
        }
        if resource.is_stream() || overwrite {
            continue;
        }
        let exists = resource
            .exists(backends)
            .with_context(|| format!("Preflight: failed to check {}", resource.uri()))?;
        if exists {
            bail!(
                "Preflight: output {} already exists; use --overwrite to replace it",
                resource.uri()
            );
        }
    }
    Ok(())
}

fn remove_existing_outputs(run: &RunConfig, backends: &Backends) -> Result<()> {
    for output in &run.outputs {
        let resource = &output.resource;
        if resource.is_stream() || !resource.exists(backends)? {
            continue;
        }
        tracing::info!("Removing existing output {}", resource.uri());
        resource
            .remove(backends)
            .with_context(|| format!("Preflight: failed to remove {}", resource.uri()))?;
    }
    Ok(())
}

/// Decodes every input in order into one planet.
pub fn decode_inputs(run: &RunConfig, backends: &Backends, read_buffer_size: usize, verbose: bool) -> Result<Planet> {
    let mut planet = Planet::new();
    for input in &run.inputs {
        let uri = input.resource.uri();
        let start = Instant::now();
        if let Ok(Some(size)) = input.resource.stat(backends) {
            tracing::info!("Decode: {} ({:.1} MB)", uri, size as f64 / (1024.0 * 1024.0));
        } else {
            tracing::info!("Decode: {}", uri);
        }

        let reader = input
            .resource
            .open(backends, read_buffer_size)
            .with_context(|| format!("Decode: failed to open {}", uri))?;
        let progress = verbose.then(|| ProgressCounter::new("Decode: elements", 100_000));
        let options = DecodeOptions {
            filter: &input.filter,
            drops: input.drops,
            projection: &input.projection,
            drop_nodes: input.drop_nodes,
            drop_ways: input.drop_ways,
            drop_relations: input.drop_relations,
            ways_to_nodes: input.ways_to_nodes,
            progress: progress.as_ref(),
        };
        let stats = decode_into(reader, &mut planet, &options).with_context(|| format!("Decode: {}", uri))?;
        if let Some(progress) = &progress {
            progress.finish();
        }

        tracing::info!(
            "Decode: {} done in {:.2}s (read {}/{}/{} nodes/ways/relations, kept {}/{}/{}, {} ways converted)",
            uri,
            start.elapsed().as_secs_f64(),
            stats.nodes_read,
            stats.ways_read,
            stats.relations_read,
            stats.nodes_kept,
            stats.ways_kept,
            stats.relations_kept,
            stats.ways_converted
        );
    }
    Ok(planet)
}

/// Runs the whole tool. Returns `false` when at least one output failed.
pub fn run(cli: &Cli) -> Result<bool> {
    let mut run = cli.planet_config()?.resolve()?;
    if run.outputs.is_empty() && !cli.summarize {
        bail!("CLI: no outputs configured; use --output, a config file or --summarize");
    }
    cascade(&mut run.inputs, &run.outputs);

    let backends = Backends::default();
    preflight(&run, &backends, cli.overwrite)?;
    if cli.dry_run {
        tracing::info!(
            "Dry run: {} inputs and {} outputs passed the preflight",
            run.inputs.len(),
            run.outputs.len()
        );
        return Ok(true);
    }
    if cli.overwrite {
        remove_existing_outputs(&run, &backends)?;
    }

    let planet = decode_inputs(&run, &backends, cli.read_buffer_size, cli.verbose)?;

    if cli.summarize {
        let summary = planet.summarize(&cli.summarize_keys);
        let text = serde_yaml::to_string(&summary).context("Summary: failed to serialize")?;
        print!("{}", text);
    }

    let start = Instant::now();
    let reports = run_outputs(&planet, &run.outputs, &backends);
    let failed = reports.iter().filter(|report| report.result.is_err()).count();
    for report in &reports {
        if let Err(err) = &report.result {
            tracing::debug!("Output: {} error chain: {:?}", report.uri, err);
        }
    }
    tracing::info!(
        "Done! {} of {} outputs written in {:.2}s",
        reports.len() - failed,
        reports.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(failed == 0)
}
