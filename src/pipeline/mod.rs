//! Output fan-out. Every output runs in its own scoped thread over the frozen planet
//! and reports through a shared message channel drained by a single logger.

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, unbounded};
use std::time::Instant;

use crate::config::Output;
use crate::decode::retain::{RetentionRules, retain};
use crate::planet::Planet;
use crate::resource::Backends;
use crate::sinks::{SinkOptions, init_sink};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmitStats {
    pub nodes: usize,
    pub synthetic_nodes: usize,
    pub ways: usize,
    pub relations: usize,
}

#[derive(Debug)]
pub enum OutputMessage {
    Info(String),
    Error(String),
}

#[derive(Debug)]
pub struct OutputReport {
    pub uri: String,
    pub result: Result<EmitStats>,
}

/// Writes one output: retained nodes in arrival order, way-derived nodes, ways, then
/// relations.
pub fn write_output(planet: &Planet, output: &Output, backends: &Backends) -> Result<EmitStats> {
    let rules = RetentionRules {
        filter: &output.filter,
        drop_nodes: output.drop_nodes,
        drop_ways: output.drop_ways,
        drop_relations: output.drop_relations,
        ways_to_nodes: output.ways_to_nodes,
    };
    let retained = retain(planet, &rules).context("Output: filter evaluation failed")?;
    let synthetic = if output.ways_to_nodes {
        planet
            .centroid_nodes(&retained.ways)
            .context("Output: failed to convert ways to nodes")?
    } else {
        Vec::new()
    };

    let stream = output.resource.create(backends)?;
    let options = SinkOptions {
        drops: output.drops,
        projection: output.projection.clone(),
        pretty: output.pretty,
    };
    let mut sink = init_sink(output.resource.format(), stream, options);

    sink.begin(planet)?;
    for position in &retained.nodes {
        sink.add_node(planet, &planet.nodes()[*position])?;
    }
    for node in &synthetic {
        sink.add_node(planet, node)?;
    }
    let mut ways = 0;
    if !output.ways_to_nodes {
        for position in &retained.ways {
            sink.add_way(planet, &planet.ways()[*position])?;
        }
        ways = retained.ways.len();
    }
    for position in &retained.relations {
        sink.add_relation(planet, &planet.relations()[*position])?;
    }
    sink.finish()?;

    Ok(EmitStats {
        nodes: retained.nodes.len(),
        synthetic_nodes: synthetic.len(),
        ways,
        relations: retained.relations.len(),
    })
}

fn run_output(planet: &Planet, output: &Output, backends: &Backends, tx: &Sender<OutputMessage>) -> Result<EmitStats> {
    let uri = output.resource.uri();
    let start = Instant::now();
    tx.send(OutputMessage::Info(format!(
        "Output: writing {} ({})",
        uri,
        output.resource.format()
    )))
    .ok();

    let result = write_output(planet, output, backends);
    match &result {
        Ok(stats) => {
            tx.send(OutputMessage::Info(format!(
                "Output: {} done in {:.2}s ({} nodes, {} way nodes, {} ways, {} relations)",
                uri,
                start.elapsed().as_secs_f64(),
                stats.nodes,
                stats.synthetic_nodes,
                stats.ways,
                stats.relations
            )))
            .ok();
        }
        Err(err) => {
            tx.send(OutputMessage::Error(format!("Output: {} failed: {:#}", uri, err)))
                .ok();
        }
    }
    result
}

/// Runs every output concurrently and waits for all of them. A failing output does not
/// cancel its siblings; each outcome is returned in output order.
pub fn run_outputs(planet: &Planet, outputs: &[Output], backends: &Backends) -> Vec<OutputReport> {
    let (tx, rx) = unbounded::<OutputMessage>();

    std::thread::scope(|scope| {
        let handles: Vec<_> = outputs
            .iter()
            .map(|output| {
                let tx = tx.clone();
                scope.spawn(move || run_output(planet, output, backends, &tx))
            })
            .collect();
        drop(tx);

        for message in rx {
            match message {
                OutputMessage::Info(text) => tracing::info!("{}", text),
                OutputMessage::Error(text) => tracing::error!("{}", text),
            }
        }

        handles
            .into_iter()
            .zip(outputs)
            .map(|(handle, output)| {
                let result = handle.join().unwrap_or_else(|panic_payload| {
                    let panic_msg = panic_payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(anyhow!("Output: writer thread panicked: {}", panic_msg))
                });
                OutputReport {
                    uri: output.resource.uri().to_string(),
                    result,
                }
            })
            .collect()
    })
}
