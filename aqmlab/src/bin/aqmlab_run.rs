//! Runs an experiment matrix from a JSON run descriptor.
//!
//! Commands execute through the local process channel, which suits
//! single-machine testbeds where this driver runs on the bottleneck router;
//! multi-host deployments wire in an SSH-backed channel through the library
//! API instead.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;

use aqmlab::{Coordinator, Experiment, Hosts, IterationOutcome, RunDescriptor};
use aqmlab_remote::ProcessChannel;

#[derive(Debug, Parser)]
#[command(name = "aqmlab-run", about = "Drive AQM/ECN testbed experiments from a run descriptor")]
struct Args {
    /// Path to the JSON run descriptor.
    #[arg(short, long)]
    config: PathBuf,

    /// Run only the matrix entry at this index.
    #[arg(long)]
    experiment: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.config)?;
    let descriptor = RunDescriptor::from_json(&raw)?;

    let result_base = PathBuf::from(&descriptor.orchestration.result_path)
        .join(&descriptor.orchestration.overall_name);
    std::fs::create_dir_all(&result_base)?;

    let channel = Arc::new(ProcessChannel::new());
    let hosts = Hosts::shared(&descriptor.testbed, channel);

    let selected: Vec<usize> = match args.experiment {
        Some(index) => vec![index],
        None => (0..descriptor.experiments.len()).collect(),
    };

    let mut failed_runs = 0usize;
    for index in selected {
        let Some(spec) = descriptor.experiments.get(index) else {
            tracing::error!(index, "no such experiment in the descriptor");
            failed_runs += 1;
            continue;
        };

        // A broken matrix entry must not stop the remaining entries.
        let experiment = match Experiment::materialize(&descriptor, spec) {
            Ok(experiment) => experiment,
            Err(err) => {
                tracing::error!(index, %err, "could not materialize experiment");
                failed_runs += 1;
                continue;
            }
        };
        tracing::info!(index, name = %experiment.name, "running experiment");

        let coordinator = Coordinator::new(experiment, hosts.clone());
        match coordinator.run(&result_base).await {
            Ok(summary) => {
                let ok =
                    summary.outcomes.iter().filter(|o| **o == IterationOutcome::Success).count();
                tracing::info!(
                    index,
                    results = %summary.result_dir.display(),
                    "{ok}/{} iterations succeeded",
                    summary.outcomes.len()
                );
            }
            Err(err) => {
                tracing::error!(index, %err, "experiment run failed");
                failed_runs += 1;
            }
        }
    }

    if failed_runs > 0 {
        std::process::exit(1);
    }
    Ok(())
}
