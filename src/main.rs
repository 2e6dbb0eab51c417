//! Hamper CLI
//!
//! Loads a scenario fixture, runs the planner over it and prints the
//! resulting plan as a table or as JSON.
//!
//! Pass a fixture set name (resolved under `fixtures/`) or a path to a
//! scenario YAML file. Use `--format json` for the wire-shaped response.

use std::{error::Error, io, io::Write, path::Path, time::Instant};

use clap::{Parser, ValueEnum};
use humanize_duration::{Truncate, prelude::DurationExt};
use tracing_subscriber::EnvFilter;

use hamper::{Planner, PlannerConfig, fixtures::Scenario, plan::render::write_plan};

/// Plan a shopping scenario
#[derive(Debug, Parser)]
#[command(name = "hamper", about = "Deterministic multi-vendor shopping planner", long_about = None)]
struct Args {
    /// Fixture set name under `fixtures/`, or a path to a scenario YAML file
    scenario: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Number of parallel search workers
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// Human-readable plan table
    Table,
    /// Wire-shaped JSON response
    Json,
}

#[expect(clippy::print_stdout, reason = "CLI output to the user")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let scenario = if Path::new(&args.scenario).is_file() {
        Scenario::load(&args.scenario)?
    } else {
        Scenario::from_set(&args.scenario)?
    };

    let mut config = PlannerConfig {
        currency: scenario.currency.iso_alpha_code.to_owned(),
        ..PlannerConfig::default()
    };
    if let Some(workers) = args.workers {
        config.search_workers = workers;
    }

    let sources = scenario.sources(config.distance_cache_ttl_secs);
    let planner = Planner::new(sources, config);

    let start = Instant::now();

    match args.format {
        Format::Table => {
            let plan = planner.plan_detailed(&scenario.request).await?;
            let elapsed = start.elapsed();

            let stdout = io::stdout();
            let mut handle = stdout.lock();

            write_plan(&mut handle, &plan)?;
            writeln!(handle, " solved in {}", elapsed.human(Truncate::Nano))?;
        }
        Format::Json => {
            let response = planner.plan(&scenario.request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
