use nbody_engine::{bench_forces, bench_integrators, compute_energy_with, DiskStore, KineticScope};
use nbody_engine::{LogProgress, Scenario, ScenarioConfig, ScenarioOutput};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nbody", about = "Gravitational N-body integrator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Integrate a scenario from the scenarios/ directory
    Run {
        #[arg(short, default_value = "two_body.yaml")]
        file_name: String,

        /// Report the relative energy drift of the result
        #[arg(long)]
        energy: bool,
    },
    /// Time force evaluation and integrator steps
    Bench {
        #[arg(long, default_value_t = 800)]
        n: usize,

        #[arg(long, default_value_t = 5)]
        steps: usize,
    },
}

// load here to keep main clean
fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name);
    let file = File::open(&config_path).with_context(|| format!("opening {}", config_path.display()))?;
    let reader = BufReader::new(file);
    let scenario_cfg: ScenarioConfig = serde_yaml::from_reader(reader)?;
    Ok(scenario_cfg)
}

fn run(file_name: &str, energy: bool) -> Result<()> {
    let scenario_cfg = load_scenario_from_yaml(file_name)?;
    let g = scenario_cfg.config.g;
    let scenario = Scenario::build_scenario(scenario_cfg)?;
    let active = scenario.simulation.active_count();

    let (report, output) = match scenario.run(Some(Box::new(LogProgress))) {
        Ok(done) => done,
        Err(failure) => {
            match &failure.partial {
                Some(ScenarioOutput::Memory(record)) => log::warn!(
                    "keeping {} recorded instants per body",
                    record.body(0).map(|b| b.len()).unwrap_or(0)
                ),
                Some(ScenarioOutput::Disk(dir)) => log::warn!("partial trajectories kept in {}", dir.display()),
                None => {}
            }
            return Err(failure.error.into());
        }
    };
    log::info!(
        "{:?} at t = {} after {} steps ({} rejected, {} regularized pair steps)",
        report.status,
        report.t_end,
        report.steps,
        report.rejected,
        report.encounters
    );

    if energy {
        let trajectories = match output {
            ScenarioOutput::Memory(record) => record.into_trajectories(),
            ScenarioOutput::Disk(dir) => DiskStore::open(&dir)?.trajectories()?,
        };
        if trajectories.is_empty() {
            log::info!("no bodies, nothing to measure");
            return Ok(());
        }
        let series = compute_energy_with(&trajectories, active, KineticScope::Active, g)?;
        log::info!("max relative energy drift {:.3e}", series.max_relative_drift());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Run { file_name, energy } => run(&file_name, energy)?,
        Command::Bench { n, steps } => {
            println!("N,direct_ms,bh_ms");
            for t in bench_forces(&[n / 4, n / 2, n, 2 * n]) {
                println!("{},{:.6},{:.6}", t.n, t.direct_ms, t.tree_ms);
            }
            println!("integrator,N,ms_per_step");
            for t in bench_integrators(n, steps) {
                println!("{},{},{:.6}", t.name, t.n, t.ms_per_step);
            }
        }
    }
    Ok(())
}
