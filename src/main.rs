// rmmu_host/src/main.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn};
use parking_lot::Mutex;

use rmmu_host::configfile::Configfile;
use rmmu_host::core_traits::VariableStore;
use rmmu_host::save_variables::{JsonFileVariables, MemoryVariables};
use rmmu_host::sim::SimBench;
use rmmu_host::RmmuHub;

/// Runs RMMU commands against simulated hardware
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file with one or more [rmmu <name>] sections
    #[arg()]
    config_file: String,

    /// keep saved variables in this JSON file between runs
    #[arg(long)]
    variables: Option<String>,

    /// write log to file instead of stderr
    #[arg(short, long)]
    logfile: Option<String>,

    /// enable debug messages
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Home every unit
    Home,
    /// Load a tool into its empty toolhead
    Load { tool: usize },
    /// Unload a tool, or whatever is loaded
    Unload { tool: Option<usize> },
    /// Eject a tool, or every tool
    Eject { tool: Option<usize> },
    /// Measure the reverse bowden length
    Calibrate,
    /// Home the filament of a tool, or of every tool
    HomeFilaments { tool: Option<usize> },
    /// Check that the given tools have filament ready
    TestFilaments {
        #[arg(required = true)]
        tools: Vec<usize>,
    },
    /// Print every sensor state
    QuerySensors,
    /// Print the hub status
    Status,
}

fn run(hub: &mut RmmuHub, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Home => hub.home()?,
        Command::Load { tool } => hub.load(*tool).with_context(|| format!("loading T{}", tool))?,
        Command::Unload { tool } => hub.unload(*tool).context("unloading")?,
        Command::Eject { tool } => hub.eject(*tool).context("ejecting")?,
        Command::Calibrate => {
            for length in hub.calibrate().context("calibrating")? {
                info!("Reverse bowden length: {:.1}mm", length);
            }
        }
        Command::HomeFilaments { tool } => hub.home_filaments(*tool).context("homing filaments")?,
        Command::TestFilaments { tools } => {
            let required: BTreeSet<usize> = tools.iter().copied().collect();
            hub.test_filaments(&required).context("testing filaments")?;
        }
        Command::QuerySensors => println!("{}", serde_json::to_string_pretty(&hub.query_sensors())?),
        Command::Status => println!("{}", serde_json::to_string_pretty(&hub.get_status())?),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter(None, log::LevelFilter::Debug);
    } else {
        builder.filter(None, log::LevelFilter::Info);
    }
    if let Some(ref logfile) = args.logfile {
        let target = Box::new(
            std::fs::File::create(logfile).with_context(|| format!("Can't create logfile {}", logfile))?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }
    builder.init();

    let config = Configfile::from_file(&args.config_file).map_err(anyhow::Error::msg)?;
    let variables: Arc<Mutex<dyn VariableStore>> = match args.variables {
        Some(ref path) => Arc::new(Mutex::new(JsonFileVariables::open(path).map_err(anyhow::Error::msg)?)),
        None => {
            warn!("No variables file given, calibration and loaded filament are not kept");
            Arc::new(Mutex::new(MemoryVariables::new()))
        }
    };

    let (mut hub, bench) = SimBench::build(&config, variables).context("building RMMU hub")?;
    info!(
        "{}: {} RMMU unit(s), {} tools",
        config.filename().unwrap_or(&args.config_file),
        hub.units().len(),
        hub.total_tool_count()
    );

    let result = run(&mut hub, &args.command);
    for event in bench.notifier.events() {
        println!("{}", serde_json::to_string(&event)?);
    }
    result
}
