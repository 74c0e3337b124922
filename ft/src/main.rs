//! ft - fedtree command-line entry point
//!
//! Builds an executor tree from configuration and runs programs on it.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use fedtree::cli::{Cli, Command};
use fedtree::config::Config;
use fedtree::demo::{self, approx_eq};
use fedtree::program::Program;
use fedtree::topology::TierSpec;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fedtree")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("fedtree.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Tree shape from `--fanout`, else from the configuration
fn resolve_topology(cli_fanout: Option<&[usize]>, config: &Config) -> Result<TierSpec> {
    match cli_fanout {
        Some(fanout) => {
            debug!(?fanout, "resolve_topology: using CLI fanout");
            let spec = TierSpec::uniform(fanout).ok_or_else(|| eyre!("--fanout must not be empty"))?;
            spec.validate().context("Invalid --fanout")?;
            Ok(spec)
        }
        None => config.topology.tier_spec().context("Invalid topology in config"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let topology = resolve_topology(cli.fanout.as_deref(), &config)?;
    info!(clients = topology.num_clients(), depth = topology.depth(), "ft loaded topology");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Topology => cmd_topology(&topology),
        Command::Run { program } => cmd_run(&topology, &program).await,
        Command::Demo => cmd_demo(&topology).await,
    }
}

fn cmd_topology(topology: &TierSpec) -> Result<()> {
    println!("{}", "Executor tree".bold());
    print!("{}", topology);
    println!();
    println!("Depth: {}", topology.depth());
    println!("Clients: {}", topology.num_clients());
    Ok(())
}

async fn cmd_run(topology: &TierSpec, path: &Path) -> Result<()> {
    let program = Program::load(path)?;
    let root = topology.build_root()?;
    let result = program
        .run(root)
        .await
        .context(format!("Failed to run {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    Ok(())
}

async fn cmd_demo(topology: &TierSpec) -> Result<()> {
    let num_clients = topology.num_clients();
    println!(
        "{} {} clients, depth {}",
        "Running scenarios on".bold(),
        num_clients,
        topology.depth()
    );
    println!();

    let root = topology.build_root()?;
    let mut failures = 0;
    for scenario in demo::scenarios(num_clients) {
        match scenario.program.run(root.clone()).await {
            Ok(result) if approx_eq(&result, &scenario.expected) => {
                println!("{} {}: {}", "✓".green(), scenario.name, result);
            }
            Ok(result) => {
                failures += 1;
                println!(
                    "{} {}: got {}, expected {}",
                    "✗".red(),
                    scenario.name,
                    result,
                    scenario.expected
                );
            }
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", "✗".red(), scenario.name, e);
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{} scenario(s) failed", failures));
    }
    Ok(())
}
