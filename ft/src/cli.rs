//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fedtree - hierarchical executor tree for federated computations
#[derive(Parser)]
#[command(
    name = "ft",
    about = "Run federated computations on a tree of composed executors",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Uniform tree shape, overriding the configured topology
    #[arg(
        short,
        long,
        global = true,
        value_delimiter = ',',
        help = "Tree fanout, e.g. 2,3,2 (last entry = clients per leaf)"
    )]
    pub fanout: Option<Vec<usize>>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the executor tree shape
    Topology,

    /// Evaluate a program file and print the result as JSON
    Run {
        /// Program file (YAML: computation plus optional argument)
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,
    },

    /// Run the built-in scenarios
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_topology() {
        let cli = Cli::parse_from(["ft", "topology"]);
        assert!(matches!(cli.command, Command::Topology));
        assert!(cli.fanout.is_none());
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["ft", "run", "sum.yml"]);
        if let Command::Run { program } = cli.command {
            assert_eq!(program, PathBuf::from("sum.yml"));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_fanout() {
        let cli = Cli::parse_from(["ft", "--fanout", "2,3,2", "demo"]);
        assert_eq!(cli.fanout, Some(vec![2, 3, 2]));
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn test_cli_with_config_and_level() {
        let cli = Cli::parse_from(["ft", "-c", "/path/to/config.yml", "topology", "-l", "debug"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["ft"]).is_err());
    }
}
