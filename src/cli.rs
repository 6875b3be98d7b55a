//! CLI definition using clap.

use std::path::PathBuf;

use clap::Parser;

/// Homeo - self-healing task scheduling for agent pools
#[derive(Parser, Debug)]
#[command(name = "homeo")]
#[command(version)]
#[command(
    long_about = "Homeo runs a pool of role-specialised agents: it distributes pending tasks, \
                  watches agent health, resolves conflicts and heals failing agents until stopped."
)]
pub struct Cli {
    /// Engine configuration file (TOML); built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// JSON file with an array of tasks to submit at start-up
    #[arg(short, long)]
    pub tasks: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long, default_value_t = false)]
    pub print_config: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_config_and_tasks() {
        let cli = Cli::parse_from(["homeo", "--config", "engine.toml", "-t", "seed.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("engine.toml")));
        assert_eq!(cli.tasks, Some(PathBuf::from("seed.json")));
        assert!(!cli.print_config);
    }
}
