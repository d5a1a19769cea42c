use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Carbon relay.
#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// A missing file is not an error: settings are then taken from `CINDER_`-prefixed environment variables only.
    #[arg(short = 'c', long = "config", global = true, default_value = "/etc/cinder/cinder.yaml")]
    pub config: PathBuf,

    /// Subcommand to run.
    #[command(subcommand)]
    pub action: Option<Action>,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Action {
    /// Runs the relay. This is the default.
    Run,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_to_run_with_default_path() {
        let cli = Cli::try_parse_from(["cinder-relay"]).unwrap();
        assert!(cli.action.is_none());
        assert_eq!(cli.config, PathBuf::from("/etc/cinder/cinder.yaml"));
    }

    #[test]
    fn config_before_or_after_subcommand() {
        let cli = Cli::try_parse_from(["cinder-relay", "--config", "/tmp/a.yaml", "run"]).unwrap();
        assert!(matches!(cli.action, Some(Action::Run)));
        assert_eq!(cli.config, PathBuf::from("/tmp/a.yaml"));

        let cli = Cli::try_parse_from(["cinder-relay", "run", "-c", "/tmp/b.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/b.yaml"));
    }
}
