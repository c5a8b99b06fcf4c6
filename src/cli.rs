//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tandem - implicit coupling of two solvers
#[derive(Parser)]
#[command(
    name = "tandem",
    about = "Implicit coupling of two lockstep solvers with M2N data exchange",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/tandem/logs/tandem.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run both demo participants and report coupling statistics
    Run {
        /// Override the number of time windows
        #[arg(long)]
        timesteps: Option<u32>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Check the configuration and exit
    Validate,

    /// Print the effective configuration as YAML
    ShowConfig,
}

/// Output format for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["tandem"]);
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["tandem", "run"]);
        assert!(matches!(
            cli.command,
            Some(Command::Run {
                timesteps: None,
                format: OutputFormat::Text
            })
        ));
    }

    #[test]
    fn test_cli_parse_run_json_with_timesteps() {
        let cli = Cli::parse_from(["tandem", "run", "--timesteps", "5", "-f", "json"]);
        assert!(matches!(
            cli.command,
            Some(Command::Run {
                timesteps: Some(5),
                format: OutputFormat::Json
            })
        ));
    }

    #[test]
    fn test_cli_parse_global_config() {
        let cli = Cli::parse_from(["tandem", "validate", "-c", "coupling.yml", "-v"]);
        assert!(matches!(cli.command, Some(Command::Validate)));
        assert_eq!(cli.config, Some(PathBuf::from("coupling.yml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_parse_show_config() {
        let cli = Cli::parse_from(["tandem", "show-config"]);
        assert!(matches!(cli.command, Some(Command::ShowConfig)));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }
}
