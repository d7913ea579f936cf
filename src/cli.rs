//! CLI argument parsing for semdrift

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

/// Which noise levels to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseSelection {
    /// The configured set of levels
    All,
    /// One level; range-checked against [0, 100] before the batch starts
    Level(i64),
}

impl FromStr for NoiseSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(NoiseSelection::All);
        }
        s.trim()
            .parse::<i64>()
            .map(NoiseSelection::Level)
            .map_err(|_| format!("expected a noise level (0-100) or 'all', got '{}'", s))
    }
}

/// Transformation backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceArg {
    /// Output equals input (dry run)
    Passthrough,
    /// External program from `service_command` in the config
    Command,
}

#[derive(Parser, Debug)]
#[command(name = "semdrift")]
#[command(version)]
#[command(
    about = "Noise-injection pipeline and statistical drift analysis for multi-stage text transformations",
    long_about = None
)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the experiment batch, then write cost and analysis reports
    Run(RunArgs),
    /// Recompute the analysis report from persisted experiments
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Noise level 0-100, or 'all' for the configured set
    #[arg(short = 'n', long = "noise", value_name = "LEVEL|all")]
    pub noise: NoiseSelection,

    /// Base seed; repetition r uses seed + r
    #[arg(short = 's', long = "seed", default_value = "42")]
    pub seed: u64,

    /// TOML experiment configuration
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Results directory (overrides output_dir)
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Transformation backend (overrides service)
    #[arg(long = "service", value_enum)]
    pub service: Option<ServiceArg>,

    /// Worker threads (overrides workers)
    #[arg(short = 'j', long = "workers")]
    pub workers: Option<usize>,

    /// Repetitions per noise level (overrides repetitions)
    #[arg(short = 'r', long = "repetitions")]
    pub repetitions: Option<u32>,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// TOML experiment configuration (analysis sweep, output_dir)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Results directory to analyse (overrides output_dir)
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_selection_parsing() {
        assert_eq!("all".parse(), Ok(NoiseSelection::All));
        assert_eq!("ALL".parse(), Ok(NoiseSelection::All));
        assert_eq!("25".parse(), Ok(NoiseSelection::Level(25)));
        assert_eq!("150".parse(), Ok(NoiseSelection::Level(150)));
        assert!("loud".parse::<NoiseSelection>().is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "semdrift", "run", "--noise", "all", "--seed", "7", "--service", "passthrough",
            "-j", "2", "-r", "5",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.noise, NoiseSelection::All);
        assert_eq!(args.seed, 7);
        assert_eq!(args.service, Some(ServiceArg::Passthrough));
        assert_eq!(args.workers, Some(2));
        assert_eq!(args.repetitions, Some(5));
    }

    #[test]
    fn test_noise_is_required() {
        assert!(Cli::try_parse_from(["semdrift", "run"]).is_err());
    }

    #[test]
    fn test_analyze_arguments() {
        let cli = Cli::parse_from(["semdrift", "--debug", "analyze", "-o", "out"]);
        assert!(cli.debug);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.output, Some(PathBuf::from("out")));
    }
}
