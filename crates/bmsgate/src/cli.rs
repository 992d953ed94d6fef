//! Clap derive structures for the `bmsgate` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// bmsgate -- building-management gateway
#[derive(Debug, Parser)]
#[command(
    name = "bmsgate",
    version,
    about = "Validate and run building-management gateway configurations",
    long_about = "Normalizes BACnet, OPC UA, MQTT and cloud device points into typed traits\n\
        with change streams and health checks.\n\n\
        `check` validates a gateway config; `run` drives it against simulated devices.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Gateway config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "BMSGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "BMSGATE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load and validate a gateway config, then list its point bindings
    Check(CheckArgs),

    /// Drive the configured devices with simulated point values
    Run(RunArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Print the fully resolved config (defaults and env applied) as TOML
    #[arg(long)]
    pub resolved: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Seconds to run before shutting down
    #[arg(long, short = 'd', default_value = "5")]
    pub duration: u64,

    /// Fail every Nth poll of each device with a simulated read error
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub fail_every: Option<u64>,

    /// Only run this device
    #[arg(long)]
    pub device: Option<String>,

    /// Do not stream changes; only print the final health report
    #[arg(long)]
    pub no_changes: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["bmsgate", "run"]).ok();
        let Some(Cli {
            command: Command::Run(args),
            ..
        }) = cli
        else {
            panic!("expected run command");
        };
        assert_eq!(args.duration, 5);
        assert_eq!(args.fail_every, None);
    }

    #[test]
    fn fail_every_rejects_zero() {
        assert!(Cli::try_parse_from(["bmsgate", "run", "--fail-every", "0"]).is_err());
    }
}
