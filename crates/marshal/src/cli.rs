//! cli argument parser module

use clap::Parser;

/// Flags and arguments accepted by the coordinator binary. Use
/// [`parse_arguments`] to build one from `std::env::args`.
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Cli {
    /// Path to the TOML configuration file; built-in defaults are used when
    /// omitted
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Scenario file to run against the loopback simulator
    #[arg(short, long, value_name = "SCENARIO_FILE")]
    pub scenario: Option<std::path::PathBuf>,

    /// Dump the default configuration as TOML to stdout and exit
    #[arg(long)]
    pub dump_default: bool,

    /// Increases logging verbosity each use for up to 3 times
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Be silent about most things
    #[default]
    None,
    /// Log normal events
    Normal,
    /// Trace a log of events
    Very,
    /// Log everything!
    Ultra,
}

impl Cli {
    /// Get the set verbosity level
    #[must_use]
    pub const fn verbosity(&self) -> Verbosity {
        match self.verbose {
            0 => Verbosity::None,
            1 => Verbosity::Normal,
            2 => Verbosity::Very,
            _ => Verbosity::Ultra,
        }
    }
}

/// Parse arguments from `std::env::args`
#[must_use]
pub fn parse_arguments() -> Cli {
    Cli::parse()
}
