use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        let key = k.trim();
        if key.is_empty() {
            return Err(anyhow!("expected KEY=VALUE, got: {s}"));
        }
        Ok(Self {
            key: key.to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "availcal",
    version,
    about = "Weekend availability from an iCal feed",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Config file to load instead of ~/.availcalrc
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Override a config key, e.g. --set render.days=30
    #[arg(
        long = "set",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub overrides: Vec<KeyVal>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch the feed and write the busy-date snapshot
    Snapshot(SnapshotArgs),
    /// List upcoming weekend days as available or unavailable
    Show(ShowArgs),
    /// Print the busy dates of an iCal file (or stdin)
    Extract(ExtractArgs),
}

impl Default for Command {
    fn default() -> Self {
        Self::Show(ShowArgs::default())
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct SnapshotArgs {
    /// Snapshot path; defaults to snapshot.path
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ShowArgs {
    /// First day to list (YYYY-MM-DD); defaults to today
    #[arg(long = "from")]
    pub from: Option<NaiveDate>,

    /// Number of days to scan; defaults to render.days
    #[arg(long = "days")]
    pub days: Option<u32>,

    /// Weekdays to list, e.g. fri,sat; defaults to render.weekdays
    #[arg(long = "weekdays", value_delimiter = ',')]
    pub weekdays: Vec<String>,

    #[arg(long = "json")]
    pub json: bool,

    /// Skip the live feed and read the snapshot only
    #[arg(long = "offline")]
    pub offline: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExtractArgs {
    /// iCal file to read; `-` or nothing reads stdin
    pub input: Option<PathBuf>,

    #[arg(long = "json")]
    pub json: bool,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
