pub mod availability;
pub mod busy;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod event;
pub mod extract;
pub mod fetch;
pub mod render;
pub mod snapshot;

use std::ffi::OsString;

use clap::Parser;
use tracing::{
  debug,
  info
};

pub use busy::BusyDaySet;
pub use event::CalendarEvent;
pub use extract::{
  Extraction,
  extract,
  extract_events
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting availcal"
  );
  debug!(
    overrides = cli.overrides.len(),
    "parsed config overrides"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );

  let mut renderer =
    render::Renderer::new(&cfg)?;

  commands::dispatch(
    &cfg,
    &mut renderer,
    cli.command.unwrap_or_default()
  )?;

  info!("done");
  Ok(())
}
