use std::fs;
use std::future::Future;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{info, instrument, warn};

use crate::availability::{AvailabilitySource, fetch_live, load_availability};
use crate::busy::BusyDaySet;
use crate::cli::{Command, ExtractArgs, ShowArgs, SnapshotArgs};
use crate::config::{Config, FEED_URL_ENV_VAR, expand_tilde};
use crate::datetime::{resolve_display_timezone, today_in};
use crate::event::parse_feed;
use crate::extract::{EventStatus, Extraction, extract};
use crate::fetch::FeedSource;
use crate::render::{Renderer, parse_weekdays, weekend_days};
use crate::snapshot::write_snapshot;

/// What `snapshot` does with the existing file when the live feed fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorPolicy {
    Keep,
    Empty,
}

impl FetchErrorPolicy {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        match cfg
            .get("snapshot.on_fetch_error")
            .unwrap_or_else(|| "keep".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "keep" => Ok(Self::Keep),
            "empty" => Ok(Self::Empty),
            other => Err(anyhow!(
                "invalid snapshot.on_fetch_error: {other} (expected keep or empty)"
            )),
        }
    }
}

#[instrument(skip(cfg, renderer))]
pub fn dispatch(cfg: &Config, renderer: &mut Renderer, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Snapshot(args) => cmd_snapshot(cfg, args),
        Command::Show(args) => cmd_show(cfg, renderer, args),
        Command::Extract(args) => cmd_extract(args),
    }
}

pub fn snapshot_path(cfg: &Config, override_path: Option<&Path>) -> PathBuf {
    match override_path {
        Some(path) => path.to_path_buf(),
        None => expand_tilde(Path::new(
            &cfg.get("snapshot.path")
                .unwrap_or_else(|| "data.json".to_string()),
        )),
    }
}

#[instrument(skip(cfg))]
fn cmd_snapshot(cfg: &Config, args: SnapshotArgs) -> anyhow::Result<()> {
    let path = snapshot_path(cfg, args.output.as_deref());
    let policy = FetchErrorPolicy::from_config(cfg)?;
    let source = FeedSource::from_config(cfg)?.ok_or_else(|| {
        anyhow!("no feed configured: set feed.url or the {FEED_URL_ENV_VAR} environment variable")
    })?;

    let busy = block_on(refresh_snapshot(&source, &path, policy))??;
    println!(
        "Successfully updated {} with {} busy dates.",
        path.display(),
        busy.len()
    );
    Ok(())
}

/// Fetches the live feed and rewrites the snapshot at `path`. When the
/// fetch fails, `policy` decides between leaving the file alone (and
/// failing) and writing an empty list.
#[instrument(skip(source, path), fields(path = %path.display()))]
pub async fn refresh_snapshot(
    source: &FeedSource,
    path: &Path,
    policy: FetchErrorPolicy,
) -> anyhow::Result<BusyDaySet> {
    let busy = match fetch_live(source).await {
        Ok(extraction) => {
            report_skipped(&extraction);
            extraction.busy
        }
        Err(err) => match policy {
            FetchErrorPolicy::Keep => {
                return Err(anyhow::Error::new(err).context(format!(
                    "live feed unavailable; left {} untouched",
                    path.display()
                )));
            }
            FetchErrorPolicy::Empty => {
                warn!(error = %err, "live feed unavailable; writing empty snapshot");
                BusyDaySet::new()
            }
        },
    };

    write_snapshot(path, &busy)?;
    Ok(busy)
}

#[instrument(skip(cfg, renderer))]
fn cmd_show(cfg: &Config, renderer: &mut Renderer, args: ShowArgs) -> anyhow::Result<()> {
    let path = snapshot_path(cfg, None);
    let source = if args.offline {
        None
    } else {
        let source = FeedSource::from_config(cfg)?;
        if source.is_none() {
            warn!("no feed configured; using snapshot only");
        }
        source
    };

    let availability = block_on(load_availability(source.as_ref(), &path))??;
    if let Some(extraction) = &availability.extraction {
        report_skipped(extraction);
    }

    let tz = resolve_display_timezone(cfg.get("render.timezone").as_deref());
    let from = args.from.unwrap_or_else(|| today_in(tz));
    let days = match args.days {
        Some(days) => days,
        None => {
            let configured = cfg.get_u64("render.days")?.unwrap_or(90);
            u32::try_from(configured).context("render.days is too large")?
        }
    };
    let weekdays = if args.weekdays.is_empty() {
        parse_weekdays(&cfg.get_list("render.weekdays"))?
    } else {
        parse_weekdays(&args.weekdays)?
    };

    let statuses = weekend_days(&availability.busy, from, days, &weekdays);
    info!(
        from = %from,
        days,
        listed = statuses.len(),
        source = ?availability.source,
        "rendering availability"
    );

    if args.json {
        return renderer.print_days_json(&statuses);
    }

    if let AvailabilitySource::Snapshot(snapshot) = &availability.source {
        println!(
            "Live calendar unavailable; showing saved availability from {}.",
            snapshot.display()
        );
    }
    renderer.print_days(&statuses)
}

#[instrument]
fn cmd_extract(args: ExtractArgs) -> anyhow::Result<()> {
    let text = match args.input.as_deref() {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read iCal text from stdin")?;
            buf
        }
    };

    let extraction = extract(parse_feed(&text)?);
    let mut out = io::stdout().lock();

    if args.json {
        let payload = serde_json::json!({
            "busy": extraction.busy,
            "outcomes": extraction.outcomes,
        });
        serde_json::to_writer_pretty(&mut out, &payload)?;
        writeln!(out)?;
        return Ok(());
    }

    for day in extraction.busy.to_strings() {
        writeln!(out, "{day}")?;
    }
    report_skipped(&extraction);
    Ok(())
}

fn report_skipped(extraction: &Extraction) {
    for outcome in extraction.skipped() {
        if let EventStatus::Skipped { reason } = &outcome.status {
            warn!(
                index = outcome.index,
                uid = outcome.uid.as_deref().unwrap_or("-"),
                reason = %reason,
                "event skipped"
            );
        }
    }
    let empty = extraction.empty().count();
    if empty > 0 {
        info!(events = empty, "events shorter than a calendar day were not marked busy");
    }
}

fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
