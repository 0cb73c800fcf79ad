//! Live feed first, persisted snapshot second.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::busy::BusyDaySet;
use crate::event::{FeedError, parse_feed};
use crate::extract::{Extraction, extract};
use crate::fetch::{FeedSource, FetchError, fetch_feed};
use crate::snapshot::{SnapshotError, read_snapshot};

#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("no availability data (live feed: {live}); snapshot fallback failed")]
    NoData {
        live: String,
        #[source]
        fallback: SnapshotError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilitySource {
    Live,
    Snapshot(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Availability {
    pub busy: BusyDaySet,
    pub source: AvailabilitySource,
    /// Per-event diagnostics; only present for live data.
    pub extraction: Option<Extraction>,
}

/// Fetches, decodes and extracts in one go. Per-event problems end up in
/// the returned diagnostics; only feed-level failures are errors.
#[tracing::instrument(skip_all)]
pub async fn fetch_live(source: &FeedSource) -> Result<Extraction, LiveError> {
    let text = fetch_feed(source).await?;
    let entries = parse_feed(&text)?;
    let extraction = extract(entries);
    info!(
        events = extraction.outcomes.len(),
        busy_days = extraction.busy.len(),
        skipped = extraction.skipped().count(),
        "extracted busy days from live feed"
    );
    Ok(extraction)
}

/// `source` is `None` when running offline or when no feed is configured;
/// the snapshot is then the only option.
#[tracing::instrument(skip_all, fields(snapshot = %snapshot_path.display()))]
pub async fn load_availability(
    source: Option<&FeedSource>,
    snapshot_path: &Path,
) -> Result<Availability, AvailabilityError> {
    let live_failure = match source {
        Some(source) => match fetch_live(source).await {
            Ok(extraction) => {
                return Ok(Availability {
                    busy: extraction.busy.clone(),
                    source: AvailabilitySource::Live,
                    extraction: Some(extraction),
                });
            }
            Err(err) => {
                warn!(error = %err, "live feed unavailable; falling back to snapshot");
                err.to_string()
            }
        },
        None => "not attempted".to_string(),
    };

    match read_snapshot(snapshot_path) {
        Ok(busy) => {
            info!(busy_days = busy.len(), "using snapshot availability");
            Ok(Availability {
                busy,
                source: AvailabilitySource::Snapshot(snapshot_path.to_path_buf()),
                extraction: None,
            })
        }
        Err(fallback) => Err(AvailabilityError::NoData {
            live: live_failure,
            fallback,
        }),
    }
}
