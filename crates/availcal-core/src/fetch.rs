use std::time::Duration;

use anyhow::anyhow;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::event::looks_like_calendar;

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const ACCEPT: &str = "text/calendar, text/plain, */*;q=0.8";
const USER_AGENT: &str = concat!("availcal/", env!("CARGO_PKG_VERSION"));

/// Where the feed lives. Built by the caller and passed in; nothing here
/// reads the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: String,
    /// Relay URLs tried after every direct candidate failed. Either a prefix
    /// the encoded feed URL is appended to, or a template with `{url}`.
    pub relays: Vec<String>,
    /// Bound on the whole fetch, all candidates included.
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("calendar feed URL is empty")]
    EmptyUrl,

    #[error("failed building HTTP client for calendar fetch")]
    Client(#[source] reqwest::Error),

    #[error("calendar feed did not answer within {0:?}")]
    Timeout(Duration),

    #[error("no candidate URL returned a calendar after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    label: String,
    url: String,
}

impl FeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            relays: vec![],
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// `Ok(None)` when no feed URL is configured at all.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Option<Self>> {
        let Some(url) = cfg.get("feed.url") else {
            return Ok(None);
        };
        let timeout = cfg
            .get_u64("feed.timeout")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(anyhow!("feed.timeout must be at least 1 second"));
        }

        Ok(Some(Self {
            url,
            relays: cfg.get_list("feed.relays"),
            timeout: Duration::from_secs(timeout),
        }))
    }
}

/// Fetches the raw iCal text, trying direct URLs first and relays after.
#[tracing::instrument(skip_all, fields(feed = %redact(&source.url), relays = source.relays.len()))]
pub async fn fetch_feed(source: &FeedSource) -> Result<String, FetchError> {
    let trimmed = source.url.trim();
    if trimmed.is_empty() {
        return Err(FetchError::EmptyUrl);
    }

    // the deadline below bounds every candidate together
    let client = Client::builder()
        .build()
        .map_err(FetchError::Client)?;

    let candidates = candidate_urls(trimmed, &source.relays);
    match tokio::time::timeout(source.timeout, try_candidates(&client, &candidates)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout = ?source.timeout, "calendar fetch timed out");
            Err(FetchError::Timeout(source.timeout))
        }
    }
}

async fn try_candidates(client: &Client, candidates: &[Candidate]) -> Result<String, FetchError> {
    let mut last_error = None::<String>;

    for candidate in candidates {
        debug!(candidate = %candidate.label, "requesting calendar");
        let request = client
            .get(candidate.url.as_str())
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::USER_AGENT, USER_AGENT);

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    candidate = %candidate.label,
                    error = %without_url(&error),
                    "failed requesting calendar candidate"
                );
                last_error = Some(format!("{}: {}", candidate.label, without_url(&error)));
                continue;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(
                candidate = %candidate.label,
                status = %status,
                "calendar candidate returned non-success status"
            );
            last_error = Some(format!("{} returned HTTP {status}", candidate.label));
            continue;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                warn!(
                    candidate = %candidate.label,
                    error = %without_url(&error),
                    "failed reading calendar response body"
                );
                last_error = Some(format!(
                    "{}: failed reading body: {}",
                    candidate.label,
                    without_url(&error)
                ));
                continue;
            }
        };

        if !looks_like_calendar(&body) {
            warn!(
                candidate = %candidate.label,
                bytes = body.len(),
                "calendar candidate answered with something that is not iCalendar"
            );
            last_error = Some(format!("{} did not return iCalendar data", candidate.label));
            continue;
        }

        info!(candidate = %candidate.label, bytes = body.len(), "fetched calendar feed");
        return Ok(body);
    }

    Err(FetchError::Exhausted {
        attempts: candidates.len(),
        last: last_error.unwrap_or_else(|| "no candidates".to_string()),
    })
}

fn candidate_urls(location: &str, relays: &[String]) -> Vec<Candidate> {
    let direct = normalized_calendar_locations(location);

    let mut out: Vec<Candidate> = direct
        .iter()
        .map(|url| Candidate {
            label: format!("direct {}", redact(url)),
            url: url.clone(),
        })
        .collect();

    // relays only ever see the first (preferred) normalized URL
    if let Some(target) = direct.first() {
        for relay in relays {
            out.push(Candidate {
                label: format!("relay {}", redact(relay)),
                url: relay_url(relay, target),
            });
        }
    }

    out
}

fn normalized_calendar_locations(location: &str) -> Vec<String> {
    let trimmed = location.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower.starts_with("webcal://") {
        let remainder = &trimmed["webcal://".len()..];
        let https = format!("https://{remainder}");
        let http = format!("http://{remainder}");
        debug!("rewrote webcal calendar URL to https with http fallback");
        return vec![https, http];
    }

    if lower.starts_with("webcals://") {
        let remainder = &trimmed["webcals://".len()..];
        debug!("rewrote webcals calendar URL to https");
        return vec![format!("https://{remainder}")];
    }

    vec![trimmed.to_string()]
}

fn relay_url(relay: &str, target: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    if relay.contains("{url}") {
        relay.replace("{url}", &encoded)
    } else {
        format!("{relay}{encoded}")
    }
}

/// Scheme and host only. Private feed URLs embed their secret in the path.
pub fn redact(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => match parsed.port() {
                Some(port) => format!("{}://{host}:{port}/…", parsed.scheme()),
                None => format!("{}://{host}/…", parsed.scheme()),
            },
            None => format!("{}:…", parsed.scheme()),
        },
        Err(_) => "<invalid url>".to_string(),
    }
}

fn without_url(error: &reqwest::Error) -> String {
    // reqwest's Display embeds the full URL
    let mut message = error.to_string();
    if let Some(url) = error.url() {
        message = message.replace(url.as_str(), &redact(url.as_str()));
    }
    message
}
