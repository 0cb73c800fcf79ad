use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

const RC_ENV_VAR: &str = "AVAILCALRC";
const RC_FILE_NAME: &str = ".availcalrc";
/// Name the nightly snapshot job has
/// always read the feed URL from.
pub const FEED_URL_ENV_VAR: &str =
  "ICAL_SECRET_URL";

const DEFAULTS: &[(&str, &str)] = &[
  ("feed.relays", ""),
  ("feed.timeout", "15"),
  ("snapshot.path", "data.json"),
  ("snapshot.on_fetch_error", "keep"),
  ("render.weekdays", "fri,sat"),
  ("render.days", "90"),
  ("color", "on")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading availcalrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no availcalrc found; using \
         defaults"
      );
    }

    if cfg.get("feed.url").is_none()
      && let Ok(url) =
        std::env::var(FEED_URL_ENV_VAR)
      && !url.trim().is_empty()
    {
      debug!(
        env = FEED_URL_ENV_VAR,
        "feed.url taken from environment"
      );
      cfg.map.insert(
        "feed.url".to_string(),
        url.trim().to_string()
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      // the feed URL is a secret; keep
      // it out of the logs
      if k == "feed.url" {
        debug!(key = %k, "applying override");
      } else {
        debug!(key = %k, value = %v, "applying override");
      }
      self.map.insert(k, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .map
      .get(key)
      .filter(|v| !v.trim().is_empty())
      .cloned()
  }

  /// Unknown spellings are an error
  /// rather than a silent `false`.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    let Some(raw) = self.get(key) else {
      return Ok(None);
    };
    parse_bool(&raw)
      .map(Some)
      .ok_or_else(|| {
        anyhow!(
          "config key {key} must be on or \
           off, got: {raw}"
        )
      })
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    let Some(raw) = self.get(key) else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<u64>()
      .map(Some)
      .with_context(|| {
        format!(
          "config key {key} must be a \
           non-negative integer, got: \
           {raw}"
        )
      })
  }

  /// Comma-separated list with blank
  /// entries dropped.
  pub fn get_list(
    &self,
    key: &str
  ) -> Vec<String> {
    self
      .get(key)
      .map(|raw| {
        raw
          .split(',')
          .map(str::trim)
          .filter(|item| {
            !item.is_empty()
          })
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if self
          .loaded_files
          .contains(&include_path)
        {
          warn!(include = %include_path.display(), "include cycle; skipping");
        } else if include_path.exists()
        {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      // URLs carry '#' fragments, so
      // comments are only stripped when
      // they follow whitespace
      let value = match v.find(" #") {
        | Some(idx) => &v[..idx],
        | None => v
      }
      .trim()
      .to_string();
      trace!(key = %key, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       availcalrc lookup"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

pub fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn defaults_are_present() {
    let cfg = Config::default();
    assert_eq!(
      cfg.get("snapshot.path").as_deref(),
      Some("data.json")
    );
    assert_eq!(
      cfg
        .get_u64("feed.timeout")
        .expect("timeout"),
      Some(15)
    );
    assert_eq!(
      cfg.get_list("render.weekdays"),
      vec!["fri", "sat"]
    );
    assert!(cfg.get_list("feed.relays").is_empty());
    assert_eq!(
      cfg.get_bool("color").expect("color"),
      Some(true)
    );
  }

  #[test]
  fn loads_file_with_includes_and_comments()
  {
    let temp = tempdir().expect("tempdir");
    let extra = temp.path().join("extra.rc");
    fs::write(
      &extra,
      "render.days = 30\n"
    )
    .expect("write include");

    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# availability\n\
       feed.url = https://example.com/cal.ics#frag # secret\n\
       include extra.rc\n\
       include missing.rc\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(rc.as_path()))
      .expect("load config");
    assert_eq!(
      cfg.get("feed.url").as_deref(),
      Some(
        "https://example.com/cal.ics#frag"
      )
    );
    assert_eq!(
      cfg
        .get_u64("render.days")
        .expect("days"),
      Some(30)
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn overrides_win_and_bad_numbers_fail()
  {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "feed.timeout".to_string(),
      "soon".to_string()
    )]);
    assert!(
      cfg.get_u64("feed.timeout").is_err()
    );

    cfg.apply_overrides([(
      "feed.relays".to_string(),
      " https://a.example/?u= , ,https://b.example/{url}".to_string()
    )]);
    assert_eq!(
      cfg.get_list("feed.relays"),
      vec![
        "https://a.example/?u=",
        "https://b.example/{url}"
      ]
    );
  }

  #[test]
  fn bools_are_strict() {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "color".to_string(),
      " Off ".to_string()
    )]);
    assert_eq!(
      cfg.get_bool("color").expect("off"),
      Some(false)
    );

    cfg.apply_overrides([(
      "color".to_string(),
      "nope".to_string()
    )]);
    assert!(cfg.get_bool("color").is_err());
    assert_eq!(
      cfg.get_bool("missing").expect("unset"),
      None
    );
  }

  #[test]
  fn rejects_lines_without_equals() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "feed.url\n")
      .expect("write rc");
    assert!(Config::load(Some(rc.as_path())).is_err());
  }
}
