use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

const RC_ENV_VAR: &str = "TURNOVERRC";
const RC_FILE_NAME: &str = ".turnoverrc";
const DATA_DIR_NAME: &str = ".turnover";
const MAX_INCLUDE_DEPTH: usize = 8;

const DEFAULTS: [(&str, &str); 4] = [
  ("data.location", "~/.turnover"),
  (
    "api.base_url",
    "http://localhost:3000/api"
  ),
  ("color", "on"),
  ("timeline.mode", "upcoming")
];

/// Where a setting's current value came
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
  Default,
  File(PathBuf),
  Override
}

#[derive(Debug, Clone)]
struct Setting {
  value:  String,
  origin: Origin
}

/// How the rc file was located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RcSource {
  Flag(PathBuf),
  Env(PathBuf),
  Home(PathBuf),
  Disabled,
  NotFound
}

impl RcSource {
  pub fn path(&self) -> Option<&Path> {
    match self {
      | RcSource::Flag(path)
      | RcSource::Env(path)
      | RcSource::Home(path) => {
        Some(path.as_path())
      }
      | RcSource::Disabled
      | RcSource::NotFound => None
    }
  }
}

#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Setting {
    key:   &'a str,
    value: &'a str
  }
}

/// Flat `key = value` settings layered
/// as defaults, rc files, then
/// overrides.
#[derive(Debug, Clone)]
pub struct Config {
  settings:         BTreeMap<
    String,
    Setting
  >,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  pub fn defaults() -> Self {
    let settings = DEFAULTS
      .iter()
      .map(|(key, value)| {
        (key.to_string(), Setting {
          value:  value.to_string(),
          origin: Origin::Default
        })
      })
      .collect();

    Config {
      settings,
      loaded_files: Vec::new()
    }
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::defaults();

    let source =
      locate_rc(rc_override);
    match source.path() {
      | Some(path) => {
        info!(rc = %path.display(), ?source, "loading turnoverrc");
        cfg.load_file(path, 0)?;
      }
      | None => {
        debug!(
          ?source,
          "no turnoverrc loaded; using \
           defaults"
        );
      }
    }

    Ok(cfg)
  }

  /// `rc.`-prefixed keys from the
  /// command line land here with the
  /// prefix removed.
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
    for (raw_key, value) in overrides {
      let key = raw_key
        .strip_prefix("rc.")
        .unwrap_or(&raw_key)
        .trim()
        .to_string();
      debug!(key = %key, value = %value, "applying override");
      self.settings.insert(key, Setting {
        value,
        origin: Origin::Override
      });
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self
      .settings
      .get(key)
      .map(|s| s.value.clone())
  }

  pub fn origin(
    &self,
    key: &str
  ) -> Option<&Origin> {
    self
      .settings
      .get(key)
      .map(|s| &s.origin)
  }

  /// Unrecognized values are an error
  /// rather than silently false.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    let Some(setting) =
      self.settings.get(key)
    else {
      return Ok(None);
    };
    parse_bool(&setting.value)
      .map(Some)
      .ok_or_else(|| {
        anyhow!(
          "invalid boolean for {key}: \
           {}",
          setting.value
        )
      })
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    let Some(setting) =
      self.settings.get(key)
    else {
      return Ok(None);
    };
    setting
      .value
      .trim()
      .parse::<u64>()
      .map(Some)
      .with_context(|| {
        format!(
          "invalid {key}: {}",
          setting.value
        )
      })
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path,
    depth: usize
  ) -> anyhow::Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
      bail!(
        "includes nested deeper than \
         {MAX_INCLUDE_DEPTH} at {}",
        path.display()
      );
    }

    let path = expand_tilde(path);
    if self.loaded_files.contains(&path)
    {
      warn!(file = %path.display(), "rc file already loaded; skipping");
      return Ok(());
    }

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
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let line_no = idx + 1;
      let parsed = parse_line(raw_line)
        .map_err(|reason| {
          anyhow!(
            "{}:{line_no}: {reason}",
            path.display()
          )
        })?;

      match parsed {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let include =
            resolve_include_path(
              &base_dir, target
            );
          if include.exists() {
            debug!(
              file = %path.display(),
              include = %include.display(),
              line = line_no,
              "processing include"
            );
            self.load_file(
              &include,
              depth + 1
            )?;
          } else {
            warn!(include = %include.display(), "include file does not exist; skipping");
          }
        }
        | RcLine::Setting {
          key,
          value
        } => {
          trace!(key, value, "loaded config key");
          self.settings.insert(
            key.to_string(),
            Setting {
              value:  value.to_string(),
              origin: Origin::File(
                path.clone()
              )
            }
          );
        }
      }
    }

    Ok(())
  }
}

/// Values may be `#rrggbb`, so only a
/// leading `#` or a ` # ` starts a
/// comment.
fn parse_line(
  raw: &str
) -> Result<RcLine<'_>, String> {
  let mut line = raw.trim();
  if line.starts_with('#') {
    return Ok(RcLine::Blank);
  }
  if let Some((before, _)) =
    line.split_once(" # ")
  {
    line = before.trim();
  }
  if line.is_empty() {
    return Ok(RcLine::Blank);
  }

  if let Some(rest) =
    line.strip_prefix("include ")
  {
    let target = rest.trim();
    if target.is_empty() {
      return Err(
        "include path cannot be empty"
          .to_string()
      );
    }
    return Ok(RcLine::Include(target));
  }

  let (key, value) = line
    .split_once('=')
    .ok_or_else(|| {
      format!(
        "expected key = value, got: \
         {raw}"
      )
    })?;
  let key = key.trim();
  if key.is_empty() {
    return Err(format!(
      "missing key before '=': {raw}"
    ));
  }
  Ok(RcLine::Setting {
    key,
    value: value.trim()
  })
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match (
    override_dir,
    cfg.get("data.location")
  ) {
    | (Some(path), _) => {
      path.to_path_buf()
    }
    | (None, Some(location)) => {
      expand_tilde(Path::new(&location))
    }
    | (None, None) => dirs::home_dir()
      .map(|home| {
        home.join(DATA_DIR_NAME)
      })
      .ok_or_else(|| {
        anyhow!(
          "cannot determine home \
           directory"
        )
      })?
  };

  if !dir.is_dir() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

fn locate_rc(
  flag: Option<&Path>
) -> RcSource {
  if let Some(path) = flag {
    return RcSource::Flag(
      path.to_path_buf()
    );
  }

  match std::env::var(RC_ENV_VAR) {
    | Ok(value)
      if value == "/dev/null" =>
    {
      return RcSource::Disabled;
    }
    | Ok(value)
      if !value.trim().is_empty() =>
    {
      return RcSource::Env(
        PathBuf::from(value)
      );
    }
    | _ => {}
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       turnoverrc"
    );
    return RcSource::NotFound;
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.is_file() {
    RcSource::Home(candidate)
  } else {
    RcSource::NotFound
  }
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> PathBuf {
  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    expanded
  } else {
    base_dir.join(expanded)
  }
}

fn expand_tilde(
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

fn parse_bool(
  raw: &str
) -> Option<bool> {
  match raw
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
  use std::fs;

  use tempfile::tempdir;

  use super::*;

  #[test]
  fn loads_file_with_include_and_comments()
  {
    let dir =
      tempdir().expect("tempdir");
    let extra = dir.path().join("colors.rc");
    fs::write(
      &extra,
      "indicator.color.today = #112233\n"
    )
    .expect("write include");

    let rc = dir.path().join("main.rc");
    fs::write(
      &rc,
      "# field ops\n\
       api.base_url = https://ops.example.com/api # prod\n\
       include colors.rc\n\
       include missing.rc\n\
       color = off\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(
      cfg.get("api.base_url").as_deref(),
      Some("https://ops.example.com/api")
    );
    assert_eq!(
      cfg
        .get("indicator.color.today")
        .as_deref(),
      Some("#112233")
    );
    assert_eq!(
      cfg.get_bool("color").expect("bool"),
      Some(false)
    );
    assert_eq!(
      cfg.origin("color"),
      Some(&Origin::File(rc.clone()))
    );
    assert_eq!(
      cfg.origin("timeline.mode"),
      Some(&Origin::Default)
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn self_include_is_loaded_once() {
    let dir =
      tempdir().expect("tempdir");
    let rc = dir.path().join("loop.rc");
    fs::write(
      &rc,
      "include loop.rc\ncolor = off\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(cfg.loaded_files.len(), 1);
    assert_eq!(
      cfg.get("color").as_deref(),
      Some("off")
    );
  }

  #[test]
  fn rejects_malformed_lines() {
    let dir =
      tempdir().expect("tempdir");
    let rc = dir.path().join("bad.rc");
    fs::write(&rc, "just words\n")
      .expect("write rc");
    let err = Config::load(Some(&rc))
      .expect_err("bad line");
    assert!(
      format!("{err:#}")
        .contains("bad.rc:1")
    );

    assert!(parse_line("= x").is_err());
    assert!(
      parse_line("include   ").is_err()
    );
    assert_eq!(
      parse_line("   # note"),
      Ok(RcLine::Blank)
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides(vec![(
      "rc.color".to_string(),
      "off".to_string()
    )]);
    assert_eq!(
      cfg.get_bool("color").expect("bool"),
      Some(false)
    );
    assert_eq!(
      cfg.origin("color"),
      Some(&Origin::Override)
    );
  }

  #[test]
  fn typed_getters_reject_garbage() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides(vec![
      (
        "color".to_string(),
        "sometimes".to_string()
      ),
      (
        "api.timeout_secs".to_string(),
        "12".to_string()
      ),
    ]);
    assert!(cfg.get_bool("color").is_err());
    assert_eq!(
      cfg
        .get_u64("api.timeout_secs")
        .expect("u64"),
      Some(12)
    );
    assert_eq!(
      cfg.get_u64("api.missing").expect("u64"),
      None
    );
  }

  #[test]
  fn data_dir_override_is_created() {
    let dir =
      tempdir().expect("tempdir");
    let target =
      dir.path().join("nested/state");
    let resolved = resolve_data_dir(
      &Config::defaults(),
      Some(&target)
    )
    .expect("resolve data dir");
    assert_eq!(resolved, target);
    assert!(target.is_dir());
  }
}
