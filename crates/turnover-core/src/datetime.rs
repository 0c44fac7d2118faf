use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "turnover-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "TURNOVER_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "TURNOVER_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "America/New_York";

pub const DATE_KEY_FORMAT: &str =
  "%Y-%m-%d";

/// `timezone = ".."` at the top level
/// or under a `[time]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeFile {
  timezone: Option<String>,
  time:     TimeTable
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeTable {
  timezone: Option<String>
}

/// Where the project timezone was read
/// from, for log fields.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TimezoneSource {
  Env,
  File(PathBuf),
  Config,
  Fallback
}

/// The timezone and calendar day every
/// day-relative computation is
/// evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
  pub timezone: Tz,
  pub today:    NaiveDate
}

impl Clock {
  pub fn system(timezone: Tz) -> Self {
    Self {
      timezone,
      today: Utc::now()
        .with_timezone(&timezone)
        .date_naive()
    }
  }

  pub fn fixed(
    timezone: Tz,
    today: NaiveDate
  ) -> Self {
    Self { timezone, today }
  }

  #[must_use]
  pub fn tomorrow(&self) -> NaiveDate {
    add_days(self.today, 1)
  }

  #[must_use]
  pub fn is_today(
    &self,
    day: NaiveDate
  ) -> bool {
    is_same_day(day, self.today)
  }

  #[must_use]
  pub fn is_tomorrow(
    &self,
    day: NaiveDate
  ) -> bool {
    is_same_day(day, self.tomorrow())
  }
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(|| {
    let env_value =
      std::env::var(TIMEZONE_ENV_VAR)
        .ok();
    let from_env =
      env_value.as_deref().and_then(
        |raw| {
          parse_timezone(
            raw,
            &TimezoneSource::Env
          )
        }
      );
    from_env
      .or_else(timezone_from_file)
      .unwrap_or_else(fallback_timezone)
  })
}

/// Picks `explicit` when it names a
/// valid zone, otherwise the project
/// timezone.
pub fn resolve_timezone(
  explicit: Option<&str>
) -> Tz {
  explicit
    .and_then(|raw| {
      parse_timezone(
        raw,
        &TimezoneSource::Config
      )
    })
    .unwrap_or(*project_timezone())
}

fn fallback_timezone() -> Tz {
  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    &TimezoneSource::Fallback
  )
  .unwrap_or(chrono_tz::UTC)
}

fn timezone_from_file() -> Option<Tz> {
  let path = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  )
  .ok()
  .map(|raw| raw.trim().to_string())
  .filter(|raw| !raw.is_empty())
  .map(PathBuf::from)
  .or_else(|| {
    std::env::current_dir()
      .ok()
      .map(|dir| {
        dir.join(TIMEZONE_CONFIG_FILE)
      })
  })?;

  if !path.is_file() {
    tracing::debug!(file = %path.display(), "no timezone file");
    return None;
  }

  let name = fs::read_to_string(&path)
    .with_context(|| {
      format!(
        "failed reading {}",
        path.display()
      )
    })
    .and_then(|text| {
      timezone_name_from_toml(&text)
    });
  match name {
    | Ok(Some(name)) => parse_timezone(
      &name,
      &TimezoneSource::File(path)
    ),
    | Ok(None) => {
      tracing::warn!(file = %path.display(), "timezone file names no timezone");
      None
    }
    | Err(err) => {
      tracing::error!(file = %path.display(), error = %format!("{err:#}"), "ignoring timezone file");
      None
    }
  }
}

fn timezone_name_from_toml(
  text: &str
) -> anyhow::Result<Option<String>> {
  let file: TimeFile =
    toml::from_str(text)
      .context("invalid timezone toml")?;
  Ok(file.timezone.or(file.time.timezone))
}

fn parse_timezone(
  raw: &str,
  source: &TimezoneSource
) -> Option<Tz> {
  let name = raw.trim();
  if name.is_empty() {
    tracing::warn!(?source, "empty timezone value");
    return None;
  }

  name
    .parse::<Tz>()
    .inspect(|_| {
      tracing::debug!(?source, timezone = name, "using timezone");
    })
    .map_err(|err| {
      tracing::error!(?source, timezone = name, error = %err, "unknown timezone id");
    })
    .ok()
}

/// Strips the time of day: the calendar
/// day `dt` falls on in its own zone.
#[must_use]
pub fn normalize(
  dt: DateTime<Tz>
) -> NaiveDate {
  dt.date_naive()
}

#[must_use]
pub fn normalize_utc(
  dt: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  normalize(dt.with_timezone(tz))
}

#[must_use]
pub fn is_same_day(
  a: NaiveDate,
  b: NaiveDate
) -> bool {
  a == b
}

fn local_to_utc(
  local_naive: NaiveDateTime,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  match tz.from_local_datetime(
    &local_naive
  ) {
    | LocalResult::Single(local_dt) => {
      Some(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Some(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      // DST gap: the wall clock skips
      // ahead, so does the timestamp.
      tz.from_local_datetime(
        &(local_naive
          + Duration::hours(1))
      )
      .earliest()
      .map(|dt| dt.with_timezone(&Utc))
    }
  }
}

/// Parses the timestamp shapes the
/// backend emits. Values without an
/// offset are read as wall time in
/// `tz`. Returns `None` for anything
/// unparseable.
pub fn parse_timestamp(
  raw: &str,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  let token = raw.trim();
  if token.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return local_to_utc(ndt, tz);
    }
  }

  let date = NaiveDate::parse_from_str(
    token,
    DATE_KEY_FORMAT
  )
  .ok()?;
  local_to_utc(
    date.and_hms_opt(0, 0, 0)?,
    tz
  )
}

#[must_use]
pub fn format_date_key(
  date: NaiveDate
) -> String {
  date
    .format(DATE_KEY_FORMAT)
    .to_string()
}

pub fn parse_date_key(
  key: &str
) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(
    key.trim(),
    DATE_KEY_FORMAT
  )
  .ok()
}

#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

#[must_use]
pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

#[must_use]
pub fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

#[must_use]
pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

/// Column of `date` in a calendar grid
/// whose weeks start on Sunday.
#[must_use]
pub fn weekday_index(
  date: NaiveDate
) -> u32 {
  date
    .weekday()
    .num_days_from_sunday()
}

#[must_use]
pub fn month_name(
  month: u32
) -> &'static str {
  match month {
    | 1 => "January",
    | 2 => "February",
    | 3 => "March",
    | 4 => "April",
    | 5 => "May",
    | 6 => "June",
    | 7 => "July",
    | 8 => "August",
    | 9 => "September",
    | 10 => "October",
    | 11 => "November",
    | 12 => "December",
    | _ => ""
  }
}

/// Resolves a user-supplied day
/// expression relative to `clock`.
#[tracing::instrument(skip(clock), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  clock: &Clock
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(clock.today),
    | "tomorrow" => {
      return Ok(clock.tomorrow());
    }
    | "yesterday" => {
      return Ok(add_days(
        clock.today,
        -1
      ));
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      clock.today,
      target_weekday
    ));
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let days = match unit {
      | "d" => num,
      | "w" => num.saturating_mul(7),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };

    return Ok(add_days(
      clock.today,
      if sign == "-" {
        -days
      } else {
        days
      }
    ));
  }

  if let Some(date) =
    parse_date_key(token)
  {
    return Ok(date);
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(normalize_utc(
      dt.with_timezone(&Utc),
      &clock.timezone
    ));
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, \
     weekday names (e.g. friday), \
     +Nd/-Nd/+Nw/-Nw, YYYY-MM-DD, \
     RFC3339"
  })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::*;

  fn day(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn clock() -> Clock {
    Clock::fixed(
      chrono_tz::UTC,
      day(2025, 1, 15)
    )
  }

  #[test]
  fn normalize_uses_local_day() {
    let late_evening_utc = Utc
      .with_ymd_and_hms(
        2025, 1, 15, 3, 30, 0
      )
      .single()
      .expect("valid instant");
    assert_eq!(
      normalize_utc(
        late_evening_utc,
        &chrono_tz::America::New_York
      ),
      day(2025, 1, 14)
    );
    assert_eq!(
      normalize_utc(
        late_evening_utc,
        &chrono_tz::UTC
      ),
      day(2025, 1, 15)
    );
  }

  #[test]
  fn parses_backend_timestamps() {
    let tz = chrono_tz::UTC;
    for raw in [
      "2025-01-15T10:00:00.000Z",
      "2025-01-15T10:00:00+00:00",
      "2025-01-15T10:00:00",
      "2025-01-15 10:00",
      "2025-01-15"
    ] {
      let parsed =
        parse_timestamp(raw, &tz)
          .expect("parse timestamp");
      assert_eq!(
        normalize_utc(parsed, &tz),
        day(2025, 1, 15),
        "{raw}"
      );
    }
  }

  #[test]
  fn rejects_garbage_without_panicking()
  {
    let tz = chrono_tz::UTC;
    assert!(
      parse_timestamp("", &tz)
        .is_none()
    );
    assert!(
      parse_timestamp(
        "2025-13-45",
        &tz
      )
      .is_none()
    );
    assert!(
      parse_timestamp(
        "Invalid Date",
        &tz
      )
      .is_none()
    );
  }

  #[test]
  fn month_lengths() {
    assert_eq!(days_in_month(2025, 1), 31);
    assert_eq!(days_in_month(2025, 2), 28);
    assert_eq!(days_in_month(2024, 2), 29);
    assert_eq!(days_in_month(2025, 4), 30);
    assert_eq!(
      days_in_month(2025, 12),
      31
    );
  }

  #[test]
  fn weekday_index_starts_sunday() {
    assert_eq!(
      weekday_index(day(2025, 1, 1)),
      3
    );
    assert_eq!(
      weekday_index(day(2025, 6, 1)),
      0
    );
  }

  #[test]
  fn date_keys() {
    assert_eq!(
      format_date_key(day(2025, 3, 7)),
      "2025-03-07"
    );
    assert_eq!(
      parse_date_key(" 2025-03-07 "),
      Some(day(2025, 3, 7))
    );
    assert_eq!(
      parse_date_key("03/07/2025"),
      None
    );
  }

  #[test]
  fn parses_date_expressions() {
    let clock = clock();
    let cases = [
      ("today", day(2025, 1, 15)),
      ("Tomorrow", day(2025, 1, 16)),
      ("yesterday", day(2025, 1, 14)),
      ("friday", day(2025, 1, 17)),
      ("wed", day(2025, 1, 22)),
      ("+3d", day(2025, 1, 18)),
      ("-1w", day(2025, 1, 8)),
      ("2025-02-01", day(2025, 2, 1))
    ];
    for (input, expected) in cases {
      assert_eq!(
        parse_date_expr(input, &clock)
          .expect("parse expr"),
        expected,
        "{input}"
      );
    }
    assert!(
      parse_date_expr(
        "someday", &clock
      )
      .is_err()
    );
  }

  #[test]
  fn timezone_toml_shapes() {
    assert_eq!(
      timezone_name_from_toml(
        "timezone = \"Europe/Lisbon\""
      )
      .expect("top level"),
      Some("Europe/Lisbon".to_string())
    );
    assert_eq!(
      timezone_name_from_toml(
        "[time]\ntimezone = \"Asia/Tokyo\""
      )
      .expect("time table"),
      Some("Asia/Tokyo".to_string())
    );
    assert_eq!(
      timezone_name_from_toml("")
        .expect("empty file"),
      None
    );
    assert!(
      timezone_name_from_toml(
        "timezone = ["
      )
      .is_err()
    );
  }

  #[test]
  fn explicit_timezone_wins_when_valid()
  {
    assert_eq!(
      resolve_timezone(Some(
        " Europe/Berlin "
      )),
      chrono_tz::Europe::Berlin
    );
    assert_eq!(
      resolve_timezone(Some(
        "Mars/Olympus"
      )),
      *project_timezone()
    );
  }
}
