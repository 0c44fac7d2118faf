use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

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
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "turnover",
    version,
    about = "Turnover: calendar and timeline views over field-ops cleaning tasks"
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Seven-day strip centred on the focus day
    Week(ViewArgs),
    /// Month grid with per-day task markers
    Month(ViewArgs),
    /// Tasks grouped by day
    Timeline(TimelineArgs),
    /// Show the marker a day with COUNT tasks gets
    Indicator {
        count: usize,

        #[arg(long)]
        today: bool,
    },
    /// Remember a day as the focus for later views
    Select {
        #[arg(allow_hyphen_values = true)]
        date: String,
    },
    /// Fetch one day's task list from the API
    Fetch(FetchArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ViewArgs {
    /// Focus day: today, tomorrow, friday, +3d, -1w, 2025-01-15, ...
    #[arg(long, allow_hyphen_values = true)]
    pub date: Option<String>,

    /// Read tasks from a JSON file instead of the API
    #[arg(long)]
    pub tasks: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TimelineArgs {
    /// upcoming, date or today
    #[arg(long)]
    pub mode: Option<String>,

    #[command(flatten)]
    pub view: ViewArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FetchArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub date: Option<String>,

    /// Use the pending list instead of accepted tasks
    #[arg(long)]
    pub pending: bool,

    /// Status filter for the pending list
    #[arg(long, requires = "pending")]
    pub status: Option<String>,

    #[arg(long)]
    pub json: bool,
}

/// `-q` beats `-v`; `RUST_LOG` beats both.
fn default_log_level(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) | (0, 0) => "warn",
        (0, 1) => "info",
        (0, 2) => "debug",
        (0, _) => "trace",
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let level = default_log_level(verbose, quiet);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| anyhow!("invalid log filter {level}: {e}"))?,
    };

    let stderr_is_tty = std::io::stderr().is_terminal();
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(stderr_is_tty)
        .try_init()
    {
        debug!(error = %err, "tracing already initialised");
    }
    Ok(())
}

/// `rc.key=value` or `rc.key:value`.
fn split_rc_token(token: &str) -> Option<(String, String)> {
    let rest = token.strip_prefix("rc.")?;
    let (key, value) = rest.split_once('=').or_else(|| rest.split_once(':'))?;
    Some((format!("rc.{key}"), value.to_string()))
}

/// Pulls bare rc tokens out of the argument list so they can sit anywhere on
/// the command line.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let (program, rest) = match raw.split_first() {
        Some((program, rest)) => (Some(program), rest),
        None => (None, raw),
    };

    let mut pre = PreprocessedArgs {
        cleaned_args: program.cloned().into_iter().collect(),
        rc_overrides: Vec::new(),
    };
    for arg in rest {
        match split_rc_token(&arg.to_string_lossy()) {
            Some((key, value)) => {
                debug!(key = %key, value = %value, "rc override from argv");
                pre.rc_overrides.push((key, value));
            }
            None => pre.cleaned_args.push(arg.clone()),
        }
    }
    Ok(pre)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&[
            "turnover",
            "rc.color=off",
            "week",
            "rc.api.base_url:http://x",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, args(&["turnover", "week"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.api.base_url".to_string(), "http://x".to_string()),
            ]
        );
    }

    #[test]
    fn parses_subcommands_and_globals() {
        let cli = GlobalCli::parse_from(args(&[
            "turnover",
            "timeline",
            "--mode",
            "today",
            "--tasks",
            "tasks.json",
            "-vv",
            "--rc",
            "color=off",
        ]));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides.len(), 1);
        let Command::Timeline(timeline) = cli.command else {
            panic!("expected timeline command");
        };
        assert_eq!(timeline.mode.as_deref(), Some("today"));
        assert_eq!(timeline.view.tasks, Some(PathBuf::from("tasks.json")));
    }

    #[test]
    fn negative_relative_dates_parse_as_values() {
        let cli = GlobalCli::try_parse_from(args(&["turnover", "week", "--date", "-1w"]))
            .expect("week with negative offset");
        let Command::Week(view) = cli.command else {
            panic!("expected week command");
        };
        assert_eq!(view.date.as_deref(), Some("-1w"));

        let cli = GlobalCli::try_parse_from(args(&["turnover", "select", "-3d"]))
            .expect("select with negative offset");
        let Command::Select { date } = cli.command else {
            panic!("expected select command");
        };
        assert_eq!(date, "-3d");

        let cli = GlobalCli::try_parse_from(args(&["turnover", "fetch", "--date", "-2d", "--pending"]))
            .expect("fetch with negative offset");
        let Command::Fetch(fetch) = cli.command else {
            panic!("expected fetch command");
        };
        assert_eq!(fetch.date.as_deref(), Some("-2d"));
        assert!(fetch.pending);
    }

    #[test]
    fn log_level_from_flags() {
        assert_eq!(default_log_level(0, 0), "warn");
        assert_eq!(default_log_level(1, 0), "info");
        assert_eq!(default_log_level(2, 0), "debug");
        assert_eq!(default_log_level(5, 0), "trace");
        assert_eq!(default_log_level(3, 1), "warn");
        assert_eq!(default_log_level(0, 2), "error");
    }

    #[test]
    fn rc_tokens_need_a_separator() {
        assert_eq!(split_rc_token("rc.color"), None);
        assert_eq!(split_rc_token("color=off"), None);
        assert_eq!(
            split_rc_token("rc.api.base_url=http://h:1/api"),
            Some(("rc.api.base_url".to_string(), "http://h:1/api".to_string()))
        );
    }

    #[test]
    fn keyval_requires_equals() {
        assert!("color".parse::<KeyVal>().is_err());
        let kv = "color = off".parse::<KeyVal>().expect("parse keyval");
        assert_eq!(kv.key, "color");
        assert_eq!(kv.value, "off");
    }
}
