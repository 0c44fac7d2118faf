use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{Datelike, NaiveDate};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate_month, aggregate_week};
use crate::api::{ApiSettings, HttpTaskFetcher};
use crate::cache::merge_into_flat_list;
use crate::cli::{Command, FetchArgs, TimelineArgs, ViewArgs};
use crate::config::Config;
use crate::datastore::{KeyValueStore, load_selected_date, save_selected_date};
use crate::datetime::{self, Clock, parse_date_expr};
use crate::indicator::IndicatorPalette;
use crate::loader::{CachedTaskLoader, TaskFetcher, TaskQuery};
use crate::render::Renderer;
use crate::task::{Task, TaskStatus, tasks_from_json};
use crate::timeline::{ViewMode, filter_by_view_mode, group};

/// Days either side of the focus day fetched for a timeline.
const TIMELINE_FETCH_DAYS: i64 = 6;

pub struct CommandContext<'a> {
    pub cfg: &'a Config,
    pub store: &'a dyn KeyValueStore,
    pub renderer: &'a Renderer,
    pub clock: Clock,
}

#[tracing::instrument(skip_all)]
pub fn dispatch(ctx: &CommandContext<'_>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Week(args) => cmd_week(ctx, &args),
        Command::Month(args) => cmd_month(ctx, &args),
        Command::Timeline(args) => cmd_timeline(ctx, &args),
        Command::Indicator { count, today } => {
            let palette = IndicatorPalette::from_config(ctx.cfg);
            ctx.renderer
                .print_indicator(count, &palette.classify(count, today))
        }
        Command::Select { date } => cmd_select(ctx, &date),
        Command::Fetch(args) => cmd_fetch(ctx, &args),
    }
}

/// The explicit `--date`, else the persisted selection, else today.
fn resolve_focus(ctx: &CommandContext<'_>, expr: Option<&str>) -> anyhow::Result<NaiveDate> {
    if let Some(expr) = expr {
        return parse_date_expr(expr, &ctx.clock);
    }
    match load_selected_date(ctx.store) {
        Ok(Some(date)) => {
            debug!(date = %date, "using persisted selected date");
            Ok(date)
        }
        Ok(None) => Ok(ctx.clock.today),
        Err(err) => {
            warn!(error = %err, "could not read selected date; using today");
            Ok(ctx.clock.today)
        }
    }
}

fn cmd_week(ctx: &CommandContext<'_>, args: &ViewArgs) -> anyhow::Result<()> {
    let focus = resolve_focus(ctx, args.date.as_deref())?;
    let window: Vec<NaiveDate> = (-3..=3).map(|offset| datetime::add_days(focus, offset)).collect();
    let tasks = load_tasks(ctx, args.tasks.as_deref(), &window)?;

    let palette = IndicatorPalette::from_config(ctx.cfg);
    let week = aggregate_week(focus, &tasks, &ctx.clock, &palette);
    if args.json {
        return print_json(&week.days);
    }
    ctx.renderer.print_week(&week)
}

fn cmd_month(ctx: &CommandContext<'_>, args: &ViewArgs) -> anyhow::Result<()> {
    let focus = resolve_focus(ctx, args.date.as_deref())?;
    let first = datetime::first_day_of_month(focus.year(), focus.month());
    let window: Vec<NaiveDate> = (0..datetime::days_in_month(focus.year(), focus.month()))
        .map(|offset| datetime::add_days(first, i64::from(offset)))
        .collect();
    let tasks = load_tasks(ctx, args.tasks.as_deref(), &window)?;

    let palette = IndicatorPalette::from_config(ctx.cfg);
    let month = aggregate_month(focus, &tasks, &ctx.clock, &palette);
    if args.json {
        return print_json(&month.days);
    }
    ctx.renderer.print_month(&month)
}

fn cmd_timeline(ctx: &CommandContext<'_>, args: &TimelineArgs) -> anyhow::Result<()> {
    let focus = resolve_focus(ctx, args.view.date.as_deref())?;
    let mode_key = args
        .mode
        .clone()
        .or_else(|| ctx.cfg.get("timeline.mode"))
        .unwrap_or_else(|| "upcoming".to_string());
    let mode = ViewMode::from_key(&mode_key, Some(focus))
        .ok_or_else(|| anyhow!("unknown timeline mode: {mode_key} (expected upcoming, date or today)"))?;

    let window: Vec<NaiveDate> = match mode {
        ViewMode::DateFilter(day) => vec![day],
        ViewMode::TodayOnly => vec![ctx.clock.today],
        ViewMode::AllUpcoming => (0..=TIMELINE_FETCH_DAYS)
            .map(|offset| datetime::add_days(ctx.clock.today, offset))
            .collect(),
    };
    let tasks = load_tasks(ctx, args.view.tasks.as_deref(), &window)?;

    let timeline = group(&tasks, &ctx.clock);
    let groups = filter_by_view_mode(timeline.groups, mode, &ctx.clock);
    if args.view.json {
        return print_json(&groups);
    }
    ctx.renderer.print_timeline(&groups, &ctx.clock)?;
    ctx.renderer.print_skipped(&timeline.skipped)
}

fn cmd_select(ctx: &CommandContext<'_>, expr: &str) -> anyhow::Result<()> {
    let date = parse_date_expr(expr, &ctx.clock)?;
    save_selected_date(ctx.store, date)?;
    info!(date = %date, "selected date saved");
    println!("selected {}", datetime::format_date_key(date));
    Ok(())
}

fn cmd_fetch(ctx: &CommandContext<'_>, args: &FetchArgs) -> anyhow::Result<()> {
    let date = resolve_focus(ctx, args.date.as_deref())?;
    let query = if args.pending {
        let status = args
            .status
            .as_deref()
            .map(|raw| TaskStatus::from_key(raw).ok_or_else(|| anyhow!("unknown task status: {raw}")))
            .transpose()?;
        TaskQuery::Pending(status)
    } else {
        TaskQuery::Accepted
    };

    let fetcher = Arc::new(HttpTaskFetcher::new(ApiSettings::from_config(ctx.cfg)?)?);
    let loader = CachedTaskLoader::with_query(fetcher, query);
    let tasks = build_runtime()?
        .block_on(loader.load(date))
        .with_context(|| format!("failed to fetch tasks for {}", datetime::format_date_key(date)))?;

    if args.json {
        return print_json(tasks.as_slice());
    }
    ctx.renderer.print_task_table(&tasks, &ctx.clock)
}

fn load_tasks(ctx: &CommandContext<'_>, file: Option<&Path>, window: &[NaiveDate]) -> anyhow::Result<Vec<Task>> {
    if let Some(path) = file {
        return read_task_file(path);
    }
    let fetcher = Arc::new(HttpTaskFetcher::new(ApiSettings::from_config(ctx.cfg)?)?);
    let loader = CachedTaskLoader::new(fetcher);
    build_runtime()?.block_on(fetch_window(&loader, window))
}

#[tracing::instrument(skip(path), fields(file = %path.display()))]
pub fn read_task_file(path: &Path) -> anyhow::Result<Vec<Task>> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))?;
    Ok(tasks_from_json(value))
}

/// Loads every day in `window` concurrently and merges the results by task
/// id. Days that fail are logged and left out unless every day fails.
pub async fn fetch_window<F>(loader: &CachedTaskLoader<F>, window: &[NaiveDate]) -> anyhow::Result<Vec<Task>>
where
    F: TaskFetcher + 'static,
{
    let results = join_all(window.iter().map(|day| loader.load(*day))).await;

    let mut incoming: Vec<Task> = Vec::new();
    let mut first_error = None;
    let mut loaded_days = 0usize;
    for (day, result) in window.iter().zip(results) {
        match result {
            Ok(tasks) => {
                loaded_days += 1;
                incoming.extend(tasks.iter().cloned());
            }
            Err(err) => {
                warn!(date = %day, error = %err, "failed to load tasks for day");
                first_error.get_or_insert(err);
            }
        }
    }

    if loaded_days == 0
        && let Some(err) = first_error
    {
        return Err(anyhow::Error::new(err).context("failed to load tasks for every requested day"));
    }

    let merged = merge_into_flat_list(&[], &incoming);
    debug!(days = window.len(), loaded_days, tasks = merged.len(), "loaded task window");
    Ok(merged)
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
