use std::io::{self, IsTerminal, Write};

use chrono::Datelike;
use unicode_width::UnicodeWidthStr;

use crate::aggregate::{DayBucket, MonthCell, MonthSummary, WeekSummary};
use crate::config::Config;
use crate::datetime::{self, Clock};
use crate::indicator::{DotConfig, DotSize, IndicatorPriority};
use crate::task::{SkippedTask, Task, TaskType};
use crate::timeline::DateGroup;

const WEEKDAY_HEADER: [&str; 7] = ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"];

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true) && io::stdout().is_terminal();

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all)]
    pub fn print_week(&self, week: &WeekSummary) -> anyhow::Result<()> {
        self.write_week(io::stdout().lock(), week)?;
        self.print_skipped(&week.skipped)
    }

    #[tracing::instrument(skip_all)]
    pub fn print_month(&self, month: &MonthSummary) -> anyhow::Result<()> {
        self.write_month(io::stdout().lock(), month)?;
        self.print_skipped(&month.skipped)
    }

    #[tracing::instrument(skip_all)]
    pub fn print_timeline(&self, groups: &[DateGroup], clock: &Clock) -> anyhow::Result<()> {
        self.write_timeline(io::stdout().lock(), groups, clock)
    }

    pub fn print_indicator(&self, count: usize, config: &DotConfig) -> anyhow::Result<()> {
        self.write_indicator(io::stdout().lock(), count, config)
    }

    pub fn print_task_table(&self, tasks: &[Task], clock: &Clock) -> anyhow::Result<()> {
        self.write_task_table(io::stdout().lock(), tasks, clock)
    }

    pub fn print_skipped(&self, skipped: &[SkippedTask]) -> anyhow::Result<()> {
        self.write_skipped(io::stdout().lock(), skipped)
    }

    pub fn write_week<W: Write>(&self, out: W, week: &WeekSummary) -> anyhow::Result<()> {
        let headers = week
            .days
            .iter()
            .map(|bucket| {
                let label = bucket.full_date.format("%a %-d").to_string();
                if bucket.is_today {
                    self.paint(&label, "1")
                } else {
                    label
                }
            })
            .collect::<Vec<_>>();
        let markers = week
            .days
            .iter()
            .map(|bucket| self.marker(bucket))
            .collect::<Vec<_>>();

        write_table(out, headers, vec![markers])
    }

    pub fn write_month<W: Write>(&self, mut out: W, month: &MonthSummary) -> anyhow::Result<()> {
        writeln!(out, "{} {}", month.month_name, month.year)?;
        writeln!(out, "{}", WEEKDAY_HEADER.map(|d| format!("{d:<5}")).join("").trim_end())?;

        for week in month.days.chunks(7) {
            let mut line = String::new();
            for cell in week {
                let text = match cell {
                    MonthCell::Empty => String::new(),
                    MonthCell::Day(bucket) => {
                        let marker = if bucket.has_task { self.marker(bucket) } else { String::new() };
                        format!("{:>2}{}", bucket.full_date.day(), marker)
                    }
                };
                let visible = UnicodeWidthStr::width(strip_ansi(&text).as_str());
                line.push_str(&text);
                line.push_str(&" ".repeat(5_usize.saturating_sub(visible)));
            }
            writeln!(out, "{}", line.trim_end())?;
        }

        let total = month.total_tasks();
        match month.busiest_day() {
            Some(busiest) => writeln!(
                out,
                "{total} task(s); busiest {} with {}",
                datetime::format_date_key(busiest.full_date),
                busiest.tasks_count
            )?,
            None => writeln!(out, "no tasks this month")?,
        }
        Ok(())
    }

    pub fn write_timeline<W: Write>(
        &self,
        mut out: W,
        groups: &[DateGroup],
        clock: &Clock,
    ) -> anyhow::Result<()> {
        if groups.is_empty() {
            writeln!(out, "No tasks found")?;
            return Ok(());
        }

        for (idx, group) in groups.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            let counts = group.status_counts();
            let heading = format!(
                "{} ({}) - {} task(s), {} done",
                group.label(),
                datetime::format_date_key(group.date),
                group.tasks.len(),
                counts.completed
            );
            writeln!(out, "{}", self.paint(&heading, "1"))?;
            self.write_task_table(&mut out, &group.tasks, clock)?;
        }
        Ok(())
    }

    pub fn write_indicator<W: Write>(&self, mut out: W, count: usize, config: &DotConfig) -> anyhow::Result<()> {
        writeln!(out, "tasks     {count}")?;
        writeln!(out, "dot       {}", config.show_dot)?;
        writeln!(out, "count     {}", config.show_count)?;
        writeln!(out, "size      {:?}", config.dot_size)?;
        writeln!(out, "color     {}", config.dot_color)?;
        writeln!(out, "display   {}", config.display_count)?;
        writeln!(out, "priority  {:?}", config.priority)?;
        Ok(())
    }

    pub fn write_task_table<W: Write>(&self, out: W, tasks: &[Task], clock: &Clock) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Status".to_string(),
            "Type".to_string(),
            "Check-out".to_string(),
            "Property".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                let status = task.status.as_key().to_string();
                let status = if task.is_open() { self.paint(&status, "33") } else { status };
                let task_type = match task.task_type {
                    Some(TaskType::Cleaning) => "cleaning",
                    Some(TaskType::Maintenance) => "maintenance",
                    Some(TaskType::Unknown) | None => "-",
                };
                let check_out = task
                    .task_date_raw()
                    .and_then(|raw| datetime::parse_timestamp(raw, &clock.timezone))
                    .map(|ts| ts.with_timezone(&clock.timezone).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let property = task.property_name().unwrap_or("-").to_string();
                vec![task.id.clone(), status, task_type.to_string(), check_out, property]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub fn write_skipped<W: Write>(&self, mut out: W, skipped: &[SkippedTask]) -> anyhow::Result<()> {
        if skipped.is_empty() {
            return Ok(());
        }
        let line = format!("{} task(s) without a usable check-out date were left out", skipped.len());
        writeln!(out, "{}", self.paint(&line, "2"))?;
        Ok(())
    }

    fn marker(&self, bucket: &DayBucket) -> String {
        let config = &bucket.dot_config;
        if !config.show_dot {
            return "·".to_string();
        }
        let dot = match config.dot_size {
            DotSize::Small => "•",
            DotSize::Large => "●",
        };
        let text = if config.show_count {
            format!("{dot}{}", config.display_count)
        } else {
            dot.to_string()
        };
        let code = match config.priority {
            IndicatorPriority::High => "33",
            IndicatorPriority::Medium => "34",
            IndicatorPriority::Normal => "32",
        };
        self.paint(&text, code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(header).as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let write_row = |writer: &mut W, cells: &[String]| -> anyhow::Result<()> {
        let mut line = String::new();
        for (idx, cell) in cells.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            line.push_str(cell);
            line.push_str(&" ".repeat(padding + 1));
        }
        writeln!(writer, "{}", line.trim_end())?;
        Ok(())
    };

    write_row(&mut writer, &headers)?;
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join(" ");
    writeln!(writer, "{rule}")?;

    for row in &rows {
        write_row(&mut writer, row)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::aggregate::{aggregate_month, aggregate_week};
    use crate::indicator::{IndicatorPalette, classify};
    use crate::task::TaskStatus;
    use crate::timeline::group;

    fn clock() -> Clock {
        Clock::fixed(chrono_tz::UTC, NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid date"))
    }

    fn task_on(id: &str, raw: &str) -> Task {
        let mut task = Task::new(id, TaskStatus::Pending);
        task.check_out_date = Some(raw.to_string());
        task
    }

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> anyhow::Result<()>,
    {
        let mut buf = Vec::new();
        f(&mut buf).expect("render");
        String::from_utf8(buf).expect("utf8 output")
    }

    #[test]
    fn month_grid_pads_first_week() {
        let tasks = vec![task_on("a", "2025-01-01T10:00:00Z")];
        let month = aggregate_month(clock().today, &tasks, &clock(), &IndicatorPalette::default());
        let out = render(|buf| Renderer::plain().write_month(buf, &month));
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "January 2025");
        assert_eq!(lines[1], "Su   Mo   Tu   We   Th   Fr   Sa");
        assert_eq!(lines[2], "                1•   2    3    4");
        assert!(out.contains("busiest 2025-01-01 with 1"));
    }

    #[test]
    fn week_strip_shows_counts() {
        let tasks = vec![
            task_on("a", "2025-01-16T08:00:00Z"),
            task_on("b", "2025-01-16T09:00:00Z"),
            task_on("c", "2025-01-16T10:00:00Z"),
        ];
        let week = aggregate_week(clock().today, &tasks, &clock(), &IndicatorPalette::default());
        let out = render(|buf| Renderer::plain().write_week(buf, &week));
        let lines: Vec<&str> = out.lines().collect();

        assert!(lines[0].starts_with("Sun 12"));
        assert!(lines[0].contains("Thu 16"));
        assert!(lines[2].contains("●3"));
    }

    #[test]
    fn timeline_lists_groups() {
        let tasks = vec![task_on("t1", "2025-01-15T10:30:00Z"), task_on("t2", "2025-01-16T09:00:00Z")];
        let timeline = group(&tasks, &clock());
        let out = render(|buf| Renderer::plain().write_timeline(buf, &timeline.groups, &clock()));

        assert!(out.starts_with("Today (2025-01-15) - 1 task(s), 0 done"));
        assert!(out.contains("Tomorrow (2025-01-16)"));
        assert!(out.contains("2025-01-15 10:30"));

        let empty = render(|buf| Renderer::plain().write_timeline(buf, &[], &clock()));
        assert_eq!(empty, "No tasks found\n");
    }

    #[test]
    fn indicator_block() {
        let out = render(|buf| Renderer::plain().write_indicator(buf, 12, &classify(12, false)));
        assert!(out.contains("display   9+"));
        assert!(out.contains("priority  Medium"));
    }

    #[test]
    fn strip_ansi_removes_escapes() {
        assert_eq!(strip_ansi("\x1b[33mPENDING\x1b[0m"), "PENDING");
    }
}
