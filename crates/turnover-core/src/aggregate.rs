use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::datetime::{self, Clock};
use crate::indicator::{DotConfig, IndicatorPalette};
use crate::task::{SkippedTask, Task, partition_by_date};

/// Days shown either side of the focus day in the week strip.
const WEEK_RADIUS: i64 = 3;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DayBucket {
    pub full_date: NaiveDate,
    pub tasks_count: usize,
    pub has_task: bool,
    pub is_today: bool,
    pub dot_config: DotConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MonthCell {
    Empty,
    Day(DayBucket),
}

impl MonthCell {
    pub fn bucket(&self) -> Option<&DayBucket> {
        match self {
            MonthCell::Empty => None,
            MonthCell::Day(bucket) => Some(bucket),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekSummary {
    pub days: Vec<DayBucket>,
    pub skipped: Vec<SkippedTask>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthSummary {
    pub year: i32,
    pub month: u32,
    pub month_name: &'static str,
    pub days: Vec<MonthCell>,
    pub skipped: Vec<SkippedTask>,
}

impl MonthSummary {
    pub fn buckets(&self) -> impl Iterator<Item = &DayBucket> {
        self.days.iter().filter_map(MonthCell::bucket)
    }

    pub fn leading_padding(&self) -> usize {
        self.days
            .iter()
            .take_while(|cell| matches!(cell, MonthCell::Empty))
            .count()
    }

    pub fn total_tasks(&self) -> usize {
        self.buckets().map(|bucket| bucket.tasks_count).sum()
    }

    /// Earliest day holding the most tasks, if any day has one.
    pub fn busiest_day(&self) -> Option<&DayBucket> {
        self.buckets()
            .filter(|bucket| bucket.has_task)
            .fold(None, |best: Option<&DayBucket>, bucket| match best {
                Some(current) if current.tasks_count >= bucket.tasks_count => Some(current),
                _ => Some(bucket),
            })
    }
}

fn count_by_day(tasks: &[Task], clock: &Clock) -> (BTreeMap<NaiveDate, usize>, Vec<SkippedTask>) {
    let (dated, skipped) = partition_by_date(tasks, &clock.timezone);
    let mut counts = BTreeMap::new();
    for (day, _) in dated {
        *counts.entry(day).or_insert(0) += 1;
    }
    (counts, skipped)
}

fn bucket_for(
    day: NaiveDate,
    counts: &BTreeMap<NaiveDate, usize>,
    clock: &Clock,
    palette: &IndicatorPalette,
) -> DayBucket {
    let tasks_count = counts.get(&day).copied().unwrap_or(0);
    let is_today = clock.is_today(day);
    DayBucket {
        full_date: day,
        tasks_count,
        has_task: tasks_count > 0,
        is_today,
        dot_config: palette.classify(tasks_count, is_today),
    }
}

/// Seven buckets, `center - 3` through `center + 3`, in ascending order.
#[tracing::instrument(skip(tasks, clock, palette), fields(task_count = tasks.len()))]
pub fn aggregate_week(
    center: NaiveDate,
    tasks: &[Task],
    clock: &Clock,
    palette: &IndicatorPalette,
) -> WeekSummary {
    let (counts, skipped) = count_by_day(tasks, clock);
    let days = (-WEEK_RADIUS..=WEEK_RADIUS)
        .map(|offset| bucket_for(datetime::add_days(center, offset), &counts, clock, palette))
        .collect::<Vec<_>>();

    tracing::debug!(
        center = %center,
        busy_days = days.iter().filter(|d| d.has_task).count(),
        "aggregated week"
    );
    WeekSummary { days, skipped }
}

/// Month grid for the month containing `month_date`: Sunday-aligned
/// padding cells, then one bucket per calendar day.
#[tracing::instrument(skip(tasks, clock, palette), fields(task_count = tasks.len()))]
pub fn aggregate_month(
    month_date: NaiveDate,
    tasks: &[Task],
    clock: &Clock,
    palette: &IndicatorPalette,
) -> MonthSummary {
    let year = month_date.year();
    let month = month_date.month();
    let first = datetime::first_day_of_month(year, month);
    let day_count = datetime::days_in_month(year, month);
    let padding = datetime::weekday_index(first) as usize;

    let (counts, skipped) = count_by_day(tasks, clock);
    let mut days = Vec::with_capacity(padding + day_count as usize);
    days.extend(std::iter::repeat_n(MonthCell::Empty, padding));
    days.extend((0..day_count).map(|offset| {
        MonthCell::Day(bucket_for(
            datetime::add_days(first, i64::from(offset)),
            &counts,
            clock,
            palette,
        ))
    }));

    tracing::debug!(year, month, padding, day_count, "aggregated month");
    MonthSummary {
        year,
        month,
        month_name: datetime::month_name(month),
        days,
        skipped,
    }
}
