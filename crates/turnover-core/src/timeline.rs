use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::datetime::Clock;
use crate::task::{SkippedTask, Task, TaskStatus, partition_by_date};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    AllUpcoming,
    DateFilter(NaiveDate),
    TodayOnly,
}

impl ViewMode {
    pub fn as_key(&self) -> &'static str {
        match self {
            ViewMode::AllUpcoming => "upcoming",
            ViewMode::DateFilter(_) => "date",
            ViewMode::TodayOnly => "today",
        }
    }

    /// `date` needs a filter day; without one it is rejected.
    pub fn from_key(raw: &str, filter_date: Option<NaiveDate>) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "upcoming" | "all" | "all_upcoming" => Some(ViewMode::AllUpcoming),
            "today" | "today_only" => Some(ViewMode::TodayOnly),
            "date" | "date_filter" => filter_date.map(ViewMode::DateFilter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub other: usize,
}

impl StatusCounts {
    fn push(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            TaskStatus::Unknown => self.other += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub tasks: Vec<Task>,
    pub is_today: bool,
    pub is_tomorrow: bool,
}

impl DateGroup {
    pub fn label(&self) -> String {
        if self.is_today {
            "Today".to_string()
        } else if self.is_tomorrow {
            "Tomorrow".to_string()
        } else {
            self.date.format("%a, %b %-d").to_string()
        }
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in &self.tasks {
            counts.push(task.status);
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub groups: Vec<DateGroup>,
    pub skipped: Vec<SkippedTask>,
}

/// Buckets tasks by calendar day. Tasks keep their input order within a
/// group; groups come back sorted.
#[tracing::instrument(skip(tasks, clock), fields(task_count = tasks.len()))]
pub fn group(tasks: &[Task], clock: &Clock) -> Timeline {
    let (dated, skipped) = partition_by_date(tasks, &clock.timezone);

    let mut by_day: BTreeMap<NaiveDate, Vec<Task>> = BTreeMap::new();
    for (day, task) in dated {
        by_day.entry(day).or_default().push(task.clone());
    }

    let groups = by_day
        .into_iter()
        .map(|(date, tasks)| DateGroup {
            date,
            tasks,
            is_today: clock.is_today(date),
            is_tomorrow: clock.is_tomorrow(date),
        })
        .collect();

    let groups = sort_groups(groups);
    tracing::debug!(groups = groups.len(), skipped = skipped.len(), "grouped timeline");
    Timeline { groups, skipped }
}

fn rank(group: &DateGroup) -> u8 {
    if group.is_today {
        0
    } else if group.is_tomorrow {
        1
    } else {
        2
    }
}

fn compare_groups(a: &DateGroup, b: &DateGroup) -> Ordering {
    rank(a).cmp(&rank(b)).then_with(|| a.date.cmp(&b.date))
}

/// Today first, tomorrow second, everything else ascending by date.
pub fn sort_groups(mut groups: Vec<DateGroup>) -> Vec<DateGroup> {
    groups.sort_by(compare_groups);
    groups
}

/// Applies a view mode and re-sorts the survivors.
#[tracing::instrument(skip(groups, clock), fields(group_count = groups.len()))]
pub fn filter_by_view_mode(groups: Vec<DateGroup>, mode: ViewMode, clock: &Clock) -> Vec<DateGroup> {
    let kept = groups
        .into_iter()
        .filter(|group| match mode {
            ViewMode::AllUpcoming => group.date >= clock.today,
            ViewMode::DateFilter(day) => group.date == day,
            ViewMode::TodayOnly => group.date == clock.today,
        })
        .collect();

    let kept = sort_groups(kept);
    tracing::debug!(mode = mode.as_key(), kept = kept.len(), "filtered timeline");
    kept
}
