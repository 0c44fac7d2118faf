use std::path::PathBuf;

use chrono::NaiveDate;
use turnover_core::aggregate::{aggregate_month, aggregate_week};
use turnover_core::commands::read_task_file;
use turnover_core::datetime::Clock;
use turnover_core::indicator::{DotSize, IndicatorPalette, IndicatorPriority};
use turnover_core::task::{SkipReason, Task};
use turnover_core::timeline::{ViewMode, filter_by_view_mode, group};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).expect("valid date")
}

fn clock() -> Clock {
    Clock::fixed(chrono_tz::UTC, day(15))
}

fn fixture_tasks() -> Vec<Task> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/accepted_tasks.json");
    read_task_file(&path).expect("read fixture")
}

#[test]
fn fixture_drops_records_without_id() {
    let tasks = fixture_tasks();
    assert_eq!(tasks.len(), 9);
}

#[test]
fn week_view_from_fixture() {
    let tasks = fixture_tasks();
    let week = aggregate_week(day(15), &tasks, &clock(), &IndicatorPalette::default());

    let counts: Vec<usize> = week.days.iter().map(|b| b.tasks_count).collect();
    assert_eq!(counts, vec![1, 0, 0, 2, 1, 0, 3]);

    let today = &week.days[3];
    assert!(today.is_today);
    assert_eq!(today.dot_config.priority, IndicatorPriority::High);
    assert_eq!(today.dot_config.dot_size, DotSize::Large);

    let saturday = &week.days[6];
    assert!(saturday.dot_config.show_count);
    assert_eq!(saturday.dot_config.display_count, "3");

    let mut skipped: Vec<&str> = week.skipped.iter().map(|s| s.task_id.as_str()).collect();
    skipped.sort_unstable();
    assert_eq!(skipped, vec!["65a1f0c2e4b0a8", "65a1f0c2e4b0a9"]);
    assert!(
        week.skipped
            .iter()
            .any(|s| s.reason == SkipReason::MissingDate)
    );
}

#[test]
fn week_output_does_not_depend_on_input_order() {
    let tasks = fixture_tasks();
    let mut reversed = tasks.clone();
    reversed.reverse();

    let forward = aggregate_week(day(15), &tasks, &clock(), &IndicatorPalette::default());
    let backward = aggregate_week(day(15), &reversed, &clock(), &IndicatorPalette::default());
    assert_eq!(forward.days, backward.days);
}

#[test]
fn month_view_from_fixture() {
    let tasks = fixture_tasks();
    let month = aggregate_month(day(1), &tasks, &clock(), &IndicatorPalette::default());

    assert_eq!(month.leading_padding(), 3);
    assert_eq!(month.buckets().count(), 31);
    assert_eq!(month.total_tasks(), 7);
    let busiest = month.busiest_day().expect("busy day");
    assert_eq!(busiest.full_date, day(18));
    assert_eq!(month.skipped.len(), 2);
}

#[test]
fn timeline_from_fixture() {
    let tasks = fixture_tasks();
    let timeline = group(&tasks, &clock());
    let dates: Vec<NaiveDate> = timeline.groups.iter().map(|g| g.date).collect();
    assert_eq!(dates, vec![day(15), day(16), day(12), day(18)]);

    let upcoming = filter_by_view_mode(timeline.groups.clone(), ViewMode::AllUpcoming, &clock());
    let dates: Vec<NaiveDate> = upcoming.iter().map(|g| g.date).collect();
    assert_eq!(dates, vec![day(15), day(16), day(18)]);
    assert_eq!(upcoming[0].tasks.len(), 2);
    assert_eq!(upcoming[1].tasks[0].property_name(), None);

    let today = filter_by_view_mode(timeline.groups.clone(), ViewMode::TodayOnly, &clock());
    assert_eq!(today.len(), 1);
    assert_eq!(today[0].tasks[0].property_name(), Some("Harbor Loft"));

    let none = filter_by_view_mode(timeline.groups, ViewMode::DateFilter(day(13)), &clock());
    assert!(none.is_empty());
}

#[test]
fn local_timezone_shifts_day_boundaries() {
    let mut task = Task::new("late", turnover_core::task::TaskStatus::Pending);
    task.check_out_date = Some("2025-01-16T03:00:00.000Z".to_string());

    let new_york = Clock::fixed(chrono_tz::America::New_York, day(15));
    let week = aggregate_week(day(15), &[task], &new_york, &IndicatorPalette::default());
    assert_eq!(week.days[3].tasks_count, 1);
    assert!(week.days[3].is_today);
}
