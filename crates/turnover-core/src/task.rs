use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datetime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn as_key(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn from_key(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Some(TaskStatus::Pending),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "COMPLETED" => Some(TaskStatus::Completed),
            "CANCELLED" | "CANCELED" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Cleaning,
    Maintenance,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Property {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub address: Option<serde_json::Value>,
}

/// `propertyId` arrives either as a bare id or populated with the property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropertyRef {
    Id(String),
    Populated(Property),
}

impl PropertyRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            PropertyRef::Id(_) => None,
            PropertyRef::Populated(property) => property.name.as_deref(),
        }
    }

    /// Addresses are either a plain string or an object with `street`/`city`.
    pub fn address_line(&self) -> Option<String> {
        let PropertyRef::Populated(property) = self else {
            return None;
        };
        match property.address.as_ref()? {
            serde_json::Value::String(raw) => Some(raw.clone()),
            serde_json::Value::Object(map) => {
                let parts: Vec<&str> = ["street", "city", "state"]
                    .iter()
                    .filter_map(|key| map.get(*key).and_then(|v| v.as_str()))
                    .filter(|part| !part.trim().is_empty())
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(", "))
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDetails {
    #[serde(default)]
    pub check_in: Option<String>,

    #[serde(default)]
    pub check_out: Option<String>,

    #[serde(default)]
    pub check_out_date: Option<String>,

    #[serde(default)]
    pub guest_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,

    pub status: TaskStatus,

    #[serde(rename = "type", default)]
    pub task_type: Option<TaskType>,

    #[serde(default)]
    pub check_in_date: Option<String>,

    #[serde(default)]
    pub check_out_date: Option<String>,

    #[serde(default)]
    pub property_id: Option<PropertyRef>,

    #[serde(default)]
    pub reservation_details: Option<ReservationDetails>,

    #[serde(default)]
    pub price: Option<serde_json::Value>,

    #[serde(default)]
    pub payment_status: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("task has no check-out date")]
    MissingDate,
    #[error("task date is not a valid timestamp: {raw}")]
    InvalidDate { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTask {
    pub task_id: String,
    pub reason: SkipReason,
}

impl Task {
    pub fn new(id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            status,
            task_type: None,
            check_in_date: None,
            check_out_date: None,
            property_id: None,
            reservation_details: None,
            price: None,
            payment_status: None,
            extra: BTreeMap::new(),
        }
    }

    /// The raw value every calendar view keys on: `checkOutDate`, then the
    /// reservation's `checkOut`, then the reservation's `checkOutDate`.
    pub fn task_date_raw(&self) -> Option<&str> {
        let reservation = self.reservation_details.as_ref();
        [
            self.check_out_date.as_deref(),
            reservation.and_then(|r| r.check_out.as_deref()),
            reservation.and_then(|r| r.check_out_date.as_deref()),
        ]
        .into_iter()
        .flatten()
        .find(|raw| !raw.trim().is_empty())
    }

    pub fn task_date(&self, tz: &Tz) -> Result<NaiveDate, SkipReason> {
        let raw = self.task_date_raw().ok_or(SkipReason::MissingDate)?;
        datetime::parse_timestamp(raw, tz)
            .map(|ts| datetime::normalize_utc(ts, tz))
            .ok_or_else(|| SkipReason::InvalidDate {
                raw: raw.to_string(),
            })
    }

    pub fn property_name(&self) -> Option<&str> {
        self.property_id.as_ref().and_then(PropertyRef::name)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

/// Splits tasks into those with a resolvable calendar day and those skipped.
pub fn partition_by_date<'a>(
    tasks: &'a [Task],
    tz: &Tz,
) -> (Vec<(NaiveDate, &'a Task)>, Vec<SkippedTask>) {
    let mut dated = Vec::with_capacity(tasks.len());
    let mut skipped = Vec::new();

    for task in tasks {
        match task.task_date(tz) {
            Ok(day) => dated.push((day, task)),
            Err(reason) => {
                tracing::debug!(task_id = %task.id, %reason, "skipping task without usable date");
                skipped.push(SkippedTask {
                    task_id: task.id.clone(),
                    reason,
                });
            }
        }
    }

    if !skipped.is_empty() {
        tracing::warn!(
            skipped = skipped.len(),
            total = tasks.len(),
            "some tasks were excluded from calendar views"
        );
    }

    (dated, skipped)
}

/// Reads a task payload leniently: either `{ "data": [...] }` or a bare
/// array. Records that do not match the task shape are dropped with a warning.
pub fn tasks_from_json(value: serde_json::Value) -> Vec<Task> {
    let records = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                tracing::warn!("task payload has no data array");
                Vec::new()
            }
        },
        _ => {
            tracing::warn!("task payload is neither an object nor an array");
            Vec::new()
        }
    };

    let total = records.len();
    let tasks: Vec<Task> = records
        .into_iter()
        .enumerate()
        .filter_map(|(idx, record)| match serde_json::from_value::<Task>(record) {
            Ok(task) => Some(task),
            Err(err) => {
                tracing::warn!(index = idx, error = %err, "dropping malformed task record");
                None
            }
        })
        .collect();

    tracing::debug!(total, parsed = tasks.len(), "decoded task payload");
    tasks
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_backend_shape() {
        let task: Task = serde_json::from_value(json!({
            "_id": "t1",
            "status": "IN_PROGRESS",
            "type": "CLEANING",
            "checkInDate": "2025-01-14T15:00:00.000Z",
            "checkOutDate": "2025-01-15T11:00:00.000Z",
            "propertyId": { "_id": "p1", "name": "Beach House", "address": { "street": "1 Shore Rd", "city": "Tybee" } },
            "reservationDetails": { "guestName": "Ada" },
            "price": 120,
            "paymentStatus": "PAID",
            "notes": "bring linens"
        }))
        .expect("valid task");

        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.task_type, Some(TaskType::Cleaning));
        assert_eq!(task.property_name(), Some("Beach House"));
        assert_eq!(
            task.property_id.as_ref().and_then(PropertyRef::address_line),
            Some("1 Shore Rd, Tybee".to_string())
        );
        assert!(task.extra.contains_key("notes"));
    }

    #[test]
    fn unknown_status_does_not_fail() {
        let task: Task =
            serde_json::from_value(json!({ "_id": "t1", "status": "ARCHIVED", "propertyId": "p9" }))
                .expect("lenient status");
        assert_eq!(task.status, TaskStatus::Unknown);
        assert_eq!(task.property_name(), None);
    }

    #[test]
    fn task_date_falls_back_to_reservation() {
        let mut task = Task::new("t1", TaskStatus::Pending);
        assert_eq!(task.task_date_raw(), None);

        task.reservation_details = Some(ReservationDetails {
            check_out_date: Some("2025-01-17".to_string()),
            ..Default::default()
        });
        assert_eq!(task.task_date_raw(), Some("2025-01-17"));

        task.reservation_details = Some(ReservationDetails {
            check_out: Some("2025-01-16".to_string()),
            check_out_date: Some("2025-01-17".to_string()),
            ..Default::default()
        });
        assert_eq!(task.task_date_raw(), Some("2025-01-16"));

        task.check_out_date = Some("2025-01-15".to_string());
        assert_eq!(task.task_date_raw(), Some("2025-01-15"));
    }

    #[test]
    fn check_in_is_never_the_grouping_key() {
        let mut task = Task::new("t1", TaskStatus::Pending);
        task.check_in_date = Some("2025-01-14T15:00:00Z".to_string());
        assert_eq!(task.task_date(&chrono_tz::UTC), Err(SkipReason::MissingDate));
    }

    #[test]
    fn invalid_date_is_reported() {
        let mut task = Task::new("t1", TaskStatus::Pending);
        task.check_out_date = Some("not a date".to_string());
        assert_eq!(
            task.task_date(&chrono_tz::UTC),
            Err(SkipReason::InvalidDate {
                raw: "not a date".to_string()
            })
        );
    }

    #[test]
    fn payload_drops_malformed_records() {
        let tasks = tasks_from_json(json!({
            "data": [
                { "_id": "ok", "status": "PENDING" },
                { "status": "PENDING" },
                42
            ]
        }));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "ok");
    }

    #[test]
    fn partition_collects_skips() {
        let mut dated = Task::new("a", TaskStatus::Pending);
        dated.check_out_date = Some("2025-01-15T10:00:00Z".to_string());
        let undated = Task::new("b", TaskStatus::Pending);

        let tasks = vec![dated, undated];
        let (ok, skipped) = partition_by_date(&tasks, &chrono_tz::UTC);
        assert_eq!(ok.len(), 1);
        assert_eq!(
            ok[0].0,
            NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid date")
        );
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].task_id, "b");
        assert_eq!(skipped[0].reason, SkipReason::MissingDate);
    }
}
