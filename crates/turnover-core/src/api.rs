use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{
  debug,
  warn
};

use crate::config::Config;
use crate::datetime::format_date_key;
use crate::loader::{
  FetchError,
  TaskFetcher
};
use crate::task::{
  Task,
  TaskStatus,
  tasks_from_json
};

pub const ACCEPTED_TASKS_PATH: &str =
  "listAcceptedCleaningTasks";
pub const PENDING_TASKS_PATH: &str =
  "listPendingCleaningTasks";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
  pub base_url: String,
  pub token:    Option<String>,
  pub timeout:  Duration
}

impl ApiSettings {
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let base_url = cfg
      .get("api.base_url")
      .map(|raw| raw.trim().to_string())
      .filter(|raw| !raw.is_empty())
      .ok_or_else(|| {
        anyhow!(
          "api.base_url is not \
           configured"
        )
      })?;

    let timeout_secs = cfg
      .get_u64("api.timeout_secs")?
      .unwrap_or(DEFAULT_TIMEOUT_SECS);

    let token = cfg
      .get("api.token")
      .map(|raw| raw.trim().to_string())
      .filter(|raw| !raw.is_empty());

    Ok(Self {
      base_url,
      token,
      timeout: Duration::from_secs(
        timeout_secs.max(1)
      )
    })
  }

  pub fn url(
    &self,
    path: &str
  ) -> String {
    format!(
      "{}/{}",
      self.base_url.trim_end_matches('/'),
      path.trim_start_matches('/')
    )
  }
}

#[derive(Debug, Serialize)]
struct TaskListRequest {
  date:   String,
  #[serde(
    skip_serializing_if = "Option::is_none"
  )]
  status: Option<&'static str>
}

/// Talks to the backend's task list
/// endpoints.
pub struct HttpTaskFetcher {
  client:   reqwest::Client,
  settings: ApiSettings
}

impl HttpTaskFetcher {
  pub fn new(
    settings: ApiSettings
  ) -> anyhow::Result<Self> {
    let client =
      reqwest::Client::builder()
        .timeout(settings.timeout)
        .build()
        .context(
          "failed building HTTP client \
           for task API"
        )?;
    Ok(Self { client, settings })
  }

  #[tracing::instrument(skip(self, body), fields(date = %body.date))]
  async fn post_task_list(
    &self,
    path: &str,
    body: TaskListRequest
  ) -> Result<Vec<Task>, FetchError> {
    let url = self.settings.url(path);
    let payload =
      serde_json::to_vec(&body).map_err(
        |err| {
          FetchError::Decode(
            err.to_string()
          )
        }
      )?;

    let mut request = self
      .client
      .post(url.as_str())
      .header(
        reqwest::header::CONTENT_TYPE,
        "application/json"
      )
      .header(
        reqwest::header::ACCEPT,
        "application/json"
      )
      .body(payload);
    if let Some(token) =
      self.settings.token.as_deref()
    {
      request =
        request.bearer_auth(token);
    }

    let response =
      request.send().await.map_err(
        |err| {
          warn!(
            url = %url,
            error = %err,
            "task API request failed"
          );
          FetchError::Transport(
            err.to_string()
          )
        }
      )?;

    let status = response.status();
    let text =
      response.text().await.map_err(
        |err| {
          FetchError::Transport(
            err.to_string()
          )
        }
      )?;

    if !status.is_success() {
      let message: String = text
        .chars()
        .take(ERROR_BODY_LIMIT)
        .collect();
      return Err(FetchError::Http {
        status: status.as_u16(),
        message
      });
    }

    let value: serde_json::Value =
      serde_json::from_str(&text)
        .map_err(|err| {
          FetchError::Decode(
            err.to_string()
          )
        })?;
    let tasks = tasks_from_json(value);
    debug!(
      url = %url,
      count = tasks.len(),
      "fetched task list"
    );
    Ok(tasks)
  }
}

#[async_trait]
impl TaskFetcher for HttpTaskFetcher {
  async fn fetch_accepted(
    &self,
    date: NaiveDate
  ) -> Result<Vec<Task>, FetchError> {
    self
      .post_task_list(
        ACCEPTED_TASKS_PATH,
        TaskListRequest {
          date:   format_date_key(date),
          status: None
        }
      )
      .await
  }

  async fn fetch_pending(
    &self,
    date: NaiveDate,
    status: Option<TaskStatus>
  ) -> Result<Vec<Task>, FetchError> {
    self
      .post_task_list(
        PENDING_TASKS_PATH,
        TaskListRequest {
          date:   format_date_key(date),
          status: status
            .map(TaskStatus::as_key)
        }
      )
      .await
  }
}
