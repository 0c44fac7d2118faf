use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::TaskCache;
use crate::datetime::format_date_key;
use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("task API returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("task API request failed: {0}")]
    Transport(String),
    #[error("task API response could not be decoded: {0}")]
    Decode(String),
}

/// The remote side of the task lists.
#[async_trait]
pub trait TaskFetcher: Send + Sync {
    async fn fetch_accepted(&self, date: NaiveDate) -> Result<Vec<Task>, FetchError>;

    async fn fetch_pending(
        &self,
        date: NaiveDate,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskQuery {
    #[default]
    Accepted,
    Pending(Option<TaskStatus>),
}

pub type FetchResult = Result<Arc<Vec<Task>>, FetchError>;

type InFlight = Shared<BoxFuture<'static, FetchResult>>;

#[derive(Default)]
struct LoaderState {
    cache: TaskCache,
    in_flight: HashMap<String, InFlight>,
    epoch: u64,
}

/// Read-through cache over a [`TaskFetcher`]. At most one fetch per date key
/// is in flight; every concurrent caller for that key awaits the same one.
pub struct CachedTaskLoader<F> {
    fetcher: Arc<F>,
    query: TaskQuery,
    state: Mutex<LoaderState>,
}

impl<F> CachedTaskLoader<F>
where
    F: TaskFetcher + 'static,
{
    pub fn new(fetcher: Arc<F>) -> Self {
        Self::with_query(fetcher, TaskQuery::Accepted)
    }

    pub fn with_query(fetcher: Arc<F>, query: TaskQuery) -> Self {
        Self {
            fetcher,
            query,
            state: Mutex::new(LoaderState::default()),
        }
    }

    pub fn query(&self) -> TaskQuery {
        self.query
    }

    fn start_fetch(&self, date: NaiveDate) -> InFlight {
        let fetcher = Arc::clone(&self.fetcher);
        let query = self.query;
        async move {
            let tasks = match query {
                TaskQuery::Accepted => fetcher.fetch_accepted(date).await?,
                TaskQuery::Pending(status) => fetcher.fetch_pending(date, status).await?,
            };
            Ok(Arc::new(tasks))
        }
        .boxed()
        .shared()
    }

    /// Cached tasks for `date`, fetching them once if the key is empty.
    #[tracing::instrument(skip(self))]
    pub async fn load(&self, date: NaiveDate) -> FetchResult {
        let key = format_date_key(date);
        let (in_flight, epoch) = {
            let mut state = self.state.lock().await;
            if let Some(hit) = state.cache.get(&key) {
                debug!(key = %key, count = hit.len(), "task cache hit");
                return Ok(hit);
            }

            let epoch = state.epoch;
            let in_flight = match state.in_flight.get(&key).cloned() {
                Some(existing) => {
                    debug!(key = %key, "joining in-flight fetch");
                    existing
                }
                None => {
                    debug!(key = %key, "task cache miss; fetching");
                    let started = self.start_fetch(date);
                    state.in_flight.insert(key.clone(), started.clone());
                    started
                }
            };
            (in_flight, epoch)
        };

        let result = in_flight.clone().await;
        self.settle(&key, epoch, &in_flight, &result, false).await;
        result
    }

    /// Fetches `date` again and replaces whatever was cached for it, unless a
    /// newer fetch for the same key was registered in the meantime.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, date: NaiveDate) -> FetchResult {
        let key = format_date_key(date);
        let (in_flight, epoch) = {
            let mut state = self.state.lock().await;
            let started = self.start_fetch(date);
            state.in_flight.insert(key.clone(), started.clone());
            (started, state.epoch)
        };

        let result = in_flight.clone().await;
        self.settle(&key, epoch, &in_flight, &result, true).await;
        result
    }

    async fn settle(
        &self,
        key: &str,
        epoch: u64,
        in_flight: &InFlight,
        result: &FetchResult,
        replace: bool,
    ) {
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            debug!(key, "cache cleared while fetching; dropping response");
            return;
        }

        let is_current = state
            .in_flight
            .get(key)
            .is_some_and(|current| current.ptr_eq(in_flight));
        if is_current {
            state.in_flight.remove(key);
        }

        match result {
            Ok(tasks) if replace && is_current => state.cache.replace(key, Arc::clone(tasks)),
            Ok(_) if replace => {
                debug!(key, "a newer fetch owns this key; dropping stale refresh");
            }
            Ok(tasks) => {
                state.cache.put(key, Arc::clone(tasks));
            }
            Err(err) if is_current => {
                warn!(key, error = %err, "task fetch failed");
            }
            Err(_) => {}
        }
    }

    /// Drops every cached entry and orphans in-flight fetches so their
    /// responses never land in the emptied cache.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.cache.clear();
        state.in_flight.clear();
        state.epoch += 1;
        info!(epoch = state.epoch, "task cache cleared");
    }

    pub async fn cached(&self, date: NaiveDate) -> Option<Arc<Vec<Task>>> {
        self.state.lock().await.cache.get(&format_date_key(date))
    }

    pub async fn cached_tasks(&self) -> Vec<Task> {
        self.state.lock().await.cache.get_all()
    }

    pub async fn cached_keys(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .cache
            .keys()
            .map(str::to_string)
            .collect()
    }

    /// Loads the ticket's date, reporting [`LoadOutcome::Superseded`] when a
    /// newer date was selected before the response arrived.
    #[tracing::instrument(skip(self, selection))]
    pub async fn load_for_selection(
        &self,
        selection: &DateSelection,
        ticket: SelectionTicket,
    ) -> Result<LoadOutcome, FetchError> {
        if !selection.is_current(&ticket) {
            return Ok(LoadOutcome::Superseded);
        }

        let result = self.load(ticket.date).await;
        if !selection.is_current(&ticket) {
            debug!(date = %ticket.date, generation = ticket.generation, "discarding stale response");
            return Ok(LoadOutcome::Superseded);
        }
        result.map(LoadOutcome::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTicket {
    pub date: NaiveDate,
    pub generation: u64,
}

/// Generation counter for the user's selected day.
#[derive(Debug, Default)]
pub struct DateSelection {
    generation: AtomicU64,
}

impl DateSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, date: NaiveDate) -> SelectionTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(date = %date, generation, "selected date");
        SelectionTicket { date, generation }
    }

    pub fn is_current(&self, ticket: &SelectionTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Applied(Arc<Vec<Task>>),
    Superseded,
}

impl LoadOutcome {
    pub fn tasks(&self) -> Option<&[Task]> {
        match self {
            LoadOutcome::Applied(tasks) => Some(tasks.as_slice()),
            LoadOutcome::Superseded => None,
        }
    }
}
