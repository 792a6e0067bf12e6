//! Application state shared across request handlers.

use std::sync::Arc;

use crate::dispatch::JobDispatcher;
use crate::liveness::PingList;
use crate::repository::Repository;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    repo: Repository,
    dispatcher: Arc<JobDispatcher>,
    ping_list: Arc<PingList>,
}

impl AppState {
    pub fn new(repo: Repository, dispatcher: Arc<JobDispatcher>, ping_list: Arc<PingList>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                repo,
                dispatcher,
                ping_list,
            }),
        }
    }

    pub fn repo(&self) -> &Repository {
        &self.inner.repo
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.inner.dispatcher
    }

    pub fn ping_list(&self) -> &Arc<PingList> {
        &self.inner.ping_list
    }
}
