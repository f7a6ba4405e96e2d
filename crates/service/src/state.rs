//! Application state shared across handlers.

use std::sync::Arc;

use crate::lookup::LookupService;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    lookup: LookupService,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(lookup: LookupService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { lookup }),
        }
    }

    /// Get a reference to the lookup service.
    #[must_use]
    pub fn lookup(&self) -> &LookupService {
        &self.inner.lookup
    }
}
