//! Staleness checks for cached remote entities. Pure and lock-free.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fediref_models::{Account, Status};

/// Maximum age of a cached remote entity before it is re-fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow(Duration);

impl FreshnessWindow {
    pub const DEFAULT_ACCOUNT: Self = Self(Duration::from_secs(6 * 60 * 60));
    pub const DEFAULT_STATUS: Self = Self(Duration::from_secs(2 * 60 * 60));
    /// For lookups driven by a user action.
    pub const FRESH: Self = Self(Duration::from_secs(10 * 60));
    /// For lookups that must see near-live state.
    pub const FRESHEST: Self = Self(Duration::from_secs(5));

    pub const fn new(window: Duration) -> Self {
        Self(window)
    }

    pub const fn duration(self) -> Duration {
        self.0
    }

    /// Whether something last fetched at `fetched_at` is still fresh at `now`.
    pub fn covers(self, fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(fetched_at) = fetched_at else {
            return false;
        };
        let Ok(window) = chrono::Duration::from_std(self.0) else {
            return true;
        };
        match fetched_at.checked_add_signed(window) {
            Some(stale_at) => now <= stale_at,
            None => true,
        }
    }
}

impl From<Duration> for FreshnessWindow {
    fn from(window: Duration) -> Self {
        Self(window)
    }
}

/// Local, suspended and instance accounts never need a remote refresh.
pub fn account_fresh(account: &Account, window: FreshnessWindow, now: DateTime<Utc>) -> bool {
    if account.is_local() || account.is_suspended() || account.is_instance() {
        return true;
    }
    window.covers(account.fetched_at, now)
}

pub fn status_fresh(status: &Status, window: FreshnessWindow, now: DateTime<Utc>) -> bool {
    if status.local {
        return true;
    }
    window.covers(status.fetched_at, now)
}
