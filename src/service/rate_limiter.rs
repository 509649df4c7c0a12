//! Fixed-window attempt limiter keyed by identity.
//!
//! Each window lives in a [`TtlStore`] entry whose expiry is the window's
//! reset instant, so a window resets exactly when its entry expires and
//! abandoned identities are reclaimed by the sweeper.

use std::{sync::Arc, time::Duration};

use serde::Serialize;

use crate::{service::ttl_store::TtlStore, utils::clock::Clock};

/// Which limiter rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    Generation,
    Verification,
}

impl RateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Verification => "verification",
        }
    }
}

/// Rejection carrying how long until the window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub scope: RateScope,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
struct Window {
    attempts: u32,
}

pub struct RateLimiter {
    scope: RateScope,
    windows: TtlStore<Window>,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(scope: RateScope, max_attempts: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            scope,
            windows: TtlStore::new(clock),
            max_attempts,
            window,
        }
    }

    /// Fails if the identity has used up its window, without recording anything.
    pub fn check(&self, key: &str) -> Result<(), RateLimited> {
        let verdict = self.windows.peek_with(key, |window, remaining| {
            if window.attempts >= self.max_attempts {
                Err(self.rejection(remaining))
            } else {
                Ok(())
            }
        });
        verdict.unwrap_or(Ok(()))
    }

    /// Records one attempt and returns how many remain in the current window.
    pub fn record(&self, key: &str) -> u32 {
        self.windows
            .get_or_insert_with(key, self.window, Window::default, |window, _| {
                window.attempts = window.attempts.saturating_add(1);
                self.max_attempts.saturating_sub(window.attempts)
            })
    }

    /// Check and record as one step. Returns the attempts left after this one.
    pub fn try_acquire(&self, key: &str) -> Result<u32, RateLimited> {
        self.windows
            .get_or_insert_with(key, self.window, Window::default, |window, remaining| {
                if window.attempts >= self.max_attempts {
                    return Err(self.rejection(remaining));
                }
                window.attempts += 1;
                Ok(self.max_attempts - window.attempts)
            })
    }

    /// Forgets the identity's window.
    pub fn reset(&self, key: &str) {
        self.windows.delete(key);
    }

    pub fn sweep(&self) -> usize {
        self.windows.sweep()
    }

    fn rejection(&self, remaining: Duration) -> RateLimited {
        RateLimited {
            scope: self.scope,
            retry_after: remaining,
        }
    }
}
