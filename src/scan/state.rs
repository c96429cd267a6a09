//! # Source State
//! Per-source bookkeeping kept by the scheduler between rounds.
//!
//! A `SourceState` is a plain value: the scheduler builds the next state from
//! the previous one and a fresh [`PollResult`], then publishes the whole state
//! array at once. Readers therefore never observe a half-applied update.

use chrono::{DateTime, Utc};

use crate::scan::types::{PollResult, SourceStatus};

#[derive(Debug, Clone)]
pub struct SourceState {
    pub last_result: PollResult,
    /// Timestamp of the most recent in-stock result. Never cleared.
    pub last_stock: Option<DateTime<Utc>>,
    /// Length of the trailing run of error results.
    pub consecutive_errors: u32,
    /// Timestamp of the most recent error result. Never cleared.
    pub last_error_at: Option<DateTime<Utc>>,
}

impl SourceState {
    /// Initial state: placeholder result stamped with `created_at`.
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            last_result: PollResult::pending(created_at),
            last_stock: None,
            consecutive_errors: 0,
            last_error_at: None,
        }
    }

    /// State after `result` completed for this source.
    pub fn advance(&self, result: PollResult) -> Self {
        let (consecutive_errors, last_error_at) = if result.is_error() {
            (
                self.consecutive_errors.saturating_add(1),
                Some(result.timestamp),
            )
        } else {
            (0, self.last_error_at)
        };
        let last_stock = if result.is_in_stock() {
            Some(result.timestamp)
        } else {
            self.last_stock
        };

        Self {
            last_result: result,
            last_stock,
            consecutive_errors,
            last_error_at,
        }
    }

    pub fn status(&self) -> SourceStatus {
        self.last_result.status()
    }

    /// Number of items matched by the last poll, `None` if it did not list any.
    pub fn watched_items(&self) -> Option<usize> {
        self.last_result.items().map(<[_]>::len)
    }
}
