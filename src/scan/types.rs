// src/scan/types.rs
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Item {
    pub title: String,
    /// NaN when the vendor listed no usable price.
    pub price: f64,
    pub in_stock: bool,
    pub url: String, // purchase link, falls back to the source's user url
}

/// Captured cause of a failed poll. Cheap to clone so snapshots can carry it.
#[derive(Clone)]
pub struct PollError(Arc<anyhow::Error>);

impl PollError {
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl From<anyhow::Error> for PollError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err)
    }
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl fmt::Debug for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PollError({:#})", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    /// Placeholder before the first poll of a source completed.
    Pending,
    Items(Vec<Item>),
    Failed(PollError),
}

/// Outcome of one poll of one source.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

impl PollResult {
    pub fn pending(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            outcome: Outcome::Pending,
        }
    }

    pub fn found(items: Vec<Item>) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome: Outcome::Items(items),
        }
    }

    pub fn failed(err: impl Into<PollError>) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome: Outcome::Failed(err.into()),
        }
    }

    /// Turn a fallible fetch into a result; sources use this to honor the
    /// never-fail contract while writing their fetch logic with `?`.
    pub fn capture(res: anyhow::Result<Vec<Item>>) -> Self {
        match res {
            Ok(items) => Self::found(items),
            Err(e) => Self::failed(e),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn error(&self) -> Option<&PollError> {
        match &self.outcome {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[Item]> {
        match &self.outcome {
            Outcome::Items(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, Outcome::Pending)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    pub fn is_in_stock(&self) -> bool {
        self.items()
            .is_some_and(|items| items.iter().any(|it| it.in_stock))
    }

    pub fn status(&self) -> SourceStatus {
        if self.is_error() {
            SourceStatus::Error
        } else if self.is_in_stock() {
            SourceStatus::InStock
        } else {
            SourceStatus::Unavailable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceStatus {
    InStock,
    Unavailable,
    Error,
}

impl SourceStatus {
    pub fn label(self) -> &'static str {
        match self {
            SourceStatus::InStock => "In Stock",
            SourceStatus::Unavailable => "Unavailable",
            SourceStatus::Error => "Error",
        }
    }
}

/// One independently pollable data provider (a vendor page or search).
///
/// `poll` must not fail: every failure is reported through
/// [`PollResult::failed`]. It may run concurrently with other sources and may
/// take arbitrarily long; sources own their request timeouts.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    async fn poll(&self) -> PollResult;
    fn name(&self) -> &str;
    fn user_url(&self) -> &str;
}
