// src/notify/alert.rs
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{Observer, PollEvent};

/// Overall alert level across all sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    /// Nothing in stock, no source failing persistently.
    Quiet,
    InStock,
    /// At least one source reached the consecutive error limit.
    Failing,
}

/// Receives level transitions (sound, desktop notification, ...).
pub trait AlertSink: Send + Sync {
    fn on_alert(&self, level: AlertLevel, at: DateTime<Utc>);
}

/// Sink that only logs transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn on_alert(&self, level: AlertLevel, at: DateTime<Utc>) {
        tracing::info!(target: "alert", ?level, at = %at.to_rfc3339(), "alert level changed");
    }
}

/// Transition gate: reports a level only when it differs from the last one.
/// Starts at `Quiet`, so a quiet first evaluation is not reported.
#[derive(Debug, Clone)]
struct AlertGate {
    max_failures: u32,
    current: AlertLevel,
}

impl AlertGate {
    /// `max_failures` of 0 is treated as 1.
    fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            current: AlertLevel::Quiet,
        }
    }

    /// Level for per-source `(in_stock, consecutive_errors)` pairs.
    /// In stock wins over failing.
    fn evaluate<I>(&self, sources: I) -> AlertLevel
    where
        I: IntoIterator<Item = (bool, u32)>,
    {
        let mut failing = false;
        for (in_stock, errors) in sources {
            if in_stock {
                return AlertLevel::InStock;
            }
            failing |= errors >= self.max_failures;
        }
        if failing {
            AlertLevel::Failing
        } else {
            AlertLevel::Quiet
        }
    }

    /// Record `level`; returns it if it is a transition.
    fn update(&mut self, level: AlertLevel) -> Option<AlertLevel> {
        if level == self.current {
            return None;
        }
        self.current = level;
        Some(level)
    }

    fn current(&self) -> AlertLevel {
        self.current
    }
}

/// Observer escalating to an [`AlertSink`] from per-poll events.
pub struct AlertObserver<S: AlertSink> {
    sink: S,
    inner: Mutex<Inner>,
}

struct Inner {
    gate: AlertGate,
    /// `(in_stock, consecutive_errors)` indexed like the scheduler's sources.
    sources: Vec<(bool, u32)>,
}

impl<S: AlertSink> AlertObserver<S> {
    pub fn new(source_count: usize, max_failures: u32, sink: S) -> Self {
        Self {
            sink,
            inner: Mutex::new(Inner {
                gate: AlertGate::new(max_failures),
                sources: vec![(false, 0); source_count],
            }),
        }
    }

    pub fn level(&self) -> AlertLevel {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .gate
            .current()
    }
}

impl<S: AlertSink> Observer for AlertObserver<S> {
    fn on_poll(&self, event: &PollEvent<'_>) -> Result<()> {
        let transition = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if event.index >= inner.sources.len() {
                inner.sources.resize(event.index + 1, (false, 0));
            }
            inner.sources[event.index] = (event.result.is_in_stock(), event.consecutive_errors);
            let level = inner.gate.evaluate(inner.sources.iter().copied());
            inner.gate.update(level)
        };
        // Sink runs outside the lock.
        if let Some(level) = transition {
            self.sink.on_alert(level, event.result.timestamp);
        }
        Ok(())
    }
}
