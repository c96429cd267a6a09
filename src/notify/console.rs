// src/notify/console.rs
use std::io::Write;
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::{Observer, PollEvent};
use crate::scan::types::SourceStatus;

/// Prints one line per completed poll.
pub struct ConsoleObserver<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleObserver<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

impl<W: Write + Send> Observer for ConsoleObserver<W> {
    fn on_poll(&self, event: &PollEvent<'_>) -> Result<()> {
        let line = format_line(event);
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        writeln!(out, "{line}").context("writing console line")?;
        out.flush().context("flushing console")?;
        Ok(())
    }
}

fn error_counter(n: u32) -> String {
    if n > 9 {
        "#>9".to_string()
    } else {
        format!("#{n}")
    }
}

/// `name | status | detail | last stock | url`
pub fn format_line(event: &PollEvent<'_>) -> String {
    let res = event.result;
    let ts = res.timestamp.format("%H:%M:%S");

    let status = match res.status() {
        SourceStatus::Error => format!(
            "{} {}",
            SourceStatus::Error.label(),
            error_counter(event.consecutive_errors)
        ),
        s => s.label().to_string(),
    };

    let detail = match (res.error(), res.items()) {
        (Some(e), _) => e.to_string(),
        (None, Some(items)) => {
            let available = items.iter().filter(|it| it.in_stock).count();
            if available > 0 {
                format!("{available}/{} items in stock", items.len())
            } else {
                format!("{} items watched", items.len())
            }
        }
        (None, None) => "waiting".to_string(),
    };

    let last_stock = event
        .last_stock
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    format!(
        "[{ts}] {:<24} | {:<14} | {:<32} | last stock: {last_stock} | {}",
        event.source.name(),
        status,
        detail,
        event.source.user_url()
    )
}
