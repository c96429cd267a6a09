//! # Notifications
//! Outbound boundary of the scheduler: observers receive one [`PollEvent`]
//! per completed poll, in completion order.
//!
//! Observers run on the scheduler task, so they must stay fast. A failing or
//! panicking observer is logged and skipped; it never aborts dispatch to the
//! remaining observers or the round itself.

pub mod alert;
pub mod console;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::counter;

use crate::scan::types::{PollResult, Source};

pub use alert::{AlertLevel, AlertObserver, AlertSink, LogAlertSink};
pub use console::ConsoleObserver;

/// Completion event for one source in one round.
#[derive(Clone, Copy)]
pub struct PollEvent<'a> {
    /// Position of the source in the scheduler's source list.
    pub index: usize,
    pub source: &'a dyn Source,
    pub result: &'a PollResult,
    pub last_stock: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

impl std::fmt::Debug for PollEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollEvent")
            .field("index", &self.index)
            .field("source", &self.source.name())
            .field("result", &self.result)
            .field("last_stock", &self.last_stock)
            .field("consecutive_errors", &self.consecutive_errors)
            .finish()
    }
}

pub trait Observer: Send + Sync {
    fn on_poll(&self, event: &PollEvent<'_>) -> Result<()>;
}

impl<F> Observer for F
where
    F: Fn(&PollEvent<'_>) -> Result<()> + Send + Sync,
{
    fn on_poll(&self, event: &PollEvent<'_>) -> Result<()> {
        self(event)
    }
}

/// Handle returned by registration; closures have no identity of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn Observer>)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push((id, observer));
        id
    }

    /// Returns `false` if `id` was not registered (or already removed).
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut v = self.observers.write().unwrap_or_else(|p| p.into_inner());
        let before = v.len();
        v.retain(|(oid, _)| *oid != id);
        v.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer registered right now.
    ///
    /// The list is copied before delivery so observers may (un)register
    /// from inside a callback.
    pub fn dispatch(&self, event: &PollEvent<'_>) {
        let observers: Vec<(ObserverId, Arc<dyn Observer>)> = self
            .observers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        for (id, obs) in observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| obs.on_poll(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    counter!("scan_observer_errors_total").increment(1);
                    tracing::error!(
                        target: "scan",
                        observer = %id,
                        source = event.source.name(),
                        error = %format!("{e:#}"),
                        "observer failed"
                    );
                }
                Err(panic) => {
                    counter!("scan_observer_errors_total").increment(1);
                    tracing::error!(
                        target: "scan",
                        observer = %id,
                        source = event.source.name(),
                        panic = panic_message(panic.as_ref()),
                        "observer panicked"
                    );
                }
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl Source for Named {
        async fn poll(&self) -> PollResult {
            PollResult::found(vec![])
        }
        fn name(&self) -> &str {
            self.0
        }
        fn user_url(&self) -> &str {
            "https://example.test"
        }
    }

    fn event<'a>(src: &'a Named, res: &'a PollResult) -> PollEvent<'a> {
        PollEvent {
            index: 0,
            source: src,
            result: res,
            last_stock: None,
            consecutive_errors: 0,
        }
    }

    #[test]
    fn failing_and_panicking_observers_do_not_stop_dispatch() {
        let reg = ObserverRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        reg.register(Arc::new(|_: &PollEvent<'_>| -> Result<()> {
            anyhow::bail!("render failed")
        }));
        reg.register(Arc::new(|_: &PollEvent<'_>| -> Result<()> {
            panic!("observer bug")
        }));
        let seen_c = Arc::clone(&seen);
        reg.register(Arc::new(move |ev: &PollEvent<'_>| -> Result<()> {
            seen_c.lock().unwrap().push(ev.source.name().to_string());
            Ok(())
        }));

        let src = Named("A");
        let res = PollResult::found(vec![]);
        reg.dispatch(&event(&src, &res));
        reg.dispatch(&event(&src, &res));

        assert_eq!(*seen.lock().unwrap(), vec!["A".to_string(), "A".to_string()]);
    }

    #[test]
    fn unregister_is_by_id_and_reports_missing() {
        let reg = ObserverRegistry::new();
        let a = reg.register(Arc::new(|_: &PollEvent<'_>| -> Result<()> { Ok(()) }));
        let b = reg.register(Arc::new(|_: &PollEvent<'_>| -> Result<()> { Ok(()) }));
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
        assert!(reg.unregister(a));
        assert!(!reg.unregister(a));
        assert_eq!(reg.len(), 1);
    }
}
