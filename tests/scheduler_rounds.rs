// tests/scheduler_rounds.rs
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use stockscan::notify::PollEvent;
use stockscan::{Item, PollResult, Scheduler, SchedulerCfg, Source, SourceStatus};
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug)]
enum Step {
    InStock,
    Empty,
    Fail,
    Panic,
}

/// Replays a script of outcomes; the last step repeats forever.
struct Scripted {
    name: &'static str,
    steps: Mutex<VecDeque<Step>>,
    delay: Duration,
}

impl Scripted {
    fn new(name: &'static str, steps: &[Step]) -> Self {
        Self {
            name,
            steps: Mutex::new(steps.iter().copied().collect()),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            *steps.front().unwrap()
        }
    }
}

#[async_trait::async_trait]
impl Source for Scripted {
    async fn poll(&self) -> PollResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_step() {
            Step::InStock => PollResult::found(vec![Item {
                title: format!("{} RTX 3080", self.name),
                price: 719.0,
                in_stock: true,
                url: "https://shop.test/3080".into(),
            }]),
            Step::Empty => PollResult::found(vec![]),
            Step::Fail => PollResult::failed(anyhow!("{} unreachable", self.name)),
            Step::Panic => panic!("{} blew up", self.name),
        }
    }

    fn name(&self) -> &str {
        self.name
    }

    fn user_url(&self) -> &str {
        "https://shop.test"
    }
}

#[derive(Debug, Clone)]
struct Seen {
    index: usize,
    name: String,
    status: SourceStatus,
    errors: u32,
    has_last_stock: bool,
}

fn channel_observer(scheduler: &Scheduler) -> mpsc::UnboundedReceiver<Seen> {
    let (tx, rx) = mpsc::unbounded_channel();
    scheduler.register_observer(Arc::new(move |ev: &PollEvent<'_>| -> Result<()> {
        let _ = tx.send(Seen {
            index: ev.index,
            name: ev.source.name().to_string(),
            status: ev.result.status(),
            errors: ev.consecutive_errors,
            has_last_stock: ev.last_stock.is_some(),
        });
        Ok(())
    }));
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Vec<Seen> {
    let mut out = Vec::new();
    while let Ok(s) = rx.try_recv() {
        out.push(s);
    }
    out
}

#[tokio::test]
async fn in_stock_and_failing_source_over_two_rounds() {
    let sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(Scripted::new("A", &[Step::InStock])),
        Arc::new(Scripted::new("B", &[Step::Fail])),
    ];
    let s = Scheduler::new(sources, SchedulerCfg::with_interval(Duration::from_millis(10)));
    let mut rx = channel_observer(&s);

    s.run_once().await.unwrap();
    let first = s.states();
    assert_eq!(first[0].status(), SourceStatus::InStock);
    assert_eq!(first[0].consecutive_errors, 0);
    assert_eq!(first[0].last_stock, Some(first[0].last_result.timestamp));
    assert_eq!(first[1].status(), SourceStatus::Error);
    assert_eq!(first[1].consecutive_errors, 1);
    assert!(first[1].last_stock.is_none());

    s.run_once().await.unwrap();
    let second = s.states();
    assert_eq!(second[0].consecutive_errors, 0);
    assert_eq!(second[0].last_stock, Some(second[0].last_result.timestamp));
    assert!(second[0].last_stock >= first[0].last_stock);
    assert_eq!(second[1].consecutive_errors, 2);
    assert!(second[1].last_stock.is_none());

    // One event per source per round.
    let events = drain(&mut rx);
    assert_eq!(events.len(), 4);
    let b_errors: Vec<u32> = events
        .iter()
        .filter(|e| e.name == "B")
        .map(|e| e.errors)
        .collect();
    assert_eq!(b_errors, vec![1, 2]);
    assert!(events
        .iter()
        .filter(|e| e.index == 0)
        .all(|e| e.status == SourceStatus::InStock && e.has_last_stock));

    // The first state array was not mutated by the second round.
    assert_eq!(first[1].consecutive_errors, 1);
}

#[tokio::test]
async fn error_count_is_length_of_trailing_error_run() {
    let script = [
        Step::Fail,
        Step::Fail,
        Step::Empty,
        Step::Fail,
        Step::InStock,
        Step::Fail,
        Step::Fail,
        Step::Fail,
    ];
    let sources: Vec<Arc<dyn Source>> = vec![Arc::new(Scripted::new("S", &script))];
    let s = Scheduler::new(sources, SchedulerCfg::default());

    let mut counts = Vec::new();
    let mut stocked = Vec::new();
    for _ in 0..script.len() {
        s.run_once().await.unwrap();
        let st = &s.states()[0];
        counts.push(st.consecutive_errors);
        stocked.push(st.last_stock.is_some());
    }
    assert_eq!(counts, vec![1, 2, 0, 1, 0, 1, 2, 3]);
    // last_stock is set at the in-stock round and survives later failures.
    assert_eq!(
        stocked,
        vec![false, false, false, false, true, true, true, true]
    );
}

async fn isolation_over_rounds(middle: Step) {
    let sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(Scripted::new("left", &[Step::Empty])),
        Arc::new(Scripted::new("middle", &[middle])),
        Arc::new(Scripted::new("right", &[Step::InStock]).delayed(Duration::from_millis(5))),
    ];
    let s = Scheduler::new(sources, SchedulerCfg::with_interval(Duration::from_millis(5)));
    let mut rx = channel_observer(&s);

    s.start().unwrap();
    let mut per_source = [0usize; 3];
    while per_source.iter().any(|n| *n < 3) {
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("rounds keep coming")
            .expect("observer channel open");
        per_source[ev.index] += 1;
        match ev.index {
            0 => assert_eq!(ev.status, SourceStatus::Unavailable),
            1 => {
                assert_eq!(ev.status, SourceStatus::Error);
                assert_eq!(ev.errors as usize, per_source[1]);
            }
            _ => assert_eq!(ev.status, SourceStatus::InStock),
        }
    }
    s.stop().await;

    let states = s.states();
    assert_eq!(states[0].consecutive_errors, 0);
    assert_eq!(states[2].consecutive_errors, 0);
    assert!(states[2].last_stock.is_some());
    assert!(states[1].consecutive_errors >= 3);
}

#[tokio::test]
async fn failing_middle_source_does_not_affect_siblings() {
    isolation_over_rounds(Step::Fail).await;
}

#[tokio::test]
async fn panicking_middle_source_is_reported_as_error() {
    isolation_over_rounds(Step::Panic).await;
}

#[tokio::test]
async fn panic_message_reaches_the_result() {
    let sources: Vec<Arc<dyn Source>> = vec![Arc::new(Scripted::new("P", &[Step::Panic]))];
    let s = Scheduler::new(sources, SchedulerCfg::default());
    s.run_once().await.unwrap();
    let st = &s.states()[0];
    let msg = st.last_result.error().unwrap().to_string();
    assert!(msg.contains("P blew up"), "{msg}");
}

#[tokio::test]
async fn failing_observer_does_not_abort_round_or_other_observers() {
    let sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(Scripted::new("A", &[Step::Empty])),
        Arc::new(Scripted::new("B", &[Step::InStock])),
    ];
    let s = Scheduler::new(sources, SchedulerCfg::default());
    s.register_observer(Arc::new(|_: &PollEvent<'_>| -> Result<()> {
        Err(anyhow!("display gone"))
    }));
    s.register_observer(Arc::new(|ev: &PollEvent<'_>| -> Result<()> {
        if ev.index == 0 {
            panic!("observer bug");
        }
        Ok(())
    }));
    let mut rx = channel_observer(&s);

    s.run_once().await.unwrap();
    let mut names: Vec<String> = drain(&mut rx).into_iter().map(|e| e.name).collect();
    names.sort();
    assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    assert!(s.states().iter().all(|st| !st.last_result.is_pending()));
}

#[tokio::test]
async fn unregistered_observer_stops_receiving() {
    let sources: Vec<Arc<dyn Source>> = vec![Arc::new(Scripted::new("A", &[Step::Empty]))];
    let s = Scheduler::new(sources, SchedulerCfg::default());
    let hits = Arc::new(Mutex::new(0u32));
    let hits_c = Arc::clone(&hits);
    let id = s.register_observer(Arc::new(move |_: &PollEvent<'_>| -> Result<()> {
        *hits_c.lock().unwrap() += 1;
        Ok(())
    }));

    s.run_once().await.unwrap();
    assert!(s.unregister_observer(id));
    s.run_once().await.unwrap();
    assert_eq!(*hits.lock().unwrap(), 1);
    assert!(!s.unregister_observer(id));
}

#[tokio::test]
async fn snapshot_pairs_sources_with_states() {
    let sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(Scripted::new("A", &[Step::Fail])),
        Arc::new(Scripted::new("B", &[Step::InStock])),
    ];
    let s = Scheduler::new(sources, SchedulerCfg::default());
    s.run_once().await.unwrap();

    let snap = s.snapshot();
    assert_eq!(snap.len(), 2);
    assert_eq!(snap[0].source.name(), "A");
    assert_eq!(snap[0].state.status(), SourceStatus::Error);
    assert_eq!(snap[1].source.name(), "B");
    assert_eq!(snap[1].state.status(), SourceStatus::InStock);
}

#[tokio::test]
async fn clear_errors_resets_markers_but_not_counts() {
    let sources: Vec<Arc<dyn Source>> = vec![
        Arc::new(Scripted::new("A", &[Step::Fail, Step::Fail, Step::Empty])),
        Arc::new(Scripted::new("B", &[Step::InStock])),
    ];
    let s = Scheduler::new(sources, SchedulerCfg::default());
    s.run_once().await.unwrap();
    s.run_once().await.unwrap();
    assert!(s.states()[0].last_error_at.is_some());

    assert_eq!(s.clear_errors(), 1);
    let st = &s.states()[0];
    assert!(st.last_error_at.is_none());
    assert_eq!(st.consecutive_errors, 2);
    assert_eq!(st.status(), SourceStatus::Error);
    assert_eq!(s.clear_errors(), 0);

    s.run_once().await.unwrap();
    let st = &s.states()[0];
    assert_eq!(st.consecutive_errors, 0);
    assert!(st.last_error_at.is_none());
}
