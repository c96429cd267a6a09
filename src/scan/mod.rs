// src/scan/mod.rs
pub mod config;
pub mod providers;
pub mod scheduler;
pub mod search;
pub mod state;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// Browser user agent sent by HTTP sources; some vendors reject bare clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36";

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scan_rounds_total", "Completed polling rounds.");
        describe_counter!("scan_polls_total", "Polls completed across all sources.");
        describe_counter!(
            "scan_poll_errors_total",
            "Polls that ended with an error result."
        );
        describe_counter!(
            "scan_observer_errors_total",
            "Observer callbacks that failed or panicked."
        );
        describe_histogram!(
            "scan_round_duration_ms",
            "Wall time of one round (fan-out to last completion) in milliseconds."
        );
        describe_histogram!("scan_parse_ms", "Vendor response parse time in milliseconds.");
        describe_gauge!("scan_last_round_ts", "Unix ts when the last round completed.");
    });
}
