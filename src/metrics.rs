// src/metrics.rs
use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const ENV_METRICS_ADDR: &str = "STOCKSCAN_METRICS_ADDR";

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder without an exporter; scrape via
    /// [`Metrics::render`].
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        Ok(Self { handle })
    }

    /// Install the recorder and serve `/metrics` on `addr`.
    /// Must be called inside a tokio runtime.
    pub fn serve(addr: SocketAddr) -> Result<()> {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("prometheus: listen on {addr}"))?;
        tracing::info!(target: "scan", %addr, "metrics exporter listening");
        Ok(())
    }

    /// Start the exporter if `$STOCKSCAN_METRICS_ADDR` is set.
    pub fn serve_from_env() -> Result<bool> {
        let Ok(raw) = std::env::var(ENV_METRICS_ADDR) else {
            return Ok(false);
        };
        let addr: SocketAddr = raw
            .trim()
            .parse()
            .with_context(|| format!("{ENV_METRICS_ADDR}={raw:?} is not a socket address"))?;
        Self::serve(addr)?;
        Ok(true)
    }

    /// Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
