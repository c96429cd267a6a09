// src/scan/providers/dummy.rs
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use rand::Rng;

use crate::scan::types::{Item, PollResult, Source};

const DUMMY_URL: &str = "http://www.dummy.com/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Draw {
    InStock,
    Unavailable,
    Error,
}

/// Offline source with weighted random outcomes, for demos and smoke runs.
#[derive(Debug, Clone)]
pub struct DummySource {
    name: String,
    /// Relative weights of (in stock, unavailable, error).
    weights: [u32; 3],
    delay: Duration,
}

impl DummySource {
    pub fn new(stocks: u32, unavailable: u32, error: u32, delay: Duration) -> Self {
        Self {
            name: "Dummy".to_string(),
            weights: [stocks, unavailable, error],
            delay,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn draw(&self) -> Draw {
        let total: u32 = self.weights.iter().sum();
        if total == 0 {
            return Draw::Unavailable;
        }
        let mut roll = rand::rng().random_range(0..total);
        for (w, outcome) in self
            .weights
            .iter()
            .zip([Draw::InStock, Draw::Unavailable, Draw::Error])
        {
            if roll < *w {
                return outcome;
            }
            roll -= w;
        }
        Draw::Unavailable
    }
}

impl Default for DummySource {
    fn default() -> Self {
        Self::new(1, 1, 1, Duration::from_secs(1))
    }
}

#[async_trait]
impl Source for DummySource {
    async fn poll(&self) -> PollResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let in_stock = match self.draw() {
            Draw::Error => return PollResult::failed(anyhow!("Dummy exception")),
            Draw::InStock => true,
            Draw::Unavailable => false,
        };
        PollResult::found(vec![Item {
            title: format!("{} item", self.name),
            price: 0.0,
            in_stock,
            url: DUMMY_URL.to_string(),
        }])
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn user_url(&self) -> &str {
        DUMMY_URL
    }
}
