// src/scan/providers/nvidia.rs
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use metrics::histogram;
use serde::Deserialize;

use crate::scan::search::SearchTerms;
use crate::scan::types::{Item, PollResult, Source};
use crate::scan::USER_AGENT;

const VENDOR: &str = "Nvidia";
const OUT_OF_STOCK: &str = "out_of_stock";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    searched_products: SearchedProducts,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchedProducts {
    featured_product: Option<Product>,
    #[serde(default)]
    product_details: Vec<Product>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Product {
    product_title: Option<String>,
    product_price: Option<String>,
    prd_status: Option<String>,
    #[serde(default)]
    retailers: Vec<Retailer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Retailer {
    direct_purchase_link: Option<String>,
}

/// "€1,549.00" -> 1549.0
fn parse_price(raw: &str) -> Result<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '€' | ',') && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<f64>()
        .with_context(|| format!("invalid price {raw:?}"))
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

/// Founders Edition search on the Nvidia partner API (JSON).
pub struct NvidiaSource {
    name: String,
    terms: SearchTerms,
    user_url: String,
    mode: Mode,
}

impl NvidiaSource {
    pub fn user_url_for(locale: &str) -> String {
        format!(
            "https://www.nvidia.com/{locale}/shop/geforce/?page=1&limit=9&locale={locale}&manufacturer=NVIDIA"
        )
    }

    pub fn api_url_for(locale: &str) -> String {
        format!(
            "https://api.nvidia.partners/edge/product/search?page=1&limit=9&locale={locale}&manufacturer=NVIDIA"
        )
    }

    fn with_mode(search: &str, locale: &str, mode: Mode) -> Self {
        let terms = SearchTerms::parse(search);
        Self {
            name: terms.display_name(VENDOR),
            terms,
            user_url: Self::user_url_for(locale),
            mode,
        }
    }

    /// Parse a captured API response instead of calling the API.
    pub fn from_fixture(search: &str, locale: &str, body: &str) -> Self {
        Self::with_mode(search, locale, Mode::Fixture(body.to_string()))
    }

    /// Query the live API; requests give up after `timeout`.
    pub fn from_api(search: &str, locale: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("building nvidia http client")?;
        let url = Self::api_url_for(locale);
        Ok(Self::with_mode(search, locale, Mode::Http { url, client }))
    }

    fn parse_items(&self, body: &str) -> Result<Vec<Item>> {
        let t0 = std::time::Instant::now();
        let page: SearchPage = serde_json::from_str(body).context("parsing nvidia search json")?;

        let SearchedProducts {
            featured_product,
            mut product_details,
        } = page.searched_products;
        product_details.extend(featured_product);

        let mut out = Vec::new();
        for p in product_details {
            let title = p
                .product_title
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| anyhow!("item title not found"))?;
            if !self.terms.matches(&title) {
                continue;
            }
            // Stock does not depend on the price; keep the listing.
            let price = match p.product_price.as_deref().map(parse_price) {
                Some(Ok(v)) => v,
                Some(Err(e)) => {
                    tracing::debug!(
                        target: "scan",
                        %title,
                        error = %format!("{e:#}"),
                        "unparsable price"
                    );
                    f64::NAN
                }
                None => {
                    tracing::debug!(target: "scan", %title, "listing without price");
                    f64::NAN
                }
            };
            let in_stock = p.prd_status.as_deref() != Some(OUT_OF_STOCK);
            let url = p
                .retailers
                .into_iter()
                .next()
                .and_then(|r| r.direct_purchase_link)
                .unwrap_or_else(|| self.user_url.clone());
            out.push(Item {
                title,
                price,
                in_stock,
                url,
            });
        }
        ensure!(!out.is_empty(), "no valid item found");

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("scan_parse_ms").record(ms);
        Ok(out)
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        match &self.mode {
            Mode::Fixture(body) => self.parse_items(body),
            Mode::Http { url, client } => {
                let body = client
                    .get(url)
                    .send()
                    .await
                    .context("nvidia http get()")?
                    .error_for_status()
                    .context("nvidia non-2xx")?
                    .text()
                    .await
                    .context("nvidia http .text()")?;
                self.parse_items(&body)
            }
        }
    }
}

#[async_trait]
impl Source for NvidiaSource {
    async fn poll(&self) -> PollResult {
        PollResult::capture(self.fetch().await)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn user_url(&self) -> &str {
        &self.user_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_strips_currency_and_separators() {
        assert_eq!(parse_price("€1,549.00").unwrap(), 1549.0);
        assert_eq!(parse_price("719.00 €").unwrap(), 719.0);
        assert!(parse_price("sold out").is_err());
    }

    #[test]
    fn name_is_parameterized_by_search() {
        let s = NvidiaSource::from_fixture("3080", "fr-fr", "{}");
        assert_eq!(s.name(), "Nvidia[3080]");
        assert!(s.user_url().contains("/fr-fr/shop/geforce/"));
    }
}
