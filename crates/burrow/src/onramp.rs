//! HTTP client for the onramp backend: purchase options and hosted-checkout sessions.

use crate::{
    assets::{resolve_assets, Asset, BuyOptions},
    chains::tokens::TokenDirectory,
    config::OnrampConfig,
};
use async_trait::async_trait;
use eyre::Context as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Where the buyer is; purchase options vary by jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    pub country: String,
    pub subdivision: Option<String>,
}

impl Region {
    /// Uppercases both parts. A US buyer with no subdivision gets the configured default.
    pub fn resolve(country: Option<&str>, subdivision: Option<&str>, cfg: &OnrampConfig) -> Self {
        let country = country
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&cfg.default_country)
            .to_ascii_uppercase();
        let subdivision = subdivision
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_uppercase)
            .or_else(|| (country == "US").then(|| cfg.default_subdivision.to_ascii_uppercase()));
        Self {
            country,
            subdivision,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub destination_address: String,
    pub purchase_currency: String,
    pub destination_network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_user_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    onramp_url: String,
}

/// Source of the purchase-options feed.
#[async_trait]
pub trait AssetFeed: Send + Sync {
    async fn buy_options(&self, region: &Region) -> eyre::Result<BuyOptions>;
}

fn is_loopback_http(url: &str) -> bool {
    ["http://127.0.0.1", "http://localhost", "http://[::1]"]
        .iter()
        .any(|prefix| {
            url.strip_prefix(prefix)
                .is_some_and(|rest| matches!(rest.as_bytes().first(), None | Some(b':' | b'/')))
        })
}

pub struct OnrampClient {
    base_url: String,
    http: Client,
    ttl: Duration,
    cache: Mutex<HashMap<Region, (Instant, BuyOptions)>>,
}

impl OnrampClient {
    /// The base URL must be https, or plain http on loopback.
    pub fn new(cfg: &OnrampConfig) -> eyre::Result<Self> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_owned();
        if !base_url.starts_with("https://") && !is_loopback_http(&base_url) {
            eyre::bail!("onramp base_url must use https (or loopback http): {base_url}");
        }
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            base_url,
            http,
            ttl: Duration::from_secs(cfg.buy_options_cache_seconds),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, region: &Region) -> eyre::Result<Option<BuyOptions>> {
        let cache = self
            .cache
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?;
        Ok(cache
            .get(region)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, v)| v.clone()))
    }

    fn remember(&self, region: &Region, options: &BuyOptions) -> eyre::Result<()> {
        self.cache
            .lock()
            .map_err(|e| eyre::eyre!("mutex poisoned: {e}"))?
            .insert(region.clone(), (Instant::now(), options.clone()));
        Ok(())
    }

    pub async fn create_session(&self, req: &SessionRequest) -> eyre::Result<String> {
        let url = format!("{}/api/onramp/create-session", self.base_url);
        let resp: SessionResponse = self
            .http
            .post(url)
            .json(req)
            .send()
            .await
            .context("onramp session request")?
            .error_for_status()
            .context("onramp session status")?
            .json()
            .await
            .context("onramp session json")?;
        Ok(resp.onramp_url)
    }
}

#[async_trait]
impl AssetFeed for OnrampClient {
    async fn buy_options(&self, region: &Region) -> eyre::Result<BuyOptions> {
        if let Some(hit) = self.cached(region)? {
            debug!(country = %region.country, "buy options served from cache");
            return Ok(hit);
        }
        let mut query = vec![("country", region.country.as_str())];
        if let Some(s) = region.subdivision.as_deref() {
            query.push(("subdivision", s));
        }
        let options: BuyOptions = self
            .http
            .get(format!("{}/api/onramp/buy-options", self.base_url))
            .query(&query)
            .send()
            .await
            .context("buy options request")?
            .error_for_status()
            .context("buy options status")?
            .json()
            .await
            .context("buy options json")?;
        self.remember(region, &options)?;
        Ok(options)
    }
}

/// Assets for the region. Feed failures are logged and replaced by the fallback list.
pub async fn offered_assets(
    feed: &dyn AssetFeed,
    region: &Region,
    tokens: &dyn TokenDirectory,
) -> Vec<Asset> {
    match feed.buy_options(region).await {
        Ok(options) => resolve_assets(Some(&options), tokens),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "buy options unavailable; using fallback assets");
            resolve_assets(None, tokens)
        }
    }
}
