//! Capital.com REST API client.
//!
//! Handles the CST / security-token session, request pacing, the two-phase
//! deal flow (submit then poll the confirms endpoint), and price rounding
//! to the epic's discovered precision. One client instance serves the whole
//! process; tokens are refreshed in place on a fixed cadence.

use crate::error::{CapitalError, Result};
use crate::types::{
    AccountsResponse, ActivityResponse, ConfirmResponse, DealReferenceResponse, MarketResponse,
    PositionsResponse, PricesResponse, SessionResponse,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use goldbot_core::config::CapitalConfig;
use goldbot_core::traits::BrokerApi;
use goldbot_core::types::{
    AccountSnapshot, ActivityEvent, Bar, BrokerPosition, DealOutcome, Direction, Quote, Timeframe,
};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Active session tokens captured from the session response headers.
#[derive(Debug, Clone)]
struct SessionTokens {
    cst: String,
    security_token: String,
}

/// Capital.com REST client bound to a single epic.
pub struct CapitalClient {
    config: CapitalConfig,
    base_url: String,
    http: Client,
    tokens: RwLock<Option<SessionTokens>>,
    /// Decimal places for outbound prices, discovered from the market
    /// snapshot and cached for the lifetime of the process.
    decimal_places: RwLock<Option<u32>>,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
    confirm_attempts: u32,
    confirm_delay: Duration,
}

impl std::fmt::Debug for CapitalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapitalClient")
            .field("base_url", &self.base_url)
            .field("epic", &self.config.epic)
            .finish_non_exhaustive()
    }
}

impl CapitalClient {
    /// Creates a new client. No network traffic happens until
    /// [`Self::create_session`].
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: CapitalConfig, confirm_attempts: u32, confirm_delay_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CapitalError::Network(format!("failed to build HTTP client: {e}")))?;

        let base_url = config.base_url().to_string();
        let quota = Quota::per_second(nonzero!(8u32));

        Ok(Self {
            config,
            base_url,
            http,
            tokens: RwLock::new(None),
            decimal_places: RwLock::new(None),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            confirm_attempts,
            confirm_delay: Duration::from_millis(confirm_delay_ms),
        })
    }

    /// Overrides the base URL (used by the wiremock tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// The configured epic.
    #[must_use]
    pub fn epic(&self) -> &str {
        &self.config.epic
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Creates (or re-creates) the API session, capturing the CST and
    /// security tokens from the response headers.
    ///
    /// # Errors
    /// Returns [`CapitalError::Authentication`] on rejected credentials.
    pub async fn create_session(&self) -> Result<()> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/api/v1/session", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-CAP-API-KEY", &self.config.api_key)
            .json(&json!({
                "identifier": self.config.identifier,
                "password": self.config.password,
                "encryptedPassword": false,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapitalError::Authentication(format!(
                "session creation failed: {status} {body}"
            )));
        }

        let cst = header_string(response.headers(), "CST")
            .ok_or(CapitalError::MissingField("CST header"))?;
        let security_token = header_string(response.headers(), "X-SECURITY-TOKEN")
            .ok_or(CapitalError::MissingField("X-SECURITY-TOKEN header"))?;

        let body: SessionResponse = response.json().await?;
        let account = body
            .account_info
            .and_then(|a| a.preferred)
            .or(body.current_account_id)
            .unwrap_or_else(|| "?".to_string());
        info!(account = %account, "Capital.com session created");

        *self.tokens.write() = Some(SessionTokens { cst, security_token });
        Ok(())
    }

    /// Re-authenticates in place; callers keep using the same client.
    ///
    /// # Errors
    /// Same failure modes as [`Self::create_session`].
    pub async fn refresh_session(&self) -> Result<()> {
        self.create_session().await
    }

    /// Tears the session down; failures are ignored beyond logging.
    pub async fn destroy_session(&self) {
        let had_tokens = self.tokens.read().is_some();
        if !had_tokens {
            return;
        }
        let url = format!("{}/api/v1/session", self.base_url);
        match self.request(Method::DELETE, &url, None).await {
            Ok(_) => info!("Capital.com session destroyed"),
            Err(e) => warn!(error = %e, "Session destroy failed"),
        }
        *self.tokens.write() = None;
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let tokens = self.tokens.read();
        let tokens = tokens
            .as_ref()
            .ok_or_else(|| CapitalError::Authentication("no active session".to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            "CST",
            HeaderValue::from_str(&tokens.cst)
                .map_err(|e| CapitalError::Authentication(e.to_string()))?,
        );
        headers.insert(
            "X-SECURITY-TOKEN",
            HeaderValue::from_str(&tokens.security_token)
                .map_err(|e| CapitalError::Authentication(e.to_string()))?,
        );
        Ok(headers)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        self.rate_limiter.until_ready().await;

        let headers = self.auth_headers()?;
        let mut builder = self.http.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(10);
            return Err(CapitalError::RateLimit { retry_after_secs: retry_after });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {url}");
        let response = self.request(Method::GET, &url, None).await?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapitalError::api(status.as_u16(), body));
        }
        Ok(response.json::<T>().await?)
    }

    // =========================================================================
    // Price rounding
    // =========================================================================

    /// Rounds an outbound price to the epic's decimal precision. Uses the
    /// cached precision when known, defaulting to 2 decimals otherwise.
    #[must_use]
    pub fn round_for_epic(&self, price: f64) -> f64 {
        let dp = self.decimal_places.read().unwrap_or(2);
        let factor = 10f64.powi(dp as i32);
        (price * factor).round() / factor
    }

    fn cache_precision(&self, dp: Option<u32>) {
        if let Some(dp) = dp {
            let mut cached = self.decimal_places.write();
            if cached.is_none() {
                debug!(decimal_places = dp, "Cached epic price precision");
                *cached = Some(dp);
            }
        }
    }

    // =========================================================================
    // Two-phase deal flow
    // =========================================================================

    /// Polls the confirms endpoint until a terminal status arrives.
    async fn confirm_deal(&self, deal_reference: &str) -> Result<ConfirmResponse> {
        for attempt in 1..=self.confirm_attempts {
            tokio::time::sleep(self.confirm_delay).await;

            let confirm: ConfirmResponse = self
                .get_json(&format!("/api/v1/confirms/{deal_reference}"))
                .await?;

            match confirm.deal_status.as_deref() {
                Some("ACCEPTED") => return Ok(confirm),
                Some(status) => {
                    return Err(CapitalError::DealRejected {
                        reference: deal_reference.to_string(),
                        status: status.to_string(),
                    })
                }
                // Still processing; poll again.
                None => debug!(
                    reference = deal_reference,
                    attempt,
                    max = self.confirm_attempts,
                    "Awaiting deal status"
                ),
            }
        }
        Err(CapitalError::ConfirmTimeout { reference: deal_reference.to_string() })
    }

    async fn submit_and_confirm(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(ConfirmResponse, String)> {
        let response = self.request(method, url, body).await?;
        let reference: DealReferenceResponse = Self::decode(response).await?;
        let reference = reference
            .deal_reference
            .ok_or(CapitalError::MissingField("dealReference"))?;
        let confirm = self.confirm_deal(&reference).await?;
        Ok((confirm, reference))
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn epoch_ms_to_rfc3339(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

#[async_trait]
impl BrokerApi for CapitalClient {
    async fn get_candles(&self, tf: Timeframe, max: usize) -> anyhow::Result<Vec<Bar>> {
        let path = format!(
            "/api/v1/prices/{}?resolution={}&max={}",
            self.config.epic,
            tf.resolution(),
            max
        );
        let response: PricesResponse = self.get_json(&path).await.context("get_candles")?;
        let mut bars: Vec<Bar> = response
            .prices
            .into_iter()
            .filter_map(crate::types::RawCandle::into_bar)
            .collect();
        bars.sort_by_key(|b| b.t);
        Ok(bars)
    }

    async fn get_quote(&self) -> anyhow::Result<Quote> {
        let path = format!("/api/v1/markets/{}", self.config.epic);
        let response: MarketResponse = self.get_json(&path).await.context("get_quote")?;
        self.cache_precision(response.snapshot.decimal_places_factor);
        Ok(response.snapshot.to_quote())
    }

    async fn account(&self) -> anyhow::Result<AccountSnapshot> {
        let response: AccountsResponse = self.get_json("/api/v1/accounts").await.context("account")?;
        let available = response
            .accounts
            .first()
            .map_or(0.0, |a| a.balance.available);
        Ok(AccountSnapshot { available })
    }

    async fn open_position(
        &self,
        direction: Direction,
        size: f64,
        stop_level: f64,
        profit_level: f64,
    ) -> anyhow::Result<DealOutcome> {
        let url = format!("{}/api/v1/positions", self.base_url);
        let body = json!({
            "epic": self.config.epic,
            "direction": direction.as_str(),
            "size": size,
            "guaranteedStop": false,
            "stopLevel": self.round_for_epic(stop_level),
            "profitLevel": self.round_for_epic(profit_level),
        });
        info!(
            direction = %direction,
            size,
            stop = self.round_for_epic(stop_level),
            profit = self.round_for_epic(profit_level),
            "createPosition"
        );

        let (confirm, reference) = self.submit_and_confirm(Method::POST, &url, Some(body)).await?;
        let deal_id = confirm
            .resolved_deal_id()
            .ok_or(CapitalError::MissingField("dealId"))?;
        info!(deal_id = %deal_id, reference = %reference, "Deal confirmed");
        Ok(DealOutcome { deal_id, deal_reference: reference, profit: confirm.profit })
    }

    async fn close_position(&self, deal_id: &str) -> anyhow::Result<DealOutcome> {
        let url = format!("{}/api/v1/positions/{deal_id}", self.base_url);
        info!(deal_id, "closePosition");

        let (confirm, reference) = self.submit_and_confirm(Method::DELETE, &url, None).await?;
        let closed_id = confirm
            .resolved_deal_id()
            .unwrap_or_else(|| deal_id.to_string());
        Ok(DealOutcome { deal_id: closed_id, deal_reference: reference, profit: confirm.profit })
    }

    async fn update_position(
        &self,
        deal_id: &str,
        stop_level: Option<f64>,
        profit_level: Option<f64>,
    ) -> anyhow::Result<()> {
        let url = format!("{}/api/v1/positions/{deal_id}", self.base_url);
        let mut body = serde_json::Map::new();
        if let Some(sl) = stop_level {
            body.insert("stopLevel".into(), json!(self.round_for_epic(sl)));
        }
        if let Some(tp) = profit_level {
            body.insert("profitLevel".into(), json!(self.round_for_epic(tp)));
        }
        let response = self
            .request(Method::PUT, &url, Some(serde_json::Value::Object(body)))
            .await?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    async fn list_positions(&self) -> anyhow::Result<Vec<BrokerPosition>> {
        let response: PositionsResponse =
            self.get_json("/api/v1/positions").await.context("list_positions")?;
        Ok(response
            .positions
            .into_iter()
            .map(|w| w.position.into_domain())
            .collect())
    }

    async fn get_position(&self, deal_id: &str) -> anyhow::Result<Option<BrokerPosition>> {
        let url = format!("{}/api/v1/positions/{deal_id}", self.base_url);
        let response = self.request(Method::GET, &url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let wrapper: crate::types::PositionWrapper = Self::decode(response).await?;
        Ok(Some(wrapper.position.into_domain()))
    }

    async fn activity_since(&self, from_ts: i64) -> anyhow::Result<Vec<ActivityEvent>> {
        let path = format!(
            "/api/v1/history/activity?from={}&detailed=true",
            epoch_ms_to_rfc3339(from_ts)
        );
        let response: ActivityResponse = self.get_json(&path).await.context("activity_since")?;
        Ok(response
            .activities
            .into_iter()
            .filter_map(crate::types::RawActivity::into_domain)
            .collect())
    }

    async fn refresh_session(&self) -> anyhow::Result<()> {
        CapitalClient::refresh_session(self).await?;
        Ok(())
    }

    async fn end_session(&self) {
        self.destroy_session().await;
    }
}
