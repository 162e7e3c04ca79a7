//! Application configuration.
//!
//! Layered the same way everywhere the bot runs: an optional
//! `config/Config.toml` first, then `GOLDBOT_`-prefixed environment
//! variables on top (`GOLDBOT_CAPITAL__API_KEY`, `GOLDBOT_TRADING__...`).
//! Every tunable has a default matching the live XAUUSD deployment so a
//! bare environment with just credentials is runnable.

use anyhow::Result;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub capital: CapitalConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub ml: MlConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

impl AppConfig {
    /// Loads configuration by merging the optional TOML file with
    /// `GOLDBOT_`-prefixed environment variables.
    ///
    /// # Errors
    /// Returns an error if a provided value cannot be parsed into its field.
    pub fn load() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file("config/Config.toml"))
            .merge(Env::prefixed("GOLDBOT_").split("__"))
            .extract()?;
        Ok(config)
    }
}

/// Capital.com credentials and instrument selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    #[serde(default)]
    pub api_key: String,
    /// Login identifier (account e-mail).
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub password: String,
    /// `demo` or `live`; selects the API host.
    #[serde(default = "default_account_type")]
    pub account_type: String,
    #[serde(default = "default_epic")]
    pub epic: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl CapitalConfig {
    /// API base URL derived from the account type.
    #[must_use]
    pub fn base_url(&self) -> &'static str {
        if self.account_type.eq_ignore_ascii_case("live") {
            "https://api-capital.backend-capital.com"
        } else {
            "https://demo-api-capital.backend-capital.com"
        }
    }
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            identifier: String::new(),
            password: String::new(),
            account_type: default_account_type(),
            epic: default_epic(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_account_type() -> String {
    "demo".to_string()
}

fn default_epic() -> String {
    "XAUUSD".to_string()
}

const fn default_http_timeout() -> u64 {
    10
}

/// Risk gates, sizing, and partial-close policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub max_trades_per_day: u32,
    pub daily_loss_limit: f64,
    pub max_consecutive_losses: u32,
    pub scalp_size: f64,
    pub swing_size: f64,
    pub swing_enabled: bool,
    /// Fraction of the position closed at TP1.
    pub partial_close_frac: f64,
    /// Move the stop to entry after TP1.
    pub move_sl_to_breakeven: bool,
    /// TP1 must clear the spread by this multiple or the order is aborted.
    pub min_tp1_spread_mult: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            max_trades_per_day: 3,
            daily_loss_limit: 10.0,
            max_consecutive_losses: 3,
            scalp_size: 1.0,
            swing_size: 1.0,
            swing_enabled: false,
            partial_close_frac: 0.5,
            move_sl_to_breakeven: true,
            min_tp1_spread_mult: 2.0,
        }
    }
}

/// Every threshold in the gate chain. Values are in ATR multiples unless
/// stated otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    // Spread gate (price units / multiples).
    pub spread_max: f64,
    pub spread_min: f64,
    pub spread_atr_mult: f64,

    // Indicator periods.
    pub ema_trend_period: usize,
    pub ema_fast_period: usize,
    pub ema_pullback_period: usize,
    pub atr_period: usize,
    pub rsi_period: usize,

    // BOS.
    pub bos_lookback_scalp: usize,
    pub bos_lookback_swing: usize,
    pub atr_margin_mult: f64,
    pub big_candle_atr_max: f64,

    // Setup lifecycle.
    pub setup_expiry_bars_scalp: usize,
    pub setup_expiry_bars_swing: usize,
    pub chop_ema_dist_atr_min: f64,
    pub invalidation_atr: f64,

    // Adaptive pullback tolerance.
    pub tol_base: f64,
    pub tol_max: f64,
    pub tol_k: f64,
    pub fast_trend_min: f64,
    pub fast_tol: f64,

    // Rejection candle.
    pub rejection_close_pct: f64,
    pub rejection_wick_pct: f64,

    // SL / TP.
    pub sl_buffer_atr: f64,
    pub tp1_atr_scalp: f64,
    pub tp2_atr_scalp: f64,
    pub tp2_r_swing: f64,

    // Quality gates.
    pub rsi_buy_min: f64,
    pub rsi_sell_max: f64,
    pub atr_abs_min: f64,
    pub atr_ratio_min: f64,
    pub atr_ratio_window: usize,
    pub body_atr_min: f64,
    pub m15_strength_min: f64,
    pub slope_lookback: usize,
    pub h1_rsi_oversold: f64,
    pub h1_rsi_overbought: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            spread_max: 0.60,
            spread_min: 0.20,
            spread_atr_mult: 0.35,

            ema_trend_period: 200,
            ema_fast_period: 20,
            ema_pullback_period: 50,
            atr_period: 14,
            rsi_period: 14,

            bos_lookback_scalp: 8,
            bos_lookback_swing: 10,
            atr_margin_mult: 0.10,
            big_candle_atr_max: 1.50,

            setup_expiry_bars_scalp: 6,
            setup_expiry_bars_swing: 12,
            chop_ema_dist_atr_min: 0.12,
            invalidation_atr: 0.25,

            tol_base: 0.40,
            tol_max: 0.60,
            tol_k: 0.50,
            fast_trend_min: 1.30,
            fast_tol: 0.25,

            rejection_close_pct: 0.60,
            rejection_wick_pct: 0.30,

            sl_buffer_atr: 0.10,
            tp1_atr_scalp: 0.8,
            tp2_atr_scalp: 1.6,
            tp2_r_swing: 3.0,

            rsi_buy_min: 52.0,
            rsi_sell_max: 48.0,
            atr_abs_min: 0.5,
            atr_ratio_min: 0.8,
            atr_ratio_window: 20,
            body_atr_min: 0.3,
            m15_strength_min: 0.5,
            slope_lookback: 5,
            h1_rsi_oversold: 30.0,
            h1_rsi_overbought: 70.0,
        }
    }
}

/// Classifier file locations and decision thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    pub champion_path: String,
    pub challenger_path: String,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            champion_path: "models/current.json".to_string(),
            challenger_path: "models/challenger.json".to_string(),
            buy_threshold: 0.62,
            sell_threshold: 0.38,
        }
    }
}

/// Optional Postgres sink; persistence is disabled when `url` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

const fn default_max_connections() -> u32 {
    5
}

/// Optional Telegram notification sink; disabled without a token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

/// Poll cadences and candle-store sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub tick_secs: u64,
    pub m1_secs: u64,
    pub m5_secs: u64,
    pub m15_secs: u64,
    pub h1_secs: u64,
    pub h4_secs: u64,
    pub reconcile_secs: u64,
    pub status_secs: u64,
    pub session_refresh_secs: u64,
    pub quote_flush_secs: u64,
    /// Bars loaded per timeframe at startup (also the retention cap).
    pub history_bars: usize,
    /// Bars fetched per incremental update.
    pub incremental_bars: usize,
    /// Consecutive list misses before a direct position lookup.
    pub reconcile_miss_threshold: u32,
    /// Deal confirmation polling budget.
    pub confirm_attempts: u32,
    pub confirm_delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            tick_secs: 5,
            m1_secs: 10,
            m5_secs: 30,
            m15_secs: 60,
            h1_secs: 300,
            h4_secs: 1200,
            reconcile_secs: 60,
            status_secs: 60,
            session_refresh_secs: 540,
            quote_flush_secs: 10,
            history_bars: 300,
            incremental_bars: 6,
            reconcile_miss_threshold: 3,
            confirm_attempts: 6,
            confirm_delay_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_live_deployment() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.capital.epic, "XAUUSD");
        assert_eq!(cfg.trading.max_trades_per_day, 3);
        assert!((cfg.strategy.sl_buffer_atr - 0.10).abs() < 1e-12);
        assert!((cfg.strategy.tp1_atr_scalp - 0.8).abs() < 1e-12);
        assert_eq!(cfg.poll.history_bars, 300);
        assert_eq!(cfg.poll.reconcile_miss_threshold, 3);
        assert!(cfg.database.url.is_none());
    }

    #[test]
    fn account_type_selects_host() {
        let mut cap = CapitalConfig::default();
        assert!(cap.base_url().contains("demo-api"));
        cap.account_type = "LIVE".to_string();
        assert!(!cap.base_url().contains("demo"));
    }

    #[test]
    fn config_deserializes_from_partial_toml() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [capital]
            api_key = "k"
            identifier = "me@example.com"
            password = "pw"

            [trading]
            max_trades_per_day = 5
            daily_loss_limit = 25.0
            max_consecutive_losses = 4
            scalp_size = 2.0
            swing_size = 1.0
            swing_enabled = true
            partial_close_frac = 0.5
            move_sl_to_breakeven = false
            min_tp1_spread_mult = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.trading.max_trades_per_day, 5);
        assert!(cfg.trading.swing_enabled);
        // Untouched sections fall back to defaults.
        assert_eq!(cfg.strategy.bos_lookback_scalp, 8);
    }
}
