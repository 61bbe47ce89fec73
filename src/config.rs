use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub polymarket: PolymarketConfig,
    pub oracle: OracleConfig,
    pub sniper: SniperConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolymarketConfig {
    pub clob_host: String,
    pub gamma_api_host: String,
    pub chain_id: u64,
    pub private_key: String,
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    pub funder_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Chainlink price relay WebSocket, e.g. wss://ws-live-data.polymarket.com/live-data
    pub ws_url: String,
    /// Spot exchange REST host used only as a settlement-price fallback.
    pub klines_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SniperConfig {
    pub dry_run: bool,
    pub initial_balance: f64,      // dry-run starting capital in USDC
    pub scan_interval_ms: u64,
    pub odds_prefetch_interval_ms: u64,
    pub http_timeout_ms: u64,      // hot-path HTTP timeout
    pub min_bet: f64,
    pub max_bet: f64,
    /// Optional external command invoked to redeem winning conditional tokens.
    pub redeem_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub stats_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polymarket: PolymarketConfig {
                clob_host: "https://clob.polymarket.com".into(),
                gamma_api_host: "https://gamma-api.polymarket.com".into(),
                chain_id: 137,
                private_key: String::new(),
                api_key: String::new(),
                api_secret: String::new(),
                passphrase: String::new(),
                funder_address: None,
            },
            oracle: OracleConfig {
                ws_url: "wss://ws-live-data.polymarket.com/live-data".into(),
                klines_host: "https://api.binance.com".into(),
            },
            sniper: SniperConfig {
                dry_run: true,
                initial_balance: 100.0,
                scan_interval_ms: 100,
                odds_prefetch_interval_ms: 100,
                http_timeout_ms: 2000,
                min_bet: 1.0,
                max_bet: 10.0,
                redeem_command: None,
            },
            telemetry: TelemetryConfig {
                log_level: "info".into(),
                stats_interval_secs: 60,
            },
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables (.env file) with defaults.
    ///
    /// Recognized env vars:
    ///   SNIPER_DRY_RUN                   — "true"/"1" to gate live I/O (default: true)
    ///   SNIPER_INITIAL_BALANCE           — dry-run starting capital (default: 100)
    ///   SNIPER_SCAN_INTERVAL_MS          — scan loop period (default: 100)
    ///   SNIPER_ODDS_PREFETCH_INTERVAL_MS — odds prefetch period (default: 100)
    ///   SNIPER_HTTP_TIMEOUT_MS           — hot-path HTTP timeout (default: 2000)
    ///   SNIPER_MIN_BET / SNIPER_MAX_BET  — stake bounds in USDC
    ///   SNIPER_REDEEM_COMMAND            — external redeem command
    ///   POLYMARKET_PRIVATE_KEY           — hex private key for order signing
    ///   POLYMARKET_API_KEY / POLYMARKET_API_SECRET / POLYMARKET_PASSPHRASE
    ///   POLYMARKET_FUNDER_ADDRESS        — proxy wallet address (optional)
    ///   RUST_LOG                         — log level (default: info)
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::default();

        if let Some(key) = env_var("POLYMARKET_PRIVATE_KEY") {
            if key != "your_private_key_here" {
                config.polymarket.private_key = key;
            }
        }
        if let Some(key) = env_var("POLYMARKET_API_KEY") {
            config.polymarket.api_key = key;
        }
        if let Some(secret) = env_var("POLYMARKET_API_SECRET") {
            config.polymarket.api_secret = secret;
        }
        if let Some(pass) = env_var("POLYMARKET_PASSPHRASE") {
            config.polymarket.passphrase = pass;
        }
        if let Some(addr) = env_var("POLYMARKET_FUNDER_ADDRESS") {
            if addr != "optional_proxy_address" {
                config.polymarket.funder_address = Some(addr);
            }
        }
        if let Some(host) = env_var("POLYMARKET_CLOB_HOST") {
            config.polymarket.clob_host = host;
        }
        if let Some(host) = env_var("POLYMARKET_GAMMA_HOST") {
            config.polymarket.gamma_api_host = host;
        }

        if let Some(url) = env_var("ORACLE_WS_URL") {
            config.oracle.ws_url = url;
        }
        if let Some(host) = env_var("KLINES_HOST") {
            config.oracle.klines_host = host;
        }

        if let Some(v) = env_var("SNIPER_DRY_RUN") {
            config.sniper.dry_run = v == "true" || v == "1";
        }
        if let Some(v) = env_parse("SNIPER_INITIAL_BALANCE") {
            config.sniper.initial_balance = v;
        }
        if let Some(v) = env_parse("SNIPER_SCAN_INTERVAL_MS") {
            config.sniper.scan_interval_ms = v;
        }
        if let Some(v) = env_parse("SNIPER_ODDS_PREFETCH_INTERVAL_MS") {
            config.sniper.odds_prefetch_interval_ms = v;
        }
        if let Some(v) = env_parse("SNIPER_HTTP_TIMEOUT_MS") {
            config.sniper.http_timeout_ms = v;
        }
        if let Some(v) = env_parse("SNIPER_MIN_BET") {
            config.sniper.min_bet = v;
        }
        if let Some(v) = env_parse("SNIPER_MAX_BET") {
            config.sniper.max_bet = v;
        }
        config.sniper.redeem_command = env_var("SNIPER_REDEEM_COMMAND");

        if let Some(level) = env_var("RUST_LOG") {
            config.telemetry.log_level = level;
        }
        if let Some(v) = env_parse("STATS_INTERVAL_SECS") {
            config.telemetry.stats_interval_secs = v;
        }

        if !config.sniper.dry_run && config.polymarket.private_key.is_empty() {
            tracing::warn!("No POLYMARKET_PRIVATE_KEY set — falling back to dry-run mode");
            config.sniper.dry_run = true;
        }

        config
    }

    pub fn is_dry_run(&self) -> bool {
        self.sniper.dry_run
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.is_dry_run() {
            tracing::info!("Dry-run mode — skipping credential validation");
        } else {
            anyhow::ensure!(
                !self.polymarket.private_key.is_empty(),
                "POLYMARKET_PRIVATE_KEY must be set (or set SNIPER_DRY_RUN=true)"
            );
            anyhow::ensure!(
                !self.polymarket.api_key.is_empty()
                    && !self.polymarket.api_secret.is_empty()
                    && !self.polymarket.passphrase.is_empty(),
                "POLYMARKET_API_KEY / API_SECRET / PASSPHRASE must all be set for live trading"
            );
        }
        anyhow::ensure!(
            self.sniper.min_bet > 0.0 && self.sniper.min_bet <= self.sniper.max_bet,
            "min_bet must be positive and <= max_bet"
        );
        anyhow::ensure!(
            self.sniper.initial_balance > 0.0,
            "initial_balance must be positive"
        );
        anyhow::ensure!(
            self.sniper.scan_interval_ms > 0 && self.sniper.odds_prefetch_interval_ms > 0,
            "scan/prefetch intervals must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.is_dry_run());
    }

    #[test]
    fn bad_bet_bounds_rejected() {
        let mut config = Config::default();
        config.sniper.min_bet = 20.0;
        config.sniper.max_bet = 10.0;
        assert!(config.validate().is_err());
    }
}
