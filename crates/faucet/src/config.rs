//! Faucet configuration
//!
//! Every option can come from the command line or the environment (a `.env`
//! file is loaded first by the binary). Values are validated once, at
//! startup, into [`DripSettings`].

use crate::error::{FaucetError, FaucetResult};
use clap::Parser;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;
const ETHER_DECIMALS: usize = 18;
const TRANSFER_GAS: u64 = 21_000;

/// Amount of native token in its smallest unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct Wei(u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    /// Parse a decimal ether amount such as `"0.01"` or `"5"`.
    pub fn from_ether(amount: &str) -> FaucetResult<Self> {
        let amount = amount.trim();
        let invalid = || FaucetError::Config(format!("Invalid ether amount: {:?}", amount));

        let (whole, frac) = match amount.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (amount, ""),
        };

        if (whole.is_empty() && frac.is_empty())
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
            || frac.len() > ETHER_DECIMALS
        {
            return Err(invalid());
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = ETHER_DECIMALS);
            padded.parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(WEI_PER_ETHER)
            .and_then(|w| w.checked_add(frac))
            .map(Wei)
            .ok_or_else(invalid)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wei", self.0)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

/// Faucet service configuration
#[derive(Parser, Clone)]
#[command(name = "faucet", author, version, about = "Native-token faucet for EVM test networks")]
pub struct FaucetConfig {
    /// JSON-RPC endpoint of the chain node
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    /// Funding account private key (hex)
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Hours an address or IP must wait between drips
    #[arg(long, env = "COOLDOWN_HOURS", default_value_t = 48)]
    pub cooldown_hours: u64,

    /// Amount sent per drip, in ether
    #[arg(long, env = "DRIP_AMOUNT", default_value = "0.01")]
    pub drip_amount: String,

    /// Requests allowed per IP within the rate-limit window
    #[arg(long, env = "RATE_LIMIT", default_value_t = 5)]
    pub rate_limit: u32,

    /// Rate-limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    pub rate_limit_window_secs: u64,

    /// Path of the cooldown database
    #[arg(long, env = "COOLDOWN_DB_PATH", default_value = "./faucet_data")]
    pub db_path: PathBuf,

    /// Listen host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 3002)]
    pub port: u16,

    /// Gas price in wei
    #[arg(long, env = "GAS_PRICE", default_value_t = 1_000_000_000)]
    pub gas_price: u128,

    /// Gas limit per transfer
    #[arg(long, env = "GAS_LIMIT", default_value_t = TRANSFER_GAS)]
    pub gas_limit: u64,

    /// Balance the funding account must keep after a drip, in ether
    #[arg(long, env = "MIN_BALANCE", default_value = "0")]
    pub min_balance: String,

    /// Take the client IP from X-Forwarded-For
    #[arg(long, env = "TRUST_PROXY_HEADERS", default_value_t = false)]
    pub trust_proxy_headers: bool,

    /// Allow cross-origin requests
    #[arg(long, env = "CORS_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    pub cors_enabled: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl fmt::Debug for FaucetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaucetConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("cooldown_hours", &self.cooldown_hours)
            .field("drip_amount", &self.drip_amount)
            .field("rate_limit", &self.rate_limit)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("db_path", &self.db_path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("gas_price", &self.gas_price)
            .field("gas_limit", &self.gas_limit)
            .field("min_balance", &self.min_balance)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("cors_enabled", &self.cors_enabled)
            .field("log_format", &self.log_format)
            .field("debug", &self.debug)
            .finish()
    }
}

/// Validated per-request policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DripSettings {
    pub amount: Wei,
    pub cooldown: Duration,
    pub cooldown_hours: u64,
    pub min_balance: Wei,
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// Validated rate-limit pre-filter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

impl FaucetConfig {
    pub fn drip_settings(&self) -> FaucetResult<DripSettings> {
        if self.cooldown_hours == 0 {
            return Err(FaucetError::Config("COOLDOWN_HOURS must be positive".to_string()));
        }
        let cooldown_secs = self
            .cooldown_hours
            .checked_mul(3600)
            .ok_or_else(|| FaucetError::Config("COOLDOWN_HOURS is too large".to_string()))?;

        let amount = Wei::from_ether(&self.drip_amount)?;
        if amount.is_zero() {
            return Err(FaucetError::Config("DRIP_AMOUNT must be positive".to_string()));
        }

        if self.gas_limit < TRANSFER_GAS {
            return Err(FaucetError::Config(format!(
                "GAS_LIMIT must be at least {}",
                TRANSFER_GAS
            )));
        }

        Ok(DripSettings {
            amount,
            cooldown: Duration::from_secs(cooldown_secs),
            cooldown_hours: self.cooldown_hours,
            min_balance: Wei::from_ether(&self.min_balance)?,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
        })
    }

    pub fn rate_limit_settings(&self) -> FaucetResult<RateLimitSettings> {
        if self.rate_limit == 0 || self.rate_limit_window_secs == 0 {
            return Err(FaucetError::Config(
                "RATE_LIMIT and RATE_LIMIT_WINDOW_SECS must be positive".to_string(),
            ));
        }
        Ok(RateLimitSettings {
            max_requests: self.rate_limit,
            window: Duration::from_secs(self.rate_limit_window_secs),
        })
    }

    pub fn listen_addr(&self) -> FaucetResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| FaucetError::Config(format!("Invalid listen address: {}", e)))
    }
}
