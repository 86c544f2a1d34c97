//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Strongly-typed engine configuration loaded from the process environment (and a `.env` file
// when present). Every recognised option is a struct field; unknown enum values and unparsable
// numbers are rejected at load time.
//
// | Name                | Description                                              |
// |---------------------|----------------------------------------------------------|
// | Config              | Root configuration                                       |
// | ServerConfig        | HTTP bind address                                        |
// | RiskConfig          | Daily limit ceilings, policy and risk heuristics         |
// | VerificationLimits  | Ceiling per verification level                           |
// | LimitPolicy         | Enforce (reject) or Advisory (flag only)                 |
// | FeeSchedule         | Book-match and P2P settlement fees                       |
// | TradingConfig       | Tick interval and open-order caps                        |
// | EventConfig         | Event bus capacity and persistence directory             |
//--------------------------------------------------------------------------------------------------

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use dotenv::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::models::types::{FeePayer, VerificationLevel};

const BIND_ADDR: &str = "P2P_BIND_ADDR";
const LIMIT_POLICY: &str = "P2P_LIMIT_POLICY";
const LIMIT_UNVERIFIED: &str = "P2P_LIMIT_UNVERIFIED";
const LIMIT_LEVEL_1: &str = "P2P_LIMIT_LEVEL_1";
const LIMIT_LEVEL_2: &str = "P2P_LIMIT_LEVEL_2";
const LIMIT_LEVEL_3: &str = "P2P_LIMIT_LEVEL_3";
const LIMIT_UTC_OFFSET_MINUTES: &str = "P2P_LIMIT_UTC_OFFSET_MINUTES";
const NEAR_LIMIT_RATIO: &str = "P2P_NEAR_LIMIT_RATIO";
const VELOCITY_WINDOW_MINUTES: &str = "P2P_VELOCITY_WINDOW_MINUTES";
const VELOCITY_MAX_ORDERS: &str = "P2P_VELOCITY_MAX_ORDERS";
const MIN_COUNTERPARTY_REPUTATION: &str = "P2P_MIN_COUNTERPARTY_REPUTATION";
const TAKER_FEE_RATE: &str = "P2P_TAKER_FEE_RATE";
const SETTLEMENT_FEE_PERCENT: &str = "P2P_SETTLEMENT_FEE_PERCENT";
const SETTLEMENT_FEE_FIXED: &str = "P2P_SETTLEMENT_FEE_FIXED";
const TICK_INTERVAL_MS: &str = "P2P_TICK_INTERVAL_MS";
const MAX_GRID_LEVELS: &str = "P2P_MAX_GRID_LEVELS";
const MAX_OPEN_ORDERS: &str = "P2P_MAX_OPEN_ORDERS";
const MAX_OCO_ORDERS: &str = "P2P_MAX_OCO_ORDERS";
const DEPTH_LIMIT: &str = "P2P_DEPTH_LIMIT";
const EVENT_BUS_CAPACITY: &str = "P2P_EVENT_BUS_CAPACITY";
const EVENTS_DIR: &str = "P2P_EVENTS_DIR";

/// Errors raised while loading configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Whether the daily limit blocks order creation or only annotates the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPolicy {
    Enforce,
    #[default]
    Advisory,
}

impl FromStr for LimitPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enforce" | "hard" => Ok(Self::Enforce),
            "advisory" | "soft" => Ok(Self::Advisory),
            _ => Err(()),
        }
    }
}

/// Daily ceiling per verification level, in fiat units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationLimits {
    pub unverified: Decimal,
    pub level_1: Decimal,
    pub level_2: Decimal,
    pub level_3: Decimal,
}

impl VerificationLimits {
    pub fn ceiling(&self, level: VerificationLevel) -> Decimal {
        match level {
            VerificationLevel::Unverified => self.unverified,
            VerificationLevel::Level1 => self.level_1,
            VerificationLevel::Level2 => self.level_2,
            VerificationLevel::Level3 => self.level_3,
        }
    }
}

impl Default for VerificationLimits {
    fn default() -> Self {
        Self {
            unverified: dec!(1000),
            level_1: dec!(1000),
            level_2: dec!(10000),
            level_3: dec!(50000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub limits: VerificationLimits,
    pub policy: LimitPolicy,
    /// Offset used to find "local midnight" for the daily window
    pub utc_offset_minutes: i32,
    /// Orders above `ratio * ceiling` are flagged as near the limit
    pub near_limit_ratio: Decimal,
    pub velocity_window_minutes: i64,
    pub velocity_max_orders: usize,
    /// Counterparties scoring below this are flagged (rejected under `Enforce`)
    pub min_counterparty_reputation: Option<Decimal>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            limits: VerificationLimits::default(),
            policy: LimitPolicy::default(),
            utc_offset_minutes: 0,
            near_limit_ratio: dec!(0.8),
            velocity_window_minutes: 30,
            velocity_max_orders: 5,
            min_counterparty_reputation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Fraction of the quote amount charged on book matches
    pub taker_fee_rate: Decimal,
    /// Percent of the order total charged on P2P settlement
    pub settlement_fee_percent: Decimal,
    pub settlement_fee_fixed: Decimal,
    pub settlement_fee_payer: FeePayer,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            taker_fee_rate: dec!(0.001),
            settlement_fee_percent: Decimal::ZERO,
            settlement_fee_fixed: Decimal::ZERO,
            settlement_fee_payer: FeePayer::Seller,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    pub tick_interval_ms: u64,
    pub max_grid_levels: u32,
    pub max_open_orders: usize,
    pub max_open_oco_groups: usize,
    pub depth_limit: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            max_grid_levels: 50,
            max_open_orders: 100,
            max_open_oco_groups: 10,
            depth_limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    pub bus_capacity: usize,
    pub persistence_dir: Option<PathBuf>,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { bus_capacity: 1024, persistence_dir: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub risk: RiskConfig,
    pub fees: FeeSchedule,
    pub trading: TradingConfig,
    pub events: EventConfig,
}

impl Config {
    pub fn try_from_env() -> Result<Config, ConfigError> {
        // Load .env file
        dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!(
            "Loaded configuration: bind={} policy={:?}",
            config.server.bind_addr, config.risk.policy
        );
        Ok(config)
    }

    /// Builds a configuration from an arbitrary key lookup, falling back to defaults for
    /// missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &'static str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server = ServerConfig {
            bind_addr: parse_or(get(BIND_ADDR), BIND_ADDR, defaults.server.bind_addr)?,
        };

        let limits = VerificationLimits {
            unverified: parse_or(get(LIMIT_UNVERIFIED), LIMIT_UNVERIFIED, defaults.risk.limits.unverified)?,
            level_1: parse_or(get(LIMIT_LEVEL_1), LIMIT_LEVEL_1, defaults.risk.limits.level_1)?,
            level_2: parse_or(get(LIMIT_LEVEL_2), LIMIT_LEVEL_2, defaults.risk.limits.level_2)?,
            level_3: parse_or(get(LIMIT_LEVEL_3), LIMIT_LEVEL_3, defaults.risk.limits.level_3)?,
        };

        let policy = match get(LIMIT_POLICY) {
            Some(raw) => raw
                .parse::<LimitPolicy>()
                .map_err(|_| ConfigError::Invalid { key: LIMIT_POLICY, value: raw.clone() })?,
            None => defaults.risk.policy,
        };

        let utc_offset_minutes: i32 =
            parse_or(get(LIMIT_UTC_OFFSET_MINUTES), LIMIT_UTC_OFFSET_MINUTES, defaults.risk.utc_offset_minutes)?;
        if utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Invalid {
                key: LIMIT_UTC_OFFSET_MINUTES,
                value: utc_offset_minutes.to_string(),
            });
        }

        let min_counterparty_reputation = match get(MIN_COUNTERPARTY_REPUTATION) {
            Some(raw) => Some(parse(&raw, MIN_COUNTERPARTY_REPUTATION)?),
            None => defaults.risk.min_counterparty_reputation,
        };

        let risk = RiskConfig {
            limits,
            policy,
            utc_offset_minutes,
            near_limit_ratio: parse_or(get(NEAR_LIMIT_RATIO), NEAR_LIMIT_RATIO, defaults.risk.near_limit_ratio)?,
            velocity_window_minutes: parse_or(
                get(VELOCITY_WINDOW_MINUTES),
                VELOCITY_WINDOW_MINUTES,
                defaults.risk.velocity_window_minutes,
            )?,
            velocity_max_orders: parse_or(get(VELOCITY_MAX_ORDERS), VELOCITY_MAX_ORDERS, defaults.risk.velocity_max_orders)?,
            min_counterparty_reputation,
        };

        let fees = FeeSchedule {
            taker_fee_rate: parse_or(get(TAKER_FEE_RATE), TAKER_FEE_RATE, defaults.fees.taker_fee_rate)?,
            settlement_fee_percent: parse_or(
                get(SETTLEMENT_FEE_PERCENT),
                SETTLEMENT_FEE_PERCENT,
                defaults.fees.settlement_fee_percent,
            )?,
            settlement_fee_fixed: parse_or(get(SETTLEMENT_FEE_FIXED), SETTLEMENT_FEE_FIXED, defaults.fees.settlement_fee_fixed)?,
            settlement_fee_payer: defaults.fees.settlement_fee_payer,
        };

        let trading = TradingConfig {
            tick_interval_ms: parse_or(get(TICK_INTERVAL_MS), TICK_INTERVAL_MS, defaults.trading.tick_interval_ms)?,
            max_grid_levels: parse_or(get(MAX_GRID_LEVELS), MAX_GRID_LEVELS, defaults.trading.max_grid_levels)?,
            max_open_orders: parse_or(get(MAX_OPEN_ORDERS), MAX_OPEN_ORDERS, defaults.trading.max_open_orders)?,
            max_open_oco_groups: parse_or(get(MAX_OCO_ORDERS), MAX_OCO_ORDERS, defaults.trading.max_open_oco_groups)?,
            depth_limit: parse_or(get(DEPTH_LIMIT), DEPTH_LIMIT, defaults.trading.depth_limit)?,
        };
        if trading.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid { key: TICK_INTERVAL_MS, value: "0".to_string() });
        }

        let events = EventConfig {
            bus_capacity: parse_or(get(EVENT_BUS_CAPACITY), EVENT_BUS_CAPACITY, defaults.events.bus_capacity)?,
            persistence_dir: get(EVENTS_DIR).map(PathBuf::from),
        };

        Ok(Config { server, risk, fees, trading, events })
    }
}

fn parse<T: FromStr>(raw: &str, key: &'static str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::Invalid { key, value: raw.to_string() })
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => parse(&raw, key),
        None => Ok(default),
    }
}
