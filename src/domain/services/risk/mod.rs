//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Risk & limits gate. The daily limit is a step function of the verification level minus the
// user's order volume since local midnight. Under `LimitPolicy::Enforce` breaches are rejected;
// under `Advisory` they only annotate the order.
//
// | Name         | Description                                                   |
// |--------------|---------------------------------------------------------------|
// | DailyLimit   | Ceiling, used and remaining volume for one user               |
// | RiskGate     | Limit computation, order assessment, counterparty screening   |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::config::{LimitPolicy, RiskConfig};
use crate::domain::models::types::{RiskFlag, SimpleOrder, VerificationLevel};
use crate::domain::services::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyLimit {
    pub level: VerificationLevel,
    pub ceiling: Decimal,
    pub used: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Clone)]
pub struct RiskGate {
    config: RiskConfig,
    offset: FixedOffset,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self { config, offset }
    }

    pub fn policy(&self) -> LimitPolicy {
        self.config.policy
    }

    /// Start of the current local day, in UTC.
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        local
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| self.offset.from_local_datetime(&midnight).single())
            .map(|start| start.with_timezone(&Utc))
            .unwrap_or(now)
    }

    /// `ceiling(level) - sum(total_amount)` over the user's orders created since local midnight.
    /// Orders count whether the user is seller or buyer, whatever their status.
    pub fn daily_limit<'a>(
        &self,
        level: VerificationLevel,
        user_id: Uuid,
        orders: impl IntoIterator<Item = &'a SimpleOrder>,
        now: DateTime<Utc>,
    ) -> DailyLimit {
        let since = self.day_start(now);
        let used = orders
            .into_iter()
            .filter(|o| o.created_at >= since)
            .filter(|o| o.seller_id == Some(user_id) || o.buyer_id == Some(user_id))
            .fold(Decimal::ZERO, |used, o| used.saturating_add(o.total_amount));
        let ceiling = self.config.limits.ceiling(level);

        DailyLimit {
            level,
            ceiling,
            used,
            remaining: (ceiling - used).max(Decimal::ZERO),
        }
    }

    /// Checks a new order of `total` against the user's daily limit and heuristics.
    ///
    /// # Returns
    /// Flags to attach to the order.
    ///
    /// # Errors
    /// `DailyLimitExceeded` when the order would push volume past the ceiling and the policy
    /// is `Enforce`.
    pub fn assess_order<'a>(
        &self,
        limit: &DailyLimit,
        user_id: Uuid,
        total: Decimal,
        history: impl IntoIterator<Item = &'a SimpleOrder>,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<RiskFlag>> {
        let mut flags = Vec::new();

        if limit.used.saturating_add(total) > limit.ceiling {
            match self.config.policy {
                LimitPolicy::Enforce => {
                    warn!("User {} rejected: daily limit {} exceeded", user_id, limit.ceiling);
                    return Err(EngineError::DailyLimitExceeded {
                        ceiling: limit.ceiling,
                        used: limit.used,
                        requested: total,
                    });
                }
                LimitPolicy::Advisory => {
                    warn!("User {} flagged: daily limit {} exceeded", user_id, limit.ceiling);
                    flags.push(RiskFlag::DailyLimitExceeded);
                }
            }
        }

        if total > limit.ceiling.saturating_mul(self.config.near_limit_ratio) {
            flags.push(RiskFlag::NearDailyLimit);
        }

        let window_start = now - Duration::minutes(self.config.velocity_window_minutes);
        let recent = history
            .into_iter()
            .filter(|o| o.owner_id == user_id && o.created_at >= window_start)
            .count();
        if recent >= self.config.velocity_max_orders {
            flags.push(RiskFlag::HighVelocity);
        }

        Ok(flags)
    }

    /// Screens the counterparty taking an order.
    ///
    /// # Errors
    /// `ReputationTooLow` under `Enforce` when the score is below the configured minimum.
    pub fn screen_counterparty(&self, user_id: Uuid, reputation: Decimal) -> EngineResult<Vec<RiskFlag>> {
        let Some(minimum) = self.config.min_counterparty_reputation else {
            return Ok(Vec::new());
        };
        if reputation >= minimum {
            return Ok(Vec::new());
        }
        match self.config.policy {
            LimitPolicy::Enforce => Err(EngineError::ReputationTooLow { user_id, score: reputation, minimum }),
            LimitPolicy::Advisory => Ok(vec![RiskFlag::LowReputation]),
        }
    }
}
