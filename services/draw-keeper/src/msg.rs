use cosmwasm_schema::cw_serde;
use cosmwasm_std::Uint128;
use holder_lottery_common::DEFAULT_BALANCE_PER_TICKET;

use crate::error::KeeperError;
use crate::retry::RetryPolicy;

/// Keeper configuration, usually read from a JSON file at startup.
#[cw_serde]
#[serde(deny_unknown_fields)]
pub struct KeeperConfig {
    /// Token whose holders take part in the draw
    pub token_mint: String,
    /// Owners never eligible (liquidity pool, treasury, ...)
    #[serde(default)]
    pub excluded_addresses: Vec<String>,
    /// Human-scale balance worth one ticket
    #[serde(default = "default_balance_per_ticket")]
    pub balance_per_ticket: Uint128,
    /// Minute offsets within each hour at which a draw is due (UTC)
    #[serde(default = "default_draw_minutes")]
    pub draw_minutes: Vec<u32>,
    /// How long a finished draw stays in Announcing
    #[serde(default = "default_announce_seconds")]
    pub announce_seconds: u64,
    #[serde(default = "default_step_timeout_seconds")]
    pub randomness_timeout_seconds: u64,
    /// Outer timeout for every external step other than randomness
    #[serde(default = "default_step_timeout_seconds")]
    pub step_timeout_seconds: u64,
    #[serde(default)]
    pub randomness_retry: RetryPolicy,
    #[serde(default)]
    pub swap_retry: RetryPolicy,
    #[serde(default)]
    pub fee_mode: FeeMode,
    /// Holders included in status payloads
    #[serde(default = "default_status_holder_limit")]
    pub status_holder_limit: u32,
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// How often unclaimed fees are re-read while waiting
    #[serde(default = "default_fee_poll_seconds")]
    pub fee_poll_seconds: u64,
}

/// Where the fee amounts for a draw come from.
#[cw_serde]
#[derive(Default)]
pub enum FeeMode {
    /// Query and claim through the fee collaborator.
    #[default]
    Live,
    /// Fixed jackpot already held by the prize wallet; nothing is claimed.
    Fixed {
        base_fee: Uint128,
        quote_fee: Uint128,
    },
}

fn default_balance_per_ticket() -> Uint128 {
    Uint128::new(DEFAULT_BALANCE_PER_TICKET)
}

fn default_draw_minutes() -> Vec<u32> {
    vec![0, 45]
}

fn default_announce_seconds() -> u64 {
    30
}

fn default_step_timeout_seconds() -> u64 {
    300
}

fn default_status_holder_limit() -> u32 {
    25
}

fn default_tick_interval_seconds() -> u64 {
    60
}

fn default_fee_poll_seconds() -> u64 {
    10
}

impl KeeperConfig {
    pub fn new(token_mint: impl Into<String>) -> Self {
        KeeperConfig {
            token_mint: token_mint.into(),
            excluded_addresses: vec![],
            balance_per_ticket: default_balance_per_ticket(),
            draw_minutes: default_draw_minutes(),
            announce_seconds: default_announce_seconds(),
            randomness_timeout_seconds: default_step_timeout_seconds(),
            step_timeout_seconds: default_step_timeout_seconds(),
            randomness_retry: RetryPolicy::default(),
            swap_retry: RetryPolicy::default(),
            fee_mode: FeeMode::Live,
            status_holder_limit: default_status_holder_limit(),
            tick_interval_seconds: default_tick_interval_seconds(),
            fee_poll_seconds: default_fee_poll_seconds(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, KeeperError> {
        let config: KeeperConfig =
            serde_json::from_str(json).map_err(|e| KeeperError::InvalidConfig {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), KeeperError> {
        let invalid = |reason: &str| {
            Err(KeeperError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.token_mint.is_empty() {
            return invalid("token_mint must not be empty");
        }
        if self.balance_per_ticket.is_zero() {
            return invalid("balance_per_ticket must be greater than zero");
        }
        if self.draw_minutes.is_empty() {
            return invalid("draw_minutes must not be empty");
        }
        if self.draw_minutes.iter().any(|m| *m >= 60) {
            return invalid("draw_minutes entries must be below 60");
        }
        if self.announce_seconds == 0 {
            return invalid("announce_seconds must be greater than zero");
        }
        if self.randomness_timeout_seconds == 0 || self.step_timeout_seconds == 0 {
            return invalid("step timeouts must be greater than zero");
        }
        if self.tick_interval_seconds == 0 || self.fee_poll_seconds == 0 {
            return invalid("poll intervals must be greater than zero");
        }
        self.randomness_retry.validate("randomness_retry")?;
        self.swap_retry.validate("swap_retry")?;
        Ok(())
    }
}
