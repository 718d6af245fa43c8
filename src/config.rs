// 7.0 config.rs: all settings in one place. vault fees, leverage, funding, router and timelock params.
// 7.1 loads from json so deployments can ship a file instead of recompiling.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{Bps, Leverage, Usd};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;

/** 7.2: vault-side parameters. fees in bps, 100 bps = 1% */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultParams {
    // Hard cap on size / collateral
    pub max_leverage: Leverage,
    // Fee on every size change
    pub margin_fee_bps: Bps,
    // Flat fee paid to the liquidator
    pub liquidation_fee_usd: Usd,
    // Funding settles once per interval
    pub funding_interval_ms: i64,
    // Funding per interval at 100% utilisation, volatile collateral
    pub funding_rate_factor: Decimal,
    // Funding per interval at 100% utilisation, stable collateral
    pub stable_funding_rate_factor: Decimal,
    // Profits under the token's min_profit_bps are ignored for this long after an increase
    pub min_profit_time_ms: i64,
}

impl Default for VaultParams {
    fn default() -> Self {
        Self {
            max_leverage: Leverage::new_unchecked(dec!(50)),
            margin_fee_bps: Bps::new(10),             // 0.1%
            liquidation_fee_usd: Usd::new(dec!(5)),   // $5
            funding_interval_ms: 8 * HOUR_MS,
            funding_rate_factor: dec!(0.0001),        // 0.01% per interval
            stable_funding_rate_factor: dec!(0.0001),
            min_profit_time_ms: 0,
        }
    }
}

/** 7.3: entry router parameters */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterParams {
    // Fee on collateral that lowers leverage, taken in tokens
    pub deposit_fee_bps: Bps,
    // Slack allowed in the leverage comparison to absorb swap slippage
    pub increase_position_buffer_bps: Bps,
}

impl Default for RouterParams {
    fn default() -> Self {
        Self {
            deposit_fee_bps: Bps::new(50),              // 0.5%
            increase_position_buffer_bps: Bps::new(100), // 1%
        }
    }
}

/** 7.4: timelock parameters */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelockParams {
    pub buffer_ms: i64,
    pub max_buffer_ms: i64,
    // Signalled actions expire this long after their eta
    pub grace_period_ms: i64,
    // Cap on margin fee writes made through the timelock
    pub max_margin_fee_bps: Bps,
}

impl Default for TimelockParams {
    fn default() -> Self {
        Self {
            buffer_ms: 5 * DAY_MS,
            max_buffer_ms: 5 * DAY_MS,
            grace_period_ms: 14 * DAY_MS,
            max_margin_fee_bps: Bps::new(100),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub vault: VaultParams,
    pub router: RouterParams,
    pub timelock: TimelockParams,
}

impl ProtocolConfig {
    // Looser preset for test deployments: lower leverage cap, no min profit window, short buffer
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.vault.max_leverage = Leverage::new_unchecked(dec!(20));
        config.timelock.buffer_ms = HOUR_MS;
        config
    }

    // Mainnet preset with a profit window against oracle front-running
    pub fn conservative() -> Self {
        let mut config = Self::default();
        config.vault.max_leverage = Leverage::new_unchecked(dec!(30));
        config.vault.min_profit_time_ms = 3 * 60 * 60 * 1000;
        config.router.increase_position_buffer_bps = Bps::new(50);
        config
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vault.max_leverage.value() <= Decimal::ONE {
            return Err(ConfigError::InvalidVault {
                reason: "max leverage must be above 1x".to_string(),
            });
        }

        if self.vault.margin_fee_bps.value() > 500 {
            return Err(ConfigError::InvalidFees {
                reason: "margin fee too high (>5%)".to_string(),
            });
        }

        if self.vault.funding_interval_ms < HOUR_MS {
            return Err(ConfigError::InvalidVault {
                reason: "funding interval must be at least one hour".to_string(),
            });
        }

        if self.vault.funding_rate_factor < Decimal::ZERO
            || self.vault.stable_funding_rate_factor < Decimal::ZERO
        {
            return Err(ConfigError::InvalidVault {
                reason: "funding rate factors must not be negative".to_string(),
            });
        }

        if self.router.deposit_fee_bps.value() >= 10_000 {
            return Err(ConfigError::InvalidFees {
                reason: "deposit fee must be below 100%".to_string(),
            });
        }

        if self.timelock.buffer_ms > self.timelock.max_buffer_ms {
            return Err(ConfigError::InvalidTimelock {
                reason: "buffer exceeds max buffer".to_string(),
            });
        }

        if self.vault.margin_fee_bps > self.timelock.max_margin_fee_bps {
            return Err(ConfigError::InvalidTimelock {
                reason: "margin fee above timelock cap".to_string(),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid vault params: {reason}")]
    InvalidVault { reason: String },

    #[error("invalid fees: {reason}")]
    InvalidFees { reason: String },

    #[error("invalid timelock params: {reason}")]
    InvalidTimelock { reason: String },

    #[error("config parse error: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> ProtocolConfig {
        match self {
            Environment::Development => ProtocolConfig::default(),
            Environment::Testnet => ProtocolConfig::testnet(),
            Environment::Mainnet => ProtocolConfig::conservative(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ProtocolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vault.margin_fee_bps, Bps::new(10));
        assert_eq!(config.router.deposit_fee_bps, Bps::new(50));
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Testnet.config().validate().is_ok());
        assert!(Environment::Mainnet.config().validate().is_ok());
        assert_eq!(Environment::Testnet.config().vault.max_leverage.value(), dec!(20));
    }

    #[test]
    fn test_invalid_margin_fee() {
        let mut config = ProtocolConfig::default();
        config.vault.margin_fee_bps = Bps::new(600);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFees { .. })));
    }

    #[test]
    fn test_margin_fee_above_timelock_cap() {
        let mut config = ProtocolConfig::default();
        config.vault.margin_fee_bps = Bps::new(150);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimelock { .. })));
    }

    #[test]
    fn test_json_round_trip() {
        let config = ProtocolConfig::conservative();
        let json = config.to_json().unwrap();
        let back = ProtocolConfig::from_json(&json).unwrap();
        assert_eq!(back.vault.min_profit_time_ms, config.vault.min_profit_time_ms);
        assert_eq!(back.router.increase_position_buffer_bps, Bps::new(50));
    }

    #[test]
    fn test_bad_json_rejected() {
        assert!(matches!(
            ProtocolConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
