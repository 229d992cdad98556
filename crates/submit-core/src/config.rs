//! Configuration for the transaction manager
//!
//! [`SubmitConfig`] carries every tuning knob of the submission protocol.
//! Expiry and resubmission are counted in ledgers, not wall-clock time; the
//! only timer is the per-call [`SubmitConfig::submission_timeout`].
//!
//! ## Examples
//!
//! ### Builder style
//!
//! ```rust
//! use std::time::Duration;
//! use rtxn_submit_core::SubmitConfig;
//!
//! let config = SubmitConfig::new()
//!     .with_submission_timeout(Duration::from_secs(2))
//!     .with_last_ledger_offset(5);
//! assert!(config.validate().is_ok());
//! ```
//!
//! ### From TOML
//!
//! ```rust
//! use rtxn_submit_core::SubmitConfig;
//!
//! let config = SubmitConfig::from_toml_str(r#"
//!     submission_timeout_ms = 2500
//!     default_last_ledger_offset = 4
//!     max_fee = "20000"
//! "#).unwrap();
//! assert_eq!(config.default_last_ledger_offset, 4);
//! assert_eq!(config.submission_timeout.as_millis(), 2500);
//! ```

use std::time::Duration;

use rtxn_ledger_core::Drops;
use serde::{Deserialize, Serialize};

use crate::error::{SubmitError, SubmitResult};

/// Tuning knobs for one transaction manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// How long to wait for an answer to a single connection call before
    /// treating it as unanswered
    #[serde(rename = "submission_timeout_ms", with = "duration_ms")]
    pub submission_timeout: Duration,

    /// Ledgers past the last closed ledger used as `last_ledger_sequence`
    /// when a template leaves it unset
    pub default_last_ledger_offset: u32,

    /// Ledger closes to wait without a result before resubmitting
    pub resubmit_interval_ledgers: u32,

    /// Multiplier applied to the server's load-scaled fee
    pub fee_cushion: f64,

    /// Refuse to submit anything whose fee exceeds this
    pub max_fee: Drops,

    /// How many times a slot's filler may be regenerated after it fails
    pub max_fill_attempts: u32,

    /// Capacity of the manager's command channel
    pub command_buffer: usize,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            submission_timeout: Duration::from_secs(5),
            default_last_ledger_offset: 3,
            resubmit_interval_ledgers: 1,
            fee_cushion: 1.2,
            max_fee: Drops::new(1_000_000),
            max_fill_attempts: 3,
            command_buffer: 256,
        }
    }
}

impl SubmitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    pub fn with_last_ledger_offset(mut self, offset: u32) -> Self {
        self.default_last_ledger_offset = offset;
        self
    }

    pub fn with_resubmit_interval(mut self, ledgers: u32) -> Self {
        self.resubmit_interval_ledgers = ledgers;
        self
    }

    pub fn with_fee_cushion(mut self, cushion: f64) -> Self {
        self.fee_cushion = cushion;
        self
    }

    pub fn with_max_fee(mut self, max_fee: Drops) -> Self {
        self.max_fee = max_fee;
        self
    }

    pub fn with_max_fill_attempts(mut self, attempts: u32) -> Self {
        self.max_fill_attempts = attempts;
        self
    }

    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity;
        self
    }

    /// Parse a TOML document and validate the result
    ///
    /// Missing keys take their default values.
    pub fn from_toml_str(text: &str) -> SubmitResult<Self> {
        let config: SubmitConfig =
            toml::from_str(text).map_err(|e| SubmitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every knob is usable
    pub fn validate(&self) -> SubmitResult<()> {
        if self.submission_timeout.is_zero() {
            return Err(SubmitError::Config(
                "submission timeout must be greater than 0".to_string(),
            ));
        }
        if self.default_last_ledger_offset == 0 {
            return Err(SubmitError::Config(
                "default last ledger offset must be at least 1".to_string(),
            ));
        }
        if self.resubmit_interval_ledgers == 0 {
            return Err(SubmitError::Config(
                "resubmit interval must be at least 1 ledger".to_string(),
            ));
        }
        if !self.fee_cushion.is_finite() || self.fee_cushion < 1.0 {
            return Err(SubmitError::Config(format!(
                "fee cushion must be a finite value >= 1.0, got {}",
                self.fee_cushion
            )));
        }
        if self.max_fee == Drops::ZERO {
            return Err(SubmitError::Config("max fee must be greater than 0".to_string()));
        }
        if self.command_buffer == 0 {
            return Err(SubmitError::Config(
                "command buffer must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = SubmitConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.submission_timeout, Duration::from_secs(5));
        assert_eq!(config.default_last_ledger_offset, 3);
        assert_eq!(config.resubmit_interval_ledgers, 1);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SubmitConfig::new()
            .with_resubmit_interval(2)
            .with_max_fee(Drops::new(500))
            .with_max_fill_attempts(5)
            .with_fee_cushion(1.5);
        assert_eq!(config.resubmit_interval_ledgers, 2);
        assert_eq!(config.max_fee, Drops::new(500));
        assert_eq!(config.max_fill_attempts, 5);
        assert_eq!(config.fee_cushion, 1.5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SubmitConfig::new().with_submission_timeout(Duration::ZERO).validate().is_err());
        assert!(SubmitConfig::new().with_last_ledger_offset(0).validate().is_err());
        assert!(SubmitConfig::new().with_resubmit_interval(0).validate().is_err());
        assert!(SubmitConfig::new().with_fee_cushion(0.5).validate().is_err());
        assert!(SubmitConfig::new().with_fee_cushion(f64::NAN).validate().is_err());
        assert!(SubmitConfig::new().with_max_fee(Drops::ZERO).validate().is_err());
        assert!(SubmitConfig::new().with_command_buffer(0).validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_and_defaults() {
        let config = SubmitConfig::from_toml_str("resubmit_interval_ledgers = 3").unwrap();
        assert_eq!(config.resubmit_interval_ledgers, 3);
        assert_eq!(config.max_fill_attempts, 3);

        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("submission_timeout_ms = 5000"));
        assert_eq!(SubmitConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_toml_invalid_values_rejected() {
        assert!(matches!(
            SubmitConfig::from_toml_str("fee_cushion = 0.2"),
            Err(SubmitError::Config(_))
        ));
        assert!(matches!(
            SubmitConfig::from_toml_str("max_fee = \"lots\""),
            Err(SubmitError::Config(_))
        ));
    }
}
