//! Coordination configuration
//!
//! Every policy constant the graph depends on lives here so it can be
//! tuned per deployment instead of hard-coded. All fields default, so a
//! partial TOML file is valid.

use crate::error::ConfigError;
use concord_contract::{ResolutionPolicy, StabilityWeights};
use concord_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Intent resolver settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Intents below this stability are invisible to overlap detection
    pub min_stability: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { min_stability: 0.3 }
    }
}

/// Merge governor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// ESCALATE conflicts a proposal may carry and still be approved
    pub escalation_tolerance: usize,
    /// Failed attempts without progress before a branch deadlocks
    pub retry_bound: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            escalation_tolerance: 0,
            retry_bound: 2,
        }
    }
}

impl GovernorConfig {
    #[inline]
    #[must_use]
    pub fn with_escalation_tolerance(mut self, tolerance: usize) -> Self {
        self.escalation_tolerance = tolerance;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retry_bound(mut self, bound: u32) -> Self {
        self.retry_bound = bound;
        self
    }
}

/// Full configuration for one coordinated graph
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub resolver: ResolverConfig,
    pub weights: StabilityWeights,
    pub policy: ResolutionPolicy,
    pub governor: GovernorConfig,
    pub store: StoreConfig,
}

impl CoordinationConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_min_stability(mut self, min_stability: f64) -> Self {
        self.resolver.min_stability = min_stability;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_weights(mut self, weights: StabilityWeights) -> Self {
        self.weights = weights;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_governor(mut self, governor: GovernorConfig) -> Self {
        self.governor = governor;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns error on malformed TOML or out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values outside their meaningful range
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = self.resolver.min_stability;
        if !(0.0..=1.0).contains(&min) {
            return Err(ConfigError::invalid(
                "resolver.min_stability",
                format!("{min} is outside [0, 1]"),
            ));
        }
        self.weights.validate()?;
        let epsilon = self.policy.stability_tie_epsilon;
        if !epsilon.is_finite() || epsilon < 0.0 {
            return Err(ConfigError::invalid(
                "policy.stability_tie_epsilon",
                format!("{epsilon} must be a non-negative number"),
            ));
        }
        Ok(())
    }
}
