use medivault_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};

use crate::{
    budget::BudgetConfig, codec::CodecConfig, dp::NoiseConfig, errors::QueryError,
    matcher::MatcherConfig,
};

/// Full engine configuration.
///
/// # TOML
/// ```text
/// [codec]
/// key = "medivault-demo-shared-key"
///
/// [budget]
/// default-total-budget = 10.0
///
/// [matcher]
/// integrity-mode = "strict"
///
/// [noise]
/// seed-hex = "0707...07"
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    pub codec: CodecConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    pub fn sample() -> Self {
        Self {
            codec: CodecConfig::sample(),
            budget: BudgetConfig::default(),
            matcher: MatcherConfig::default(),
            noise: NoiseConfig::default(),
            telemetry: TelemetryConfig::sample("medivault-engine"),
        }
    }

    /// Catches every configuration error up front rather than on first query.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.codec.key.is_empty() {
            return Err(QueryError::Configuration(
                "codec key material must not be empty".into(),
            ));
        }
        self.budget.validate()?;
        self.noise.seed()?;
        Ok(())
    }
}
