//! Tunable engine parameters.
//!
//! Every section carries `#[serde(default)]`, so a partial
//! `engine.json` only overrides the keys it names.

use crate::types::Month;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Share of commercial tax kept locally, independent of remit ratio.
    pub commercial_tax_retention: f64,
    /// Annual corvée owed per liable peasant (taels); collected in halves.
    pub corvee_per_capita: f64,
    /// Fee gentry pay their helpers, as a share of gross harvest.
    pub gentry_helper_fee_rate: f64,
    /// Monthly per-capita surplus (jin) above which consumption inflates.
    pub excess_consumption_threshold: f64,
    /// Months in which the half-year corvée is collected.
    pub corvee_months: Vec<Month>,
    pub default_remit_ratio: f64,
    pub default_commercial_tax_rate: f64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            commercial_tax_retention: 0.6,
            corvee_per_capita: 0.3,
            gentry_helper_fee_rate: 0.05,
            excess_consumption_threshold: 10.0,
            corvee_months: vec![1, 5],
            default_remit_ratio: 0.65,
            default_commercial_tax_rate: 0.03,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisasterConfig {
    /// Month-of-year of the hazard check.
    pub check_month: Month,
    /// Month-of-year of the environment random walk.
    pub drift_month: Month,
    /// Probability added per percentage point of utilization above the limit.
    pub overdevelopment_rate: f64,
}

impl Default for DisasterConfig {
    fn default() -> Self {
        Self { check_month: 6, drift_month: 2, overdevelopment_rate: 0.002 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub significant_diff: f64,
    pub parity_diff: f64,
    /// Rate by number of significant dimensions (index 0..=4).
    pub rates: [f64; 5],
    /// Total flow cap as a share of own population.
    pub flow_cap: f64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            significant_diff: 15.0,
            parity_diff: 10.0,
            rates: [0.0, 0.005, 0.015, 0.02, 0.025],
            flow_cap: 0.03,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Monthly per-village chance of an annexation attempt before modifiers.
    pub annexation_base_probability: f64,
    /// Share of an irrigation project's cost the gentry may be asked to fund.
    pub irrigation_contribution_share: f64,
    pub reply_timeout_ms: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            annexation_base_probability: 0.03,
            irrigation_contribution_share: 0.5,
            reply_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Size of the per-territory settlement pool.
    pub worker_threads: usize,
    pub decision_timeout_ms: u64,
    pub snapshot_interval: Month,
    pub term_months: Month,
    pub peer_count: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            decision_timeout_ms: 2_000,
            snapshot_interval: 12,
            term_months: crate::types::TERM_MONTHS,
            peer_count: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub economy: EconomyConfig,
    pub disaster: DisasterConfig,
    pub migration: MigrationConfig,
    pub negotiation: NegotiationConfig,
    pub runtime: RuntimeConfig,
}

impl EngineConfig {
    /// Load overrides from `{data_dir}/engine.json`.
    /// In tests, use EngineConfig::default().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/engine.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runtime.worker_threads == 0 {
            anyhow::bail!("runtime.worker_threads must be at least 1");
        }
        if self.runtime.term_months == 0 {
            anyhow::bail!("runtime.term_months must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.economy.commercial_tax_retention) {
            anyhow::bail!("economy.commercial_tax_retention must be within [0, 1]");
        }
        if self.migration.parity_diff > self.migration.significant_diff {
            anyhow::bail!("migration.parity_diff must not exceed significant_diff");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"runtime": {"worker_threads": 2}}"#).expect("parse");
        assert_eq!(cfg.runtime.worker_threads, 2);
        assert_eq!(cfg.runtime.term_months, 36);
        assert_eq!(cfg.economy.corvee_months, vec![1, 5]);
        cfg.validate().expect("valid");
    }
}
