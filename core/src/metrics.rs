//! Monthly morale, security, commerce and fiscal flows.
//!
//! Morale and security use a two-way sync: half of the county-level
//! delta flows down to every village, then the county value is re-derived
//! as 70% population-weighted village mean + 30% county value.

use crate::{
    config::EconomyConfig,
    constants::ANNUAL_CONSUMPTION,
    county::{clamp_metric, round1, CountyState, FiscalYear},
    ledger,
    types::MONTHS_PER_YEAR,
};
use serde::{Deserialize, Serialize};

const BASE_DECAY: f64 = -0.33;
const VILLAGE_PROPAGATION: f64 = 0.5;
const VILLAGE_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricField {
    Morale,
    Security,
}

impl MetricField {
    fn county_value(self, county: &CountyState) -> f64 {
        match self {
            Self::Morale => county.morale,
            Self::Security => county.security,
        }
    }

    fn set_county_value(self, county: &mut CountyState, value: f64) {
        match self {
            Self::Morale => county.morale = value,
            Self::Security => county.security = value,
        }
    }
}

/// Structural monthly morale change before clamping.
pub fn morale_delta(county: &CountyState) -> f64 {
    let mut delta = BASE_DECAY + county.education / 60.0;
    if county.security > 60.0 {
        delta += 0.5;
    } else if county.security < 30.0 {
        delta -= 0.5;
    }
    if county.tax_rate > 0.15 {
        delta -= 1.0;
    }
    delta
}

/// Structural monthly security change before clamping.
pub fn security_delta(county: &CountyState) -> f64 {
    let mut delta = BASE_DECAY + county.bailiff_level as f64 * 0.67;
    if county.morale > 60.0 {
        delta += 0.33;
    } else if county.morale < 30.0 {
        delta -= 0.67;
    }
    delta
}

/// Apply one month's morale change. Returns the net change after sync.
pub fn update_morale(county: &mut CountyState) -> f64 {
    let delta = morale_delta(county);
    apply_metric_delta(county, MetricField::Morale, delta)
}

/// Apply one month's security change. Returns the net change after sync.
pub fn update_security(county: &mut CountyState) -> f64 {
    let delta = security_delta(county);
    apply_metric_delta(county, MetricField::Security, delta)
}

fn apply_metric_delta(county: &mut CountyState, field: MetricField, delta: f64) -> f64 {
    let old = field.county_value(county);
    let new = clamp_metric(old + delta);
    field.set_county_value(county, new);
    let county_delta = new - old;

    if county_delta != 0.0 {
        for v in &mut county.villages {
            let target = match field {
                MetricField::Morale => &mut v.morale,
                MetricField::Security => &mut v.security,
            };
            *target = clamp_metric(*target + county_delta * VILLAGE_PROPAGATION);
        }
    }
    sync_county_from_villages(county, field);
    field.county_value(county) - old
}

/// Re-derive the county value from the population-weighted village mean.
pub fn sync_county_from_villages(county: &mut CountyState, field: MetricField) {
    let total_pop: i64 = county.villages.iter().map(|v| v.population.max(0)).sum();
    if total_pop <= 0 {
        return;
    }
    let weighted: f64 = county
        .villages
        .iter()
        .map(|v| {
            let value = match field {
                MetricField::Morale => v.morale,
                MetricField::Security => v.security,
            };
            value * v.population.max(0) as f64
        })
        .sum();
    let avg = weighted / total_pop as f64;
    let blended = round1(VILLAGE_WEIGHT * avg + (1.0 - VILLAGE_WEIGHT) * field.county_value(county));
    field.set_county_value(county, clamp_metric(blended));
}

pub fn reset_fiscal_year(county: &mut CountyState) {
    county.fiscal_year = FiscalYear::default();
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorveeCollection {
    pub liable_population: i64,
    pub half_year_levy: f64,
    pub retained: f64,
}

/// Half-year corvée, owed by registered peasants only.
pub fn collect_corvee(county: &mut CountyState, economy: &EconomyConfig) -> CorveeCollection {
    let liable: i64 = county
        .villages
        .iter()
        .map(|v| v.peasant_ledger.registered_population.max(0))
        .sum();
    let half = liable as f64 * economy.corvee_per_capita / 2.0;
    let retained = half * (1.0 - county.remit_ratio);
    county.treasury += retained;
    county.fiscal_year.corvee_tax += half;
    county.fiscal_year.corvee_retained += retained;
    CorveeCollection { liable_population: liable, half_year_levy: half, retained }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommercialReport {
    pub reserve_after: f64,
    pub per_capita_surplus: f64,
    pub monthly_per_capita_surplus: f64,
    pub demand_factor: f64,
    pub monthly_consumption: f64,
    pub total_gmv: f64,
    pub commercial_tax: f64,
    pub commercial_retained: f64,
}

/// Demand multiplier from the monthly per-capita grain surplus.
pub fn demand_factor(monthly_per_capita_surplus: f64) -> f64 {
    (1.0 + monthly_per_capita_surplus / 20.0).clamp(0.1, 2.0)
}

/// Monthly commerce: grain surplus drives demand, markets trade,
/// commercial tax is collected and the month's grain is eaten.
pub fn update_commercial(county: &mut CountyState, economy: &EconomyConfig) -> CommercialReport {
    let total_pop: i64 = county.villages.iter().map(|v| v.population.max(0)).sum();
    let base_monthly = total_pop as f64 * ANNUAL_CONSUMPTION / MONTHS_PER_YEAR as f64;
    let annual = base_monthly * MONTHS_PER_YEAR as f64;
    let per_capita_surplus = (county.peasant_grain_reserve - annual) / total_pop.max(1) as f64;
    let monthly_pcs = per_capita_surplus / MONTHS_PER_YEAR as f64;
    let demand = demand_factor(monthly_pcs);

    let threshold = economy.excess_consumption_threshold;
    let consumption = if threshold > 0.0 && monthly_pcs > threshold {
        let ratio = monthly_pcs / threshold;
        base_monthly * (1.0 + ratio * ratio * 0.1)
    } else {
        base_monthly
    };
    county.peasant_grain_reserve -= consumption;

    let commercial = county.commercial;
    for market in &mut county.markets {
        market.gmv = round1(market.merchants as f64 * commercial * demand);
    }
    let total_gmv: f64 = county.markets.iter().map(|m| m.gmv).sum();
    let tax = total_gmv * county.commercial_tax_rate;
    let retained = tax * economy.commercial_tax_retention;
    county.treasury += retained;
    county.fiscal_year.commercial_tax += tax;
    county.fiscal_year.commercial_retained += retained;

    CommercialReport {
        reserve_after: county.peasant_grain_reserve.round(),
        per_capita_surplus: round1(per_capita_surplus),
        monthly_per_capita_surplus: round1(monthly_pcs),
        demand_factor: (demand * 100.0).round() / 100.0,
        monthly_consumption: consumption.round(),
        total_gmv,
        commercial_tax: tax,
        commercial_retained: retained,
    }
}

/// Annual after-tax peasant grain across the county.
pub fn peasant_production(county: &CountyState, include_disaster: bool) -> f64 {
    county
        .villages
        .iter()
        .map(|v| ledger::peasant_harvest_income(v, county, include_disaster))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn county_with(security: f64, education: f64) -> CountyState {
        let mut county = CountyState::blank();
        county.morale = 50.0;
        county.security = security;
        county.education = education;
        county
    }

    #[test]
    fn morale_follows_security_band() {
        let mut high = county_with(61.0, 0.0);
        update_morale(&mut high);
        assert!((high.morale - 50.17).abs() < 1e-9, "got {}", high.morale);

        let mut low = county_with(29.0, 0.0);
        update_morale(&mut low);
        assert!((low.morale - 49.17).abs() < 1e-9, "got {}", low.morale);

        let mut mid = county_with(45.0, 0.0);
        update_morale(&mut mid);
        assert!((mid.morale - 49.67).abs() < 1e-9, "got {}", mid.morale);
    }

    #[test]
    fn heavy_tax_costs_a_point() {
        let mut county = county_with(45.0, 0.0);
        county.tax_rate = 0.16;
        assert!((morale_delta(&county) - (-1.33)).abs() < 1e-9);
    }

    #[test]
    fn lean_months_run_the_reserve_into_deficit() {
        let mut county = CountyState::blank();
        let mut village = crate::county::VillageState::new("Dry Creek", 2000, 0.0, 0);
        village.population = 1200;
        county.villages.push(village);
        county.peasant_grain_reserve = 10_000.0;

        let report = update_commercial(&mut county, &EconomyConfig::default());
        assert_eq!(report.monthly_consumption, 30_000.0);
        assert!((county.peasant_grain_reserve - (-20_000.0)).abs() < 1e-9, "got {}", county.peasant_grain_reserve);

        update_commercial(&mut county, &EconomyConfig::default());
        assert!((county.peasant_grain_reserve - (-50_000.0)).abs() < 1e-9, "the deficit carries over");
    }

    #[test]
    fn demand_factor_is_clamped() {
        assert_eq!(demand_factor(100.0), 2.0);
        assert_eq!(demand_factor(-100.0), 0.1);
        assert!((demand_factor(10.0) - 1.5).abs() < 1e-9);
    }
}
