//! Environment drift and the yearly hazard roll.
//!
//! RULES:
//!   - At most one disaster per year. Table order is fixed:
//!     flood, drought, locust, plague. The first success wins.
//!   - The record persists until the year-end clear, relieved or not.

use crate::{
    config::DisasterConfig,
    constants::{IRRIGATION_DAMAGE_REDUCTION, LAND_UTILIZATION_LIMIT},
    county::{clamp_metric, CountyState, Disaster, DisasterKind, VillageState},
    ledger,
    rng::SubsystemRng,
};
use serde::{Deserialize, Serialize};

/// Plague severity, probability and morale shrink by this factor per medical level.
const MEDICAL_MITIGATION: f64 = 0.85;

/// Flood probability and flood/drought morale hits shrink by this much per irrigation level.
const IRRIGATION_RISK_MITIGATION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct HazardEntry {
    pub kind: DisasterKind,
    pub probability: f64,
    pub severity_range: (f64, f64),
    pub base_morale_hit: f64,
}

/// What a disaster did when it struck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterImpact {
    pub disaster: Disaster,
    pub morale_hit: f64,
    pub commercial_hit: f64,
    pub population_loss: i64,
}

/// Sum over villages of `rate × (utilization − 90)` for villages above 90%.
pub fn overdevelopment_bonus(villages: &[VillageState], config: &DisasterConfig) -> f64 {
    villages
        .iter()
        .map(|v| v.utilization_pct())
        .filter(|util| *util > LAND_UTILIZATION_LIMIT)
        .map(|util| config.overdevelopment_rate * (util - LAND_UTILIZATION_LIMIT))
        .sum()
}

/// The probability table for this county, in roll order.
pub fn hazard_table(county: &CountyState, config: &DisasterConfig) -> [HazardEntry; 4] {
    let env = &county.environment;
    let irrigation = county.irrigation_level as f64;
    let medical_mult = MEDICAL_MITIGATION.powi(county.medical_level as i32);
    let overdevelopment = overdevelopment_bonus(&county.villages, config);

    let flood_floor: f64 = if env.flood_risk > 0.0 { 0.02 } else { 0.0 };
    let flood = flood_floor.max(env.flood_risk * (1.0 - irrigation * IRRIGATION_RISK_MITIGATION));

    [
        HazardEntry {
            kind: DisasterKind::Flood,
            probability: flood + overdevelopment,
            severity_range: (0.4, 0.7),
            base_morale_hit: -10.0,
        },
        HazardEntry {
            kind: DisasterKind::Drought,
            probability: 0.15 * (1.0 - env.agriculture_suitability) + overdevelopment,
            severity_range: (0.3, 0.6),
            base_morale_hit: -8.0,
        },
        HazardEntry {
            kind: DisasterKind::Locust,
            probability: 0.08,
            severity_range: (0.2, 0.4),
            base_morale_hit: -5.0,
        },
        HazardEntry {
            kind: DisasterKind::Plague,
            probability: 0.05 * medical_mult,
            severity_range: (0.05, 0.15),
            base_morale_hit: -15.0,
        },
    ]
}

/// Roll the table once. Returns the impact of the disaster that struck, if any.
pub fn disaster_check(
    county: &mut CountyState,
    config: &DisasterConfig,
    rng: &mut SubsystemRng,
) -> Option<DisasterImpact> {
    if county.disaster_this_year.is_some() {
        return None;
    }
    let irrigation = county.irrigation_level as f64;
    let medical = county.medical_level as i32;

    let entry = hazard_table(county, config)
        .into_iter()
        .find(|entry| rng.chance(entry.probability))?;

    let mut severity = rng.uniform(entry.severity_range.0, entry.severity_range.1);
    if entry.kind == DisasterKind::Plague {
        severity *= MEDICAL_MITIGATION.powi(medical);
    }
    let severity = (severity * 1000.0).round() / 1000.0;

    let morale_hit = match entry.kind {
        DisasterKind::Flood | DisasterKind::Drought => {
            (entry.base_morale_hit * (1.0 - irrigation * IRRIGATION_RISK_MITIGATION)).round()
        }
        DisasterKind::Plague => (entry.base_morale_hit * MEDICAL_MITIGATION.powi(1 + medical)).round(),
        DisasterKind::Locust => entry.base_morale_hit,
    };
    let commercial_hit = (3.0 + 7.0 * severity).round();
    county.morale = clamp_metric(county.morale + morale_hit);
    county.commercial = clamp_metric(county.commercial - commercial_hit);

    let mut population_loss = 0;
    if entry.kind == DisasterKind::Plague {
        for village in &mut county.villages {
            let rate = rng.uniform(0.02, severity / 5.0);
            let pop = village.peasant_ledger.registered_population;
            let loss = ((pop as f64 * rate) as i64).clamp(0, pop);
            village.peasant_ledger.registered_population = pop - loss;
            ledger::sync_legacy_from_ledgers(village);
            population_loss += loss;
        }
    }

    let disaster = Disaster { kind: entry.kind, severity, relieved: false };
    county.disaster_this_year = Some(disaster.clone());
    Some(DisasterImpact { disaster, morale_hit, commercial_hit, population_loss })
}

/// Seasonal random walk of the environment, each variable in its own range.
pub fn drift_environment(county: &mut CountyState, rng: &mut SubsystemRng) {
    let env = &mut county.environment;
    env.agriculture_suitability = (env.agriculture_suitability + rng.uniform(-0.1, 0.1)).clamp(0.3, 1.0);
    env.flood_risk = (env.flood_risk + rng.uniform(-0.1, 0.1)).clamp(0.0, 1.0);
    env.border_threat = (env.border_threat + rng.uniform(-0.05, 0.05)).clamp(0.0, 1.0);
}

/// Fraction of this year's harvest destroyed by the current disaster.
/// Plague spares the fields.
pub fn harvest_damage(county: &CountyState) -> f64 {
    let Some(disaster) = &county.disaster_this_year else {
        return 0.0;
    };
    let damage = match disaster.kind {
        DisasterKind::Plague => 0.0,
        DisasterKind::Locust => disaster.severity,
        DisasterKind::Flood | DisasterKind::Drought => {
            let level = (county.irrigation_level as usize).min(IRRIGATION_DAMAGE_REDUCTION.len() - 1);
            disaster.severity * (1.0 - IRRIGATION_DAMAGE_REDUCTION[level])
        }
    };
    damage.clamp(0.0, 1.0)
}

/// Narrative lines for a freshly drifted environment.
pub fn environment_notes(county: &CountyState) -> Vec<String> {
    let env = &county.environment;
    let mut notes = Vec::new();
    if env.agriculture_suitability >= 0.8 {
        notes.push("Spring rains are gentle; old farmers expect a good year".to_string());
    } else if env.agriculture_suitability <= 0.4 {
        notes.push("Early drought: many fields missed the sowing".to_string());
    }
    if env.flood_risk >= 0.7 {
        notes.push("Heavy rains upstream; the dykes need watching".to_string());
    }
    if env.border_threat >= 0.5 {
        notes.push("Frontier dispatches grow urgent".to_string());
    }
    notes
}

pub fn describe_impact(impact: &DisasterImpact) -> String {
    let d = &impact.disaster;
    match d.kind {
        DisasterKind::Plague => format!(
            "Plague strikes: population -{}, morale {}, commercial -{}",
            impact.population_loss, impact.morale_hit, impact.commercial_hit
        ),
        kind => format!(
            "{} strikes, harvest loss expected {:.0}%, morale {}, commercial -{}",
            kind.name(),
            d.severity * 100.0,
            impact.morale_hit,
            impact.commercial_hit
        ),
    }
}
