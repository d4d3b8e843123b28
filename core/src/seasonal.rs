//! Seasonal settlement: investment completions, autumn harvest, winter
//! close and land surveys.

use crate::{
    config::MigrationConfig,
    constants::{GRANARY_POP_LOSS_MULTIPLIER, LAND_UTILIZATION_LIMIT, OUTPUT_PER_MU, RELIEF_POP_LOSS_MULTIPLIER},
    county::{clamp_metric, round1, CountyState, YearSnapshot},
    disaster, investment, ledger, metrics,
    negotiation::{NegotiationContext, NegotiationTrigger},
    population::{self, PeerView, PopulationUpdate},
    rng::SubsystemRng,
    types::{year_of, Month},
};
use serde::{Deserialize, Serialize};

pub const SURVEY_SUITABLE: &str = "suitable for reclamation";
pub const SURVEY_NOT_SUITABLE: &str = "not suitable for reclamation";

/// Apply every project due by `month` and drop it from the active list.
pub fn apply_completed_investments(county: &mut CountyState, month: Month) -> Vec<String> {
    let (due, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut county.active_investments)
        .into_iter()
        .partition(|inv| inv.completion_month <= month);
    county.active_investments = remaining;
    due.iter()
        .map(|inv| investment::apply_investment_effect(county, inv))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutumnReport {
    pub total_agri_output: f64,
    pub harvest_damage: f64,
    pub disaster_population_loss: i64,
    pub agri_tax: f64,
    pub agri_remit: f64,
    pub agri_retained: f64,
    pub corvee_tax_ytd: f64,
    pub corvee_retained_ytd: f64,
    pub commercial_tax_ytd: f64,
    pub commercial_retained_ytd: f64,
    pub total_tax: f64,
    pub remit_ratio: f64,
    pub remit_to_central: f64,
    pub admin_cost: f64,
    pub net_treasury_change: f64,
    pub treasury_after: f64,
    pub peasant_harvest: f64,
}

pub struct AutumnOutcome {
    pub report: AutumnReport,
    pub population: PopulationUpdate,
    pub events: Vec<String>,
}

/// Harvest month: population year, grain and agricultural tax.
///
/// Corvée and commercial tax were already collected through the year;
/// they appear here only as year-to-date figures.
pub fn autumn_settlement(
    county: &mut CountyState,
    peers: &[PeerView],
    migration: &MigrationConfig,
    rng: &mut SubsystemRng,
) -> AutumnOutcome {
    let mut events = Vec::new();
    let population = population::annual_population_update(county, peers, migration);
    events.push(format!(
        "population {} -> {} ({:+}), migration in {} out {}",
        population.total_before,
        population.total_after,
        population.total_change,
        population.migration.inflow_total,
        population.migration.outflow_total
    ));

    let peasant_harvest = metrics::peasant_production(county, true);
    county.peasant_grain_reserve += peasant_harvest;

    let commercial = county.commercial;
    for market in &mut county.markets {
        if commercial >= 60.0 && market.merchants < 30 {
            market.merchants += 1;
        } else if commercial <= 25.0 && market.merchants > 2 {
            market.merchants -= 1;
        }
    }

    let suitability = county.environment.agriculture_suitability;
    let irrigation_bonus = county.irrigation_level as f64 * crate::constants::IRRIGATION_YIELD_BONUS;
    let gross: f64 = county
        .villages
        .iter()
        .map(|v| v.farmland.max(0) as f64 * OUTPUT_PER_MU * suitability * (1.0 + irrigation_bonus))
        .sum();
    let damage = disaster::harvest_damage(county);
    let total_agri_output = gross * (1.0 - damage);
    if damage > 0.0 {
        events.push(format!("disaster cut the harvest by {:.0} taels", gross * damage));
    }

    let mut disaster_population_loss = 0;
    if let Some(d) = county.disaster_this_year.clone() {
        for village in &mut county.villages {
            let rate = rng.uniform(0.02, d.severity / 5.0);
            let pop = village.peasant_ledger.registered_population.max(0);
            let mut loss = (pop as f64 * rate) as i64;
            if county.has_granary {
                loss = (loss as f64 * GRANARY_POP_LOSS_MULTIPLIER) as i64;
            }
            if d.relieved {
                loss = (loss as f64 * RELIEF_POP_LOSS_MULTIPLIER) as i64;
            }
            let loss = loss.clamp(0, pop);
            village.peasant_ledger.registered_population = pop - loss;
            ledger::sync_legacy_from_ledgers(village);
            disaster_population_loss += loss;
        }
        events.push(format!("lingering {} took {disaster_population_loss} lives", d.kind.name()));
        if d.relieved {
            county.morale = clamp_metric(county.morale + 2.0);
            events.push("relief steadied the people, morale +2".to_string());
        }
    }

    let agri_tax = total_agri_output * county.tax_rate * ledger::collection_efficiency(county.morale);
    let agri_remit = agri_tax * county.remit_ratio;
    let agri_retained = agri_tax - agri_remit;
    let admin = county.admin_cost;
    let net = agri_retained - admin;
    county.treasury += net;

    let fy = &county.fiscal_year;
    let total_tax = agri_tax + fy.corvee_tax + fy.commercial_tax;
    let total_remit = agri_remit + (fy.corvee_tax - fy.corvee_retained) + (fy.commercial_tax - fy.commercial_retained);

    let report = AutumnReport {
        total_agri_output: round1(total_agri_output),
        harvest_damage: damage,
        disaster_population_loss,
        agri_tax: round1(agri_tax),
        agri_remit: round1(agri_remit),
        agri_retained: round1(agri_retained),
        corvee_tax_ytd: round1(fy.corvee_tax),
        corvee_retained_ytd: round1(fy.corvee_retained),
        commercial_tax_ytd: round1(fy.commercial_tax),
        commercial_retained_ytd: round1(fy.commercial_retained),
        total_tax: round1(total_tax),
        remit_ratio: county.remit_ratio,
        remit_to_central: round1(total_remit),
        admin_cost: admin,
        net_treasury_change: round1(net),
        treasury_after: round1(county.treasury),
        peasant_harvest: round1(peasant_harvest),
    };
    events.push(format!(
        "autumn: output {:.0}, agri tax {:.0} (kept {:.0}), admin {:.0}, treasury {:+.0}",
        report.total_agri_output, report.agri_tax, report.agri_retained, admin, report.net_treasury_change
    ));
    AutumnOutcome { report, population, events }
}

/// Year end: the disaster passes and the year is recorded.
pub fn winter_settlement(county: &mut CountyState, month: Month) -> YearSnapshot {
    county.disaster_this_year = None;
    county.year_snapshot(year_of(month), month)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandSurveyReport {
    pub village: String,
    pub farmland: i64,
    pub cultivated_land: i64,
    pub land_ceiling: i64,
    pub utilization_pct: f64,
    pub verdict: String,
    pub hidden_land_suspected: bool,
}

pub fn land_survey_verdict(utilization_pct: f64) -> &'static str {
    if utilization_pct < LAND_UTILIZATION_LIMIT {
        SURVEY_SUITABLE
    } else {
        SURVEY_NOT_SUITABLE
    }
}

/// Report every queued survey. A village still concealing gentry land
/// raises a HIDDEN_LAND proposal.
pub fn run_land_surveys(county: &mut CountyState) -> (Vec<LandSurveyReport>, Vec<NegotiationTrigger>) {
    let queued = std::mem::take(&mut county.pending_land_surveys);
    let mut reports = Vec::new();
    let mut triggers = Vec::new();
    for name in queued {
        let Some(v) = county.village(&name) else {
            log::warn!("survey target {name} no longer exists");
            continue;
        };
        let utilization = v.utilization_pct();
        let hidden = v.gentry_ledger.hidden_farmland;
        let suspected = hidden > 0 && !v.hidden_land_discovered;
        reports.push(LandSurveyReport {
            village: v.name.clone(),
            farmland: v.farmland,
            cultivated_land: v.cultivated_land(),
            land_ceiling: v.land_ceiling,
            utilization_pct: round1(utilization),
            verdict: land_survey_verdict(utilization).to_string(),
            hidden_land_suspected: suspected,
        });
        if suspected {
            triggers.push(NegotiationTrigger {
                village: v.name.clone(),
                context: NegotiationContext::HiddenLand {
                    village: v.name.clone(),
                    hidden_land: hidden,
                    current_farmland: v.farmland,
                    current_gentry_pct: v.gentry_land_pct,
                },
            });
        }
    }
    (reports, triggers)
}
