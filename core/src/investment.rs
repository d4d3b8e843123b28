//! Investment catalogue, validation and execution.
//!
//! RULES:
//!   - Validation happens before any mutation. A rejected order leaves the
//!     county untouched.
//!   - Irrigation, school and medical cost doubles per level already built.
//!   - At most one pending project per (action, target village).

use crate::{
    config::NegotiationConfig,
    constants::{
        BAILIFF_COST_PER_LEVEL, INFRA_MAX_LEVEL, IRRIGATION_MAINT_PER_LEVEL, MEDICAL_COSTS,
        VILLAGE_SCHOOL_COST,
    },
    county::{clamp_metric, CountyState, Investment},
    error::{SimError, SimResult},
    ledger,
    negotiation::{NegotiationContext, NegotiationTrigger},
    types::{next_harvest_month, Month},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentAction {
    ReclaimLand,
    BuildIrrigation,
    ExpandSchool,
    BuildMedical,
    FundVillageSchool,
    HireBailiffs,
    RepairRoads,
    BuildGranary,
    Relief,
    SurveyLand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    Immediate,
    Months(Month),
    NextHarvest,
}

#[derive(Debug, Clone, Copy)]
pub struct InvestmentSpec {
    pub base_cost: f64,
    pub delay: Delay,
    pub requires_village: bool,
    pub description: &'static str,
}

impl InvestmentAction {
    pub const ALL: [InvestmentAction; 10] = [
        Self::ReclaimLand,
        Self::BuildIrrigation,
        Self::ExpandSchool,
        Self::BuildMedical,
        Self::FundVillageSchool,
        Self::HireBailiffs,
        Self::RepairRoads,
        Self::BuildGranary,
        Self::Relief,
        Self::SurveyLand,
    ];

    pub fn spec(&self) -> InvestmentSpec {
        let (base_cost, delay, requires_village, description) = match self {
            Self::ReclaimLand => (50.0, Delay::NextHarvest, true, "reclaim wasteland"),
            Self::BuildIrrigation => (100.0, Delay::Months(6), false, "build irrigation"),
            Self::ExpandSchool => (80.0, Delay::Months(6), false, "expand county school"),
            Self::BuildMedical => (90.0, Delay::Months(4), false, "build medical hall"),
            Self::FundVillageSchool => (30.0, Delay::Months(3), true, "fund village school"),
            Self::HireBailiffs => (40.0, Delay::Immediate, false, "hire bailiffs"),
            Self::RepairRoads => (60.0, Delay::Months(1), false, "repair roads"),
            Self::BuildGranary => (70.0, Delay::Immediate, false, "open charity granary"),
            Self::Relief => (80.0, Delay::Immediate, false, "disaster relief"),
            Self::SurveyLand => (20.0, Delay::Immediate, true, "survey village land"),
        };
        InvestmentSpec { base_cost, delay, requires_village, description }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReclaimLand => "reclaim_land",
            Self::BuildIrrigation => "build_irrigation",
            Self::ExpandSchool => "expand_school",
            Self::BuildMedical => "build_medical",
            Self::FundVillageSchool => "fund_village_school",
            Self::HireBailiffs => "hire_bailiffs",
            Self::RepairRoads => "repair_roads",
            Self::BuildGranary => "build_granary",
            Self::Relief => "relief",
            Self::SurveyLand => "survey_land",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

/// Cost after price index and level scaling.
pub fn actual_cost(county: &CountyState, action: InvestmentAction) -> f64 {
    let level = match action {
        InvestmentAction::BuildIrrigation => county.irrigation_level,
        InvestmentAction::ExpandSchool => county.school_level,
        InvestmentAction::BuildMedical => county.medical_level,
        _ => 0,
    };
    (action.spec().base_cost * county.price_index * 2f64.powi(level as i32)).round()
}

/// Annual upkeep of an infrastructure line at `level`.
pub fn infra_maintenance(action: InvestmentAction, level: u8, price_index: f64) -> f64 {
    let base = match action {
        InvestmentAction::BuildIrrigation => level as f64 * IRRIGATION_MAINT_PER_LEVEL,
        InvestmentAction::BuildMedical => MEDICAL_COSTS[(level as usize).min(MEDICAL_COSTS.len() - 1)],
        _ => 0.0,
    };
    (base * price_index).round()
}

fn has_pending(county: &CountyState, action: InvestmentAction, target: Option<&str>) -> bool {
    county
        .active_investments
        .iter()
        .any(|inv| inv.action == action && inv.target_village.as_deref() == target)
}

/// Check an order against the current state without touching it.
pub fn validate(county: &CountyState, action: InvestmentAction, target_village: Option<&str>) -> SimResult<f64> {
    let spec = action.spec();
    let cost = actual_cost(county, action);
    if county.treasury < cost {
        return Err(SimError::validation(format!(
            "insufficient treasury for {}: need {cost:.0}, have {:.0}",
            spec.description, county.treasury
        )));
    }

    let target = if spec.requires_village {
        let Some(name) = target_village else {
            return Err(SimError::validation(format!("{} requires a target village", spec.description)));
        };
        let Some(village) = county.village(name) else {
            return Err(SimError::validation(format!("village '{name}' does not exist")));
        };
        Some(village)
    } else {
        None
    };

    let at_max = |level: u8, what: &str| -> SimResult<()> {
        if level >= INFRA_MAX_LEVEL {
            Err(SimError::validation(format!("{what} already at max level ({INFRA_MAX_LEVEL})")))
        } else {
            Ok(())
        }
    };
    match action {
        InvestmentAction::HireBailiffs => at_max(county.bailiff_level, "bailiffs")?,
        InvestmentAction::BuildIrrigation => at_max(county.irrigation_level, "irrigation")?,
        InvestmentAction::ExpandSchool => at_max(county.school_level, "county school")?,
        InvestmentAction::BuildMedical => at_max(county.medical_level, "medical")?,
        InvestmentAction::BuildGranary if county.has_granary => {
            return Err(SimError::validation("granary already built"));
        }
        InvestmentAction::Relief => match &county.disaster_this_year {
            None => return Err(SimError::validation("no disaster this year, relief not needed")),
            Some(d) if d.relieved => return Err(SimError::validation("relief already delivered this year")),
            Some(_) => {}
        },
        InvestmentAction::FundVillageSchool => {
            if let Some(v) = target.filter(|v| v.has_school) {
                return Err(SimError::validation(format!("{} already has a school", v.name)));
            }
        }
        InvestmentAction::SurveyLand => {
            if let Some(v) = target.filter(|v| county.pending_land_surveys.contains(&v.name)) {
                return Err(SimError::validation(format!("survey of {} already queued", v.name)));
            }
        }
        _ => {}
    }

    if spec.delay != Delay::Immediate && has_pending(county, action, target_village) {
        return Err(SimError::validation(format!("{} already in progress", spec.description)));
    }
    Ok(cost)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentOutcome {
    pub action: InvestmentAction,
    pub cost: f64,
    pub message: String,
    pub completion_month: Option<Month>,
    #[serde(default)]
    pub triggers: Vec<NegotiationTrigger>,
}

/// Validate, charge and apply (or schedule) one investment.
pub fn execute(
    county: &mut CountyState,
    action: InvestmentAction,
    target_village: Option<&str>,
    month: Month,
    negotiation: &NegotiationConfig,
) -> SimResult<InvestmentOutcome> {
    let cost = validate(county, action, target_village)?;
    let spec = action.spec();
    county.treasury -= cost;

    let mut outcome = InvestmentOutcome {
        action,
        cost,
        message: String::new(),
        completion_month: None,
        triggers: Vec::new(),
    };

    match action {
        InvestmentAction::HireBailiffs => {
            county.bailiff_level += 1;
            county.security = clamp_metric(county.security + 8.0);
            county.admin_cost_detail.bailiff += (BAILIFF_COST_PER_LEVEL * county.price_index).round();
            county.recompute_admin_cost();
            outcome.message = format!(
                "bailiffs raised to level {}, security +8, admin cost now {:.0}",
                county.bailiff_level, county.admin_cost
            );
        }
        InvestmentAction::BuildGranary => {
            county.has_granary = true;
            county.morale = clamp_metric(county.morale + 5.0);
            outcome.message = "charity granary opened, morale +5".to_string();
        }
        InvestmentAction::Relief => {
            if let Some(d) = county.disaster_this_year.as_mut() {
                d.relieved = true;
            }
            county.morale = clamp_metric(county.morale + 8.0);
            outcome.message = "relief delivered, morale +8, autumn losses reduced".to_string();
        }
        InvestmentAction::SurveyLand => {
            let name = target_village.unwrap_or_default().to_string();
            outcome.message = format!("land survey of {name} ordered");
            county.pending_land_surveys.push(name);
        }
        _ => {
            let completion = match spec.delay {
                Delay::NextHarvest => next_harvest_month(month),
                Delay::Months(n) => month + n,
                Delay::Immediate => month,
            };
            if action == InvestmentAction::BuildIrrigation {
                outcome.triggers = irrigation_triggers(county, cost, negotiation);
            }
            county.active_investments.push(Investment {
                action,
                started_month: month,
                completion_month: completion,
                target_village: target_village.map(str::to_string),
                cost,
                gentry_contributions: Vec::new(),
            });
            outcome.completion_month = Some(completion);
            outcome.message = format!("{} started for {cost:.0}, due month {completion}", spec.description);
        }
    }
    log::debug!("month={month} investment {}: {}", action.name(), outcome.message);
    Ok(outcome)
}

/// One IRRIGATION proposal per village holding gentry land, capped by its
/// share of the county's gentry land.
fn irrigation_triggers(county: &CountyState, cost: f64, negotiation: &NegotiationConfig) -> Vec<NegotiationTrigger> {
    let county_gentry: i64 = county.villages.iter().map(|v| v.gentry_ledger.registered_farmland).sum();
    if county_gentry <= 0 {
        return Vec::new();
    }
    county
        .villages
        .iter()
        .filter(|v| v.gentry_ledger.registered_farmland > 0)
        .map(|v| {
            let share = v.gentry_ledger.registered_farmland as f64 / county_gentry as f64;
            let max_contribution = (cost * negotiation.irrigation_contribution_share * share).round().max(1.0);
            NegotiationTrigger {
                village: v.name.clone(),
                context: NegotiationContext::Irrigation { village: v.name.clone(), max_contribution },
            }
        })
        .collect()
}

/// Apply the effect of a project that has reached its completion month.
pub fn apply_investment_effect(county: &mut CountyState, inv: &Investment) -> String {
    match inv.action {
        InvestmentAction::ReclaimLand => {
            let name = inv.target_village.clone().unwrap_or_default();
            let Some(village) = county.village_mut(&name) else {
                return format!("reclamation target {name} no longer exists");
            };
            let old_pct = village.gentry_land_pct;
            village.peasant_ledger.farmland += 800;
            ledger::sync_legacy_from_ledgers(village);
            village.morale = clamp_metric(village.morale + 5.0);
            let msg = format!(
                "{name} reclamation done, farmland +800, morale +5, gentry share {:.0}% -> {:.0}%",
                old_pct * 100.0,
                village.gentry_land_pct * 100.0
            );
            county.gentry_land_ratio = ledger::sync_county_gentry_ratio(county);
            msg
        }
        InvestmentAction::BuildIrrigation => {
            county.irrigation_level = (county.irrigation_level + 1).min(INFRA_MAX_LEVEL);
            let maint = infra_maintenance(inv.action, county.irrigation_level, county.price_index);
            county.admin_cost_detail.irrigation_maint = maint;
            county.recompute_admin_cost();
            format!("irrigation completed, level {}, upkeep {maint:.0}", county.irrigation_level)
        }
        InvestmentAction::ExpandSchool => {
            county.school_level = (county.school_level + 1).min(INFRA_MAX_LEVEL);
            county.education = clamp_metric(county.education + 10.0);
            format!("county school expanded, education +10, level {}", county.school_level)
        }
        InvestmentAction::BuildMedical => {
            county.medical_level = (county.medical_level + 1).min(INFRA_MAX_LEVEL);
            let maint = infra_maintenance(inv.action, county.medical_level, county.price_index);
            county.admin_cost_detail.medical_maint = maint;
            county.recompute_admin_cost();
            format!("medical hall built, level {}, upkeep {maint:.0}", county.medical_level)
        }
        InvestmentAction::FundVillageSchool => {
            let name = inv.target_village.clone().unwrap_or_default();
            let increase = (VILLAGE_SCHOOL_COST * county.price_index).round();
            let Some(village) = county.village_mut(&name) else {
                return format!("school target {name} no longer exists");
            };
            village.has_school = true;
            village.morale = clamp_metric(village.morale + 5.0);
            county.admin_cost_detail.school += increase;
            county.recompute_admin_cost();
            format!("{name} village school opened, morale +5, upkeep +{increase:.0}")
        }
        InvestmentAction::RepairRoads => {
            let bonus = 8u32.saturating_sub(county.road_repair_count) as f64;
            county.commercial = clamp_metric(county.commercial + bonus);
            county.road_repair_count += 1;
            format!("roads repaired, commercial +{bonus:.0}")
        }
        InvestmentAction::HireBailiffs
        | InvestmentAction::BuildGranary
        | InvestmentAction::Relief
        | InvestmentAction::SurveyLand => format!("{} has no delayed effect", inv.action.name()),
    }
}

/// Actions that would pass validation right now (village-targeted actions
/// are listed if any village qualifies).
pub fn available_actions(county: &CountyState) -> Vec<InvestmentAction> {
    InvestmentAction::ALL
        .into_iter()
        .filter(|action| {
            if action.spec().requires_village {
                county.villages.iter().any(|v| validate(county, *action, Some(&v.name)).is_ok())
            } else {
                validate(county, *action, None).is_ok()
            }
        })
        .collect()
}
