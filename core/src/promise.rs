//! Promises the magistrate makes at the negotiating table.
//!
//! A promise is recorded from structured terms attached to a negotiation
//! turn, with a baseline of the county figures it will be judged against.
//! Every settlement checks the pending ones against the county as it
//! stands after the month.
//!
//! RULES:
//!   - A kept promise is fulfilled even on its deadline month.
//!   - An unkept promise breaks once the month reaches its deadline.
//!   - Resolution is final; only pending promises are checked.
//!   - Integrity moves +3 on a kept promise, -5 on a broken one, within [0, 100].

use crate::{
    county::CountyState,
    error::{SimError, SimResult},
    investment::InvestmentAction,
    types::{Month, SessionId},
};
use serde::{Deserialize, Serialize};

pub const INTEGRITY_START: i32 = 50;
pub const INTEGRITY_MAX: i32 = 100;
pub const FULFILLED_INTEGRITY_GAIN: i32 = 3;
pub const BROKEN_INTEGRITY_LOSS: i32 = 5;

/// Months allowed when the terms name no deadline.
pub const DEFAULT_DEADLINE_MONTHS: Month = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseKind {
    /// Kept at or below `target_rate`; without one, any cut below the
    /// rate at the time of promising.
    LowerTax,
    BuildSchool,
    BuildIrrigation,
    Relief,
    HireBailiffs,
    ReclaimLand,
    RepairRoads,
    BuildGranary,
    /// Cannot be checked against the county; it can only lapse.
    Other,
}

impl PromiseKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LowerTax => "lower_tax",
            Self::BuildSchool => "build_school",
            Self::BuildIrrigation => "build_irrigation",
            Self::Relief => "relief",
            Self::HireBailiffs => "hire_bailiffs",
            Self::ReclaimLand => "reclaim_land",
            Self::RepairRoads => "repair_roads",
            Self::BuildGranary => "build_granary",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Broken,
}

/// What the player commits to in a negotiation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromiseTerms {
    pub kind: PromiseKind,
    #[serde(default)]
    pub target_rate: Option<f64>,
    #[serde(default)]
    pub target_village: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deadline_months: Option<Month>,
}

impl PromiseTerms {
    pub fn new(kind: PromiseKind) -> Self {
        Self { kind, target_rate: None, target_village: None, description: String::new(), deadline_months: None }
    }
}

/// County figures at the time of promising.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromiseBaseline {
    pub tax_rate: f64,
    pub irrigation_level: u8,
    pub bailiff_level: u8,
    pub road_repair_count: u32,
    /// The target village's farmland, or the county's without a target.
    #[serde(default)]
    pub farmland: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promise {
    pub id: u32,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub counterpart: String,
    pub kind: PromiseKind,
    #[serde(default)]
    pub target_rate: Option<f64>,
    #[serde(default)]
    pub target_village: Option<String>,
    pub description: String,
    pub made_month: Month,
    pub deadline_month: Month,
    pub baseline: PromiseBaseline,
    pub status: PromiseStatus,
    #[serde(default)]
    pub resolved_month: Option<Month>,
}

impl Promise {
    pub fn is_pending(&self) -> bool {
        self.status == PromiseStatus::Pending
    }
}

/// One promise settled this month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromiseResolution {
    pub promise_id: u32,
    pub kind: String,
    pub counterpart: String,
    pub description: String,
    pub status: PromiseStatus,
    pub integrity_change: i32,
    pub integrity_after: i32,
}

/// Reject terms that could never be judged.
pub fn validate_terms(county: &CountyState, terms: &PromiseTerms) -> SimResult<()> {
    if let Some(rate) = terms.target_rate {
        if !(0.0..=1.0).contains(&rate) {
            return Err(SimError::validation(format!("promised tax rate {rate} is outside [0, 1]")));
        }
    }
    if terms.deadline_months == Some(0) {
        return Err(SimError::validation("a promise needs at least one month to keep"));
    }
    if let Some(village) = &terms.target_village {
        if county.village(village).is_none() {
            return Err(SimError::validation(format!("village {village} does not exist")));
        }
    }
    Ok(())
}

/// Record a pending promise made in `month` and return it.
pub fn make_promise(
    county: &mut CountyState,
    terms: PromiseTerms,
    counterpart: &str,
    session_id: Option<SessionId>,
    month: Month,
) -> SimResult<Promise> {
    validate_terms(county, &terms)?;
    let baseline = PromiseBaseline {
        tax_rate: county.tax_rate,
        irrigation_level: county.irrigation_level,
        bailiff_level: county.bailiff_level,
        road_repair_count: county.road_repair_count,
        farmland: match terms.target_village.as_deref().and_then(|name| county.village(name)) {
            Some(village) => village.farmland,
            None => county.total_farmland(),
        },
    };
    let description = if terms.description.is_empty() {
        terms.kind.name().replace('_', " ")
    } else {
        terms.description
    };
    let id = county.promises.iter().map(|p| p.id).max().unwrap_or(0) + 1;
    let promise = Promise {
        id,
        session_id,
        counterpart: counterpart.to_string(),
        kind: terms.kind,
        target_rate: terms.target_rate,
        target_village: terms.target_village,
        description,
        made_month: month,
        deadline_month: month + terms.deadline_months.unwrap_or(DEFAULT_DEADLINE_MONTHS),
        baseline,
        status: PromiseStatus::Pending,
        resolved_month: None,
    };
    county.promises.push(promise.clone());
    Ok(promise)
}

/// Whether the county as it stands honours `promise`.
pub fn is_kept(promise: &Promise, county: &CountyState) -> bool {
    let base = &promise.baseline;
    let in_target = |name: &str| promise.target_village.as_deref().map_or(true, |t| t == name);
    match promise.kind {
        PromiseKind::LowerTax => match promise.target_rate {
            Some(target) => county.tax_rate <= target,
            None => county.tax_rate < base.tax_rate,
        },
        PromiseKind::BuildSchool => county.villages.iter().any(|v| in_target(&v.name) && v.has_school),
        PromiseKind::BuildIrrigation => county.irrigation_level > base.irrigation_level,
        // No disaster this year: nothing to relieve yet.
        PromiseKind::Relief => county.disaster_this_year.as_ref().is_some_and(|d| d.relieved),
        PromiseKind::HireBailiffs => county.bailiff_level > base.bailiff_level,
        PromiseKind::ReclaimLand => match promise.target_village.as_deref().and_then(|name| county.village(name)) {
            Some(village) => village.farmland > base.farmland,
            None => promise.target_village.is_none() && county.total_farmland() > base.farmland,
        },
        PromiseKind::RepairRoads => {
            county.road_repair_count > base.road_repair_count
                || county.active_investments.iter().any(|i| i.action == InvestmentAction::RepairRoads)
        }
        PromiseKind::BuildGranary => county.has_granary,
        PromiseKind::Other => false,
    }
}

/// Settle every pending promise for `month`.
pub fn check_promises(county: &mut CountyState, month: Month) -> Vec<PromiseResolution> {
    let verdicts: Vec<(usize, PromiseStatus)> = county
        .promises
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_pending())
        .filter_map(|(i, p)| {
            if is_kept(p, county) {
                Some((i, PromiseStatus::Fulfilled))
            } else if month >= p.deadline_month {
                Some((i, PromiseStatus::Broken))
            } else {
                None
            }
        })
        .collect();

    let mut resolutions = Vec::with_capacity(verdicts.len());
    for (index, status) in verdicts {
        let change = match status {
            PromiseStatus::Fulfilled => FULFILLED_INTEGRITY_GAIN,
            _ => -BROKEN_INTEGRITY_LOSS,
        };
        let before = county.integrity;
        county.integrity = (before + change).clamp(0, INTEGRITY_MAX);
        let promise = &mut county.promises[index];
        promise.status = status;
        promise.resolved_month = Some(month);
        resolutions.push(PromiseResolution {
            promise_id: promise.id,
            kind: promise.kind.name().to_string(),
            counterpart: promise.counterpart.clone(),
            description: promise.description.clone(),
            status,
            integrity_change: county.integrity - before,
            integrity_after: county.integrity,
        });
    }
    resolutions
}

pub fn describe(resolution: &PromiseResolution) -> String {
    let verdict = match resolution.status {
        PromiseStatus::Fulfilled => "kept",
        PromiseStatus::Broken => "broken",
        PromiseStatus::Pending => "pending",
    };
    format!(
        "promise to {} {verdict}: {} (integrity {:+})",
        resolution.counterpart, resolution.description, resolution.integrity_change
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_tax_without_target_needs_a_real_cut() {
        let mut county = CountyState::standard();
        let promise = make_promise(&mut county, PromiseTerms::new(PromiseKind::LowerTax), "elder", None, 1)
            .expect("promise");
        assert!(!is_kept(&promise, &county));
        county.tax_rate -= 0.01;
        assert!(is_kept(&promise, &county));
    }

    #[test]
    fn other_promises_only_lapse() {
        let mut county = CountyState::standard();
        let promise = make_promise(&mut county, PromiseTerms::new(PromiseKind::Other), "elder", None, 1).expect("promise");
        assert!(!is_kept(&promise, &county));
        assert_eq!(promise.deadline_month, 1 + DEFAULT_DEADLINE_MONTHS);
    }
}
