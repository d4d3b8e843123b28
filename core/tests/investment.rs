//! Investment validation and execution.

use county_core::{
    config::NegotiationConfig,
    county::{CountyState, Disaster, DisasterKind},
    error::SimError,
    investment::{self, validate, InvestmentAction},
    negotiation::NegotiationContext,
};

fn rejection(county: &CountyState, action: InvestmentAction, target: Option<&str>) -> String {
    match validate(county, action, target) {
        Err(SimError::Validation { reason }) => reason,
        other => panic!("expected a validation error for {action:?}, got {other:?}"),
    }
}

#[test]
fn validation_reports_each_kind_of_rejection() {
    let mut county = CountyState::standard();
    let village = county.villages[0].name.clone();

    let mut poor = county.clone();
    poor.treasury = 1.0;
    assert!(rejection(&poor, InvestmentAction::HireBailiffs, None).contains("insufficient treasury"));

    assert!(rejection(&county, InvestmentAction::ReclaimLand, None).contains("requires a target village"));
    assert!(rejection(&county, InvestmentAction::ReclaimLand, Some("Nowhere")).contains("does not exist"));

    county.bailiff_level = 3;
    assert!(rejection(&county, InvestmentAction::HireBailiffs, None).contains("max level"));

    county.has_granary = true;
    assert!(rejection(&county, InvestmentAction::BuildGranary, None).contains("granary already built"));

    assert!(rejection(&county, InvestmentAction::Relief, None).contains("no disaster"));
    county.disaster_this_year = Some(Disaster { kind: DisasterKind::Flood, severity: 0.4, relieved: true });
    assert!(rejection(&county, InvestmentAction::Relief, None).contains("already delivered"));

    if let Some(v) = county.village_mut(&village) {
        v.has_school = true;
    }
    assert!(rejection(&county, InvestmentAction::FundVillageSchool, Some(&village)).contains("already has a school"));

    county.pending_land_surveys.push(village.clone());
    assert!(rejection(&county, InvestmentAction::SurveyLand, Some(&village)).contains("already queued"));
}

#[test]
fn delayed_projects_cannot_be_doubled() {
    let mut county = CountyState::standard();
    county.treasury = 10_000.0;
    let config = NegotiationConfig::default();

    investment::execute(&mut county, InvestmentAction::RepairRoads, None, 1, &config).expect("first roads");
    let reason = rejection(&county, InvestmentAction::RepairRoads, None);
    assert!(reason.contains("already in progress"), "got {reason}");
}

#[test]
fn rejected_orders_leave_the_county_untouched() {
    let mut county = CountyState::standard();
    county.treasury = 1.0;
    let before = county.clone();
    let result = investment::execute(&mut county, InvestmentAction::BuildMedical, None, 1, &NegotiationConfig::default());
    assert!(result.is_err());
    assert_eq!(county, before);
}

#[test]
fn irrigation_opens_a_proposal_per_gentry_village() {
    let mut county = CountyState::standard();
    county.treasury = 10_000.0;
    let treasury = county.treasury;
    let outcome = investment::execute(&mut county, InvestmentAction::BuildIrrigation, None, 2, &NegotiationConfig::default())
        .expect("irrigation");

    assert!((treasury - county.treasury - outcome.cost).abs() < 1e-9, "cost is charged up front");
    assert_eq!(outcome.completion_month, Some(8));
    let gentry_villages = county.villages.iter().filter(|v| v.gentry_ledger.registered_farmland > 0).count();
    assert_eq!(outcome.triggers.len(), gentry_villages);
    for trigger in &outcome.triggers {
        match &trigger.context {
            NegotiationContext::Irrigation { max_contribution, .. } => {
                assert!(*max_contribution >= 1.0, "each proposal asks for at least 1");
            }
            other => panic!("unexpected trigger {other:?}"),
        }
    }
}
