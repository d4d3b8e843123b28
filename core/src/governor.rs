//! Governor decisions and counterpart replies: the collaborator seams.
//!
//! RULES:
//!   - A collaborator is any external decision source. It may fail or hang;
//!     `call_with_timeout` bounds the wait and converts both into a fallback.
//!   - Fallbacks are rule-based and deterministic for a given seed.
//!   - A rejected order is recorded and skipped. It never aborts the month.

use crate::{
    command::{InvestmentOrder, TerritoryDecision},
    config::NegotiationConfig,
    constants::{TAX_RATE_MAX, TAX_RATE_MIN},
    county::{round2, CountyState},
    investment::{self, InvestmentAction, InvestmentOutcome},
    negotiation::{NegotiationEventType, NegotiationSession, NegotiationTrigger, RawReply},
    rng::{SubsystemRng, SubsystemSlot},
    territory::{Counterpart, GovernorProfile, SpeakerRole},
    types::{Month, TerritoryId},
};
use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

/// Why a collaborator's answer was not used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    TimedOut(Duration),
    Failed(String),
    Disconnected,
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut(d) => write!(f, "no answer within {} ms", d.as_millis()),
            Self::Failed(e) => write!(f, "collaborator failed: {e}"),
            Self::Disconnected => write!(f, "collaborator exited without answering"),
        }
    }
}

/// Run `call` on a worker thread and wait at most `timeout` for it.
/// A late answer is dropped; the worker is left to finish on its own.
pub fn call_with_timeout<T, F>(call: F, timeout: Duration) -> Result<T, CallFailure>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(call());
    });
    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CallFailure::Failed(e.to_string())),
        Err(RecvTimeoutError::Timeout) => Err(CallFailure::TimedOut(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(CallFailure::Disconnected),
    }
}

/// What a decision provider sees of one territory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub territory: TerritoryId,
    pub month: Month,
    pub county: CountyState,
    pub profile: GovernorProfile,
    pub available: Vec<InvestmentAction>,
}

/// An external source of monthly decisions for peer territories.
pub trait DecisionProvider: Send + Sync {
    fn decide(&self, request: &DecisionRequest) -> anyhow::Result<TerritoryDecision>;
}

/// Ask `provider` for a decision, giving up after `timeout`.
pub fn decide_with_timeout(
    provider: Arc<dyn DecisionProvider>,
    request: DecisionRequest,
    timeout: Duration,
) -> Result<TerritoryDecision, CallFailure> {
    call_with_timeout(move || provider.decide(&request), timeout)
}

/// Everything a counterpart reply may depend on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub session: NegotiationSession,
    pub counterpart: Counterpart,
    pub utterance: String,
    pub speaker: SpeakerRole,
    pub month: Month,
    /// Seed for any randomness the responder needs.
    pub seed: u64,
}

/// Produces a counterpart's reply to one utterance.
pub trait CounterpartResponder: Send + Sync {
    fn reply(&self, request: &ReplyRequest) -> anyhow::Result<RawReply>;
}

/// Ask `responder` for a reply, giving up after `timeout`.
pub fn reply_with_timeout(
    responder: Arc<dyn CounterpartResponder>,
    request: ReplyRequest,
    timeout: Duration,
) -> Result<RawReply, CallFailure> {
    call_with_timeout(move || responder.reply(&request), timeout)
}

/// Deterministic counterpart: warmer with agreeable temperament, good
/// standing and a long conversation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedResponder;

impl RuleBasedResponder {
    pub fn reply_now(&self, request: &ReplyRequest) -> RawReply {
        let mut rng = SubsystemRng::new(request.seed, SubsystemSlot::Negotiation as u64);
        let c = &request.counterpart;
        let session = &request.session;
        let willingness = (0.15
            + 0.35 * c.personality.agreeableness()
            + (c.affinity - 50.0) / 250.0
            + session.current_round as f64 * 0.04
            + rng.uniform(-0.08, 0.08))
        .clamp(0.0, 1.0);
        let attitude = if request.utterance.trim().is_empty() { -1.0 } else { rng.uniform(-2.0, 3.0).round() };
        let mut reply = RawReply {
            attitude_change: Some(attitude),
            ..Default::default()
        };
        match session.event_type {
            NegotiationEventType::Annexation => {
                reply.willingness_to_stop = Some(willingness);
                reply.dialogue = Some(format!("{} weighs your words on the land purchases.", c.name));
            }
            NegotiationEventType::HiddenLand => {
                reply.willingness_to_declare = Some(willingness);
                reply.dialogue = Some(format!("{} insists the registers are in order.", c.name));
            }
            NegotiationEventType::Irrigation => {
                let max = match &session.context {
                    crate::negotiation::NegotiationContext::Irrigation { max_contribution, .. } => *max_contribution,
                    _ => 0.0,
                };
                reply.contribution_offer = Some((max * (willingness - 0.2).max(0.0)).trunc());
                reply.dialogue = Some(format!("{} counts what the family can spare for the canals.", c.name));
            }
        }
        reply
    }
}

impl CounterpartResponder for RuleBasedResponder {
    fn reply(&self, request: &ReplyRequest) -> anyhow::Result<RawReply> {
        Ok(self.reply_now(request))
    }
}

const RULE_MAX_PASSES: usize = 5;
const RULE_MIN_SCORE: f64 = 15.0;

/// Built-in governor used for peers and whenever a provider fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedGovernor;

impl RuleBasedGovernor {
    /// Pick this month's investments and tax rate. Works on a copy; the
    /// county passed in is not changed.
    pub fn decide(
        &self,
        county: &CountyState,
        profile: &GovernorProfile,
        month: Month,
        negotiation: &NegotiationConfig,
        rng: &mut SubsystemRng,
    ) -> TerritoryDecision {
        let mut working = county.clone();
        let investments = self.pick_investments(&mut working, profile, month, negotiation, rng);
        let tax = self.pick_tax(&working, profile);
        let tax_rate = if (tax - county.tax_rate).abs() > 0.005 { Some(tax) } else { None };
        TerritoryDecision { investments, tax_rate }
    }

    fn pick_investments(
        &self,
        county: &mut CountyState,
        profile: &GovernorProfile,
        month: Month,
        negotiation: &NegotiationConfig,
        rng: &mut SubsystemRng,
    ) -> Vec<InvestmentOrder> {
        let mut orders = Vec::new();
        for _ in 0..RULE_MAX_PASSES {
            let available = investment::available_actions(county);
            if available.is_empty() {
                break;
            }
            let reserve = 150.0 + profile.wealth * 200.0;
            if county.treasury < reserve {
                if available.contains(&InvestmentAction::Relief) {
                    let order = InvestmentOrder { action: InvestmentAction::Relief, target_village: None };
                    if investment::execute(county, order.action, None, month, negotiation).is_ok() {
                        orders.push(order);
                    }
                }
                break;
            }

            let mut best: Option<(InvestmentAction, f64)> = None;
            for action in available {
                if investment::actual_cost(county, action) > county.treasury {
                    continue;
                }
                let Some(score) = rule_score(county, profile, action) else {
                    continue;
                };
                let score = score + rng.uniform(0.0, 8.0);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((action, score));
                }
            }
            let Some((action, score)) = best else {
                break;
            };
            if score < RULE_MIN_SCORE {
                break;
            }
            let target = pick_target_village(county, action, rng);
            if action.spec().requires_village && target.is_none() {
                break;
            }
            match investment::execute(county, action, target.as_deref(), month, negotiation) {
                Ok(_) => orders.push(InvestmentOrder { action, target_village: target }),
                Err(e) => {
                    log::debug!("month={month} rule governor skipped {}: {e}", action.name());
                    break;
                }
            }
        }
        orders
    }

    /// Target tax rate for the current fiscal position.
    pub fn pick_tax(&self, county: &CountyState, profile: &GovernorProfile) -> f64 {
        let mut target = 0.12 - profile.welfare * 0.04;
        if county.treasury < 100.0 {
            target += 0.02;
        } else if county.treasury < 200.0 {
            target += 0.01;
        }
        if county.morale < 30.0 {
            target -= 0.02;
        } else if county.morale < 40.0 {
            target -= 0.01;
        }
        round2(target.clamp(TAX_RATE_MIN, TAX_RATE_MAX))
    }
}

/// Base priority of an action before noise; None when it should not be considered.
fn rule_score(county: &CountyState, profile: &GovernorProfile, action: InvestmentAction) -> Option<f64> {
    let welfare = profile.welfare;
    let reputation = profile.reputation;
    let flood_risk = county.environment.flood_risk;
    let tiered = |value: f64, low: f64, mid: f64, scores: (f64, f64, f64)| {
        if value < low {
            scores.0
        } else if value < mid {
            scores.1
        } else {
            scores.2
        }
    };
    let score = match action {
        InvestmentAction::Relief => match &county.disaster_this_year {
            Some(d) if !d.relieved => 100.0,
            _ => return None,
        },
        InvestmentAction::HireBailiffs => tiered(county.security, 35.0, 50.0, (60.0, 30.0, 10.0)) + welfare * 25.0,
        InvestmentAction::BuildIrrigation => {
            let base = if flood_risk > 0.4 {
                50.0
            } else if flood_risk > 0.2 {
                25.0
            } else {
                10.0
            };
            base + welfare * 15.0
        }
        InvestmentAction::ExpandSchool => tiered(county.education, 30.0, 50.0, (40.0, 20.0, 5.0)) + reputation * 25.0,
        InvestmentAction::ReclaimLand => {
            let max_gentry = county.villages.iter().map(|v| v.gentry_land_pct).fold(0.0, f64::max);
            (if max_gentry > 0.5 { 35.0 } else { 15.0 }) + welfare * 20.0
        }
        InvestmentAction::RepairRoads => tiered(county.commercial, 35.0, 50.0, (35.0, 20.0, 5.0)) + reputation * 15.0,
        InvestmentAction::BuildMedical => {
            let base = match county.medical_level {
                0 => 45.0,
                1 => 25.0,
                _ => 10.0,
            };
            base + welfare * 20.0
        }
        InvestmentAction::BuildGranary => (if flood_risk > 0.3 { 40.0 } else { 20.0 }) + welfare * 15.0,
        InvestmentAction::FundVillageSchool => {
            if county.villages.iter().all(|v| v.has_school) {
                return None;
            }
            20.0 + reputation * 15.0
        }
        InvestmentAction::SurveyLand => return None,
    };
    Some(score)
}

fn pick_target_village(county: &CountyState, action: InvestmentAction, rng: &mut SubsystemRng) -> Option<String> {
    match action {
        InvestmentAction::ReclaimLand => county
            .villages
            .iter()
            .filter(|v| investment::validate(county, action, Some(&v.name)).is_ok())
            .fold(None::<&crate::county::VillageState>, |best, v| match best {
                Some(b) if b.gentry_land_pct >= v.gentry_land_pct => Some(b),
                _ => Some(v),
            })
            .map(|v| v.name.clone()),
        InvestmentAction::FundVillageSchool => {
            let candidates: Vec<&str> = county
                .villages
                .iter()
                .filter(|v| !v.has_school)
                .map(|v| v.name.as_str())
                .collect();
            if candidates.is_empty() {
                None
            } else {
                Some(rng.pick(&candidates).to_string())
            }
        }
        _ => None,
    }
}

/// Tax rates above 1 are read as percentages.
pub fn normalize_tax_rate(raw: f64) -> Option<f64> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let rate = if raw > 1.0 { raw / 100.0 } else { raw };
    Some(rate.clamp(TAX_RATE_MIN, TAX_RATE_MAX))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub order: InvestmentOrder,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub started: Vec<InvestmentOutcome>,
    pub rejected: Vec<Rejection>,
    /// (old, new) when the rate actually changed.
    pub tax_change: Option<(f64, f64)>,
    pub tax_rejected: Option<String>,
    pub triggers: Vec<NegotiationTrigger>,
}

/// Apply a decision item by item. Invalid items are recorded and skipped.
pub fn apply_decision(
    county: &mut CountyState,
    decision: &TerritoryDecision,
    month: Month,
    negotiation: &NegotiationConfig,
) -> DecisionOutcome {
    let mut outcome = DecisionOutcome::default();
    for order in &decision.investments {
        match investment::execute(county, order.action, order.target_village.as_deref(), month, negotiation) {
            Ok(started) => {
                outcome.triggers.extend(started.triggers.iter().cloned());
                outcome.started.push(started);
            }
            Err(e) => {
                log::debug!("month={month} order {} rejected: {e}", order.action.name());
                outcome.rejected.push(Rejection { order: order.clone(), reason: e.to_string() });
            }
        }
    }
    if let Some(raw) = decision.tax_rate {
        match normalize_tax_rate(raw) {
            Some(rate) if (rate - county.tax_rate).abs() > f64::EPSILON => {
                outcome.tax_change = Some((county.tax_rate, rate));
                county.tax_rate = rate;
            }
            Some(_) => {}
            None => outcome.tax_rejected = Some(format!("tax rate {raw} is not a valid rate")),
        }
    }
    outcome
}

/// Fill whatever a provider left out with the rule-based choice.
pub fn fill_from_default(decision: TerritoryDecision, default: TerritoryDecision) -> TerritoryDecision {
    TerritoryDecision {
        investments: if decision.investments.is_empty() { default.investments } else { decision.investments },
        tax_rate: decision.tax_rate.or(default.tax_rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    impl DecisionProvider for Slow {
        fn decide(&self, _request: &DecisionRequest) -> anyhow::Result<TerritoryDecision> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(TerritoryDecision::default())
        }
    }

    fn request() -> DecisionRequest {
        DecisionRequest {
            territory: "peer-1".into(),
            month: 1,
            county: CountyState::standard(),
            profile: GovernorProfile::default(),
            available: Vec::new(),
        }
    }

    #[test]
    fn slow_provider_times_out() {
        let result = decide_with_timeout(Arc::new(Slow), request(), Duration::from_millis(20));
        assert!(matches!(result, Err(CallFailure::TimedOut(_))));
    }

    #[test]
    fn tax_input_accepts_percentages() {
        assert_eq!(normalize_tax_rate(12.0), Some(0.12));
        assert_eq!(normalize_tax_rate(0.30), Some(0.15));
        assert_eq!(normalize_tax_rate(0.05), Some(0.09));
        assert_eq!(normalize_tax_rate(f64::NAN), None);
    }

    #[test]
    fn rule_tax_leans_on_treasury_and_morale() {
        let mut county = CountyState::standard();
        let profile = GovernorProfile { welfare: 0.5, wealth: 0.1, reputation: 0.1 };
        county.treasury = 50.0;
        county.morale = 60.0;
        assert_eq!(RuleBasedGovernor.pick_tax(&county, &profile), 0.12);
        county.treasury = 500.0;
        county.morale = 25.0;
        assert_eq!(RuleBasedGovernor.pick_tax(&county, &profile), 0.09);
    }

    #[test]
    fn rule_governor_leaves_input_untouched() {
        let county = CountyState::standard();
        let before = serde_json::to_string(&county).expect("serialize");
        let mut rng = SubsystemRng::new(7, SubsystemSlot::Governor as u64);
        let _ = RuleBasedGovernor.decide(&county, &GovernorProfile::default(), 1, &NegotiationConfig::default(), &mut rng);
        assert_eq!(serde_json::to_string(&county).expect("serialize"), before);
    }
}
