//! Multi-round negotiation sessions: land annexation, irrigation funding
//! and hidden-land disclosure.
//!
//! STATES: Active -> Resolved (terminal).
//!
//! RULES:
//!   - At most one active session per (territory, counterpart). A second
//!     start is rejected; the first wins.
//!   - One round per utterance. A session at its round limit resolves on
//!     the next evaluation from the last signal, without consuming a reply.
//!   - A failed delegate attempt never resolves the session. At the limit
//!     the round counter is rolled back so the player keeps one attempt.
//!   - Each round works on copies of the session, county and counterpart
//!     and commits them together.
//!   - Resolution writes straight into the village ledgers.

use crate::{
    county::{clamp_metric, CountyState},
    error::{SimError, SimResult},
    ledger,
    rng::SubsystemRng,
    territory::{Counterpart, Delegate, SpeakerRole},
    types::{Month, SessionId, TerritoryId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fallback threshold on the last willingness value.
const FALLBACK_WILLINGNESS: f64 = 0.5;
const DEFAULT_WILLINGNESS: f64 = 0.3;
const DEFAULT_CONTRIBUTION: f64 = 20.0;
const ATTITUDE_CLAMP: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationEventType {
    Annexation,
    Irrigation,
    HiddenLand,
}

impl NegotiationEventType {
    pub fn max_rounds(&self) -> u32 {
        match self {
            Self::Annexation => 8,
            Self::Irrigation => 12,
            Self::HiddenLand => 8,
        }
    }

    /// Score a delegate must reach to settle the matter alone.
    pub fn delegate_threshold(&self) -> f64 {
        match self {
            Self::Annexation => 0.68,
            Self::HiddenLand => 0.70,
            Self::Irrigation => 0.55,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Annexation => "annexation",
            Self::Irrigation => "irrigation funding",
            Self::HiddenLand => "hidden land",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    StopAnnexation,
    ProceedAnnexation,
    Accept,
    Refuse,
    DeclareAll,
}

impl FinalDecision {
    /// Parse a decision, accepting only those legal for `event_type`.
    pub fn parse_for(event_type: NegotiationEventType, raw: &str) -> Option<Self> {
        let decision = match raw.trim() {
            "stop_annexation" => Self::StopAnnexation,
            "proceed_annexation" => Self::ProceedAnnexation,
            "accept" => Self::Accept,
            "refuse" => Self::Refuse,
            "declare_all" => Self::DeclareAll,
            _ => return None,
        };
        decision.valid_for(event_type).then_some(decision)
    }

    pub fn valid_for(&self, event_type: NegotiationEventType) -> bool {
        matches!(
            (event_type, self),
            (NegotiationEventType::Annexation, Self::StopAnnexation | Self::ProceedAnnexation)
                | (NegotiationEventType::Irrigation, Self::Accept | Self::Refuse)
                | (NegotiationEventType::HiddenLand, Self::DeclareAll | Self::Refuse)
        )
    }

    /// The outcome a successful delegate secures.
    pub fn favorable(event_type: NegotiationEventType) -> Self {
        match event_type {
            NegotiationEventType::Annexation => Self::StopAnnexation,
            NegotiationEventType::Irrigation => Self::Accept,
            NegotiationEventType::HiddenLand => Self::DeclareAll,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StopAnnexation => "stop_annexation",
            Self::ProceedAnnexation => "proceed_annexation",
            Self::Accept => "accept",
            Self::Refuse => "refuse",
            Self::DeclareAll => "declare_all",
        }
    }
}

/// Event-specific parameters fixed when a session opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationContext {
    Annexation {
        village: String,
        current_pct: f64,
        proposed_pct_increase: f64,
    },
    Irrigation {
        village: String,
        max_contribution: f64,
    },
    HiddenLand {
        village: String,
        hidden_land: i64,
        current_farmland: i64,
        current_gentry_pct: f64,
    },
}

impl NegotiationContext {
    pub fn event_type(&self) -> NegotiationEventType {
        match self {
            Self::Annexation { .. } => NegotiationEventType::Annexation,
            Self::Irrigation { .. } => NegotiationEventType::Irrigation,
            Self::HiddenLand { .. } => NegotiationEventType::HiddenLand,
        }
    }

    pub fn village(&self) -> &str {
        match self {
            Self::Annexation { village, .. }
            | Self::Irrigation { village, .. }
            | Self::HiddenLand { village, .. } => village,
        }
    }

    fn max_contribution(&self) -> f64 {
        match self {
            Self::Irrigation { max_contribution, .. } => *max_contribution,
            _ => 0.0,
        }
    }
}

/// A proposal raised by settlement or by an investment; the engine
/// turns it into a session with the village's counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationTrigger {
    pub village: String,
    pub context: NegotiationContext,
}

/// A counterpart reply as received from whatever produced it.
/// Every field is optional and loosely typed; `normalize` repairs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawReply {
    pub dialogue: Option<String>,
    pub attitude_change: Option<f64>,
    pub willingness_to_stop: Option<f64>,
    pub willingness_to_declare: Option<f64>,
    pub contribution_offer: Option<f64>,
    pub final_decision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReply {
    pub dialogue: String,
    pub attitude_change: f64,
    /// Willingness (annexation, hidden land) or contribution offer (irrigation).
    pub signal: f64,
    pub final_decision: Option<FinalDecision>,
}

fn finite_or(value: Option<f64>, default: f64) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(default)
}

/// Clamp a raw reply to the response contract of `context`.
pub fn normalize_reply(context: &NegotiationContext, raw: &RawReply) -> NormalizedReply {
    let event_type = context.event_type();
    let signal = match event_type {
        NegotiationEventType::Annexation => {
            finite_or(raw.willingness_to_stop, DEFAULT_WILLINGNESS).clamp(0.0, 1.0)
        }
        NegotiationEventType::HiddenLand => {
            finite_or(raw.willingness_to_declare, DEFAULT_WILLINGNESS).clamp(0.0, 1.0)
        }
        NegotiationEventType::Irrigation => finite_or(raw.contribution_offer, DEFAULT_CONTRIBUTION)
            .trunc()
            .clamp(0.0, context.max_contribution().max(0.0)),
    };
    NormalizedReply {
        dialogue: raw
            .dialogue
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "(silence)".to_string()),
        attitude_change: finite_or(raw.attitude_change, 0.0).trunc().clamp(-ATTITUDE_CLAMP, ATTITUDE_CLAMP),
        signal,
        final_decision: raw
            .final_decision
            .as_deref()
            .and_then(|d| FinalDecision::parse_for(event_type, d)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionEffect {
    Annexed { land: i64, population: i64 },
    AnnexationStopped,
    HiddenLandDiscovered { discovered: i64, forced: bool },
    ContributionAccepted { amount: f64 },
    ContributionRefused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    pub final_decision: FinalDecision,
    pub signal: f64,
    pub fallback: bool,
    pub delegated: bool,
    pub effect: ResolutionEffect,
    pub affinity_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round: u32,
    pub speaker: SpeakerRole,
    pub utterance: String,
    pub reply: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationSession {
    pub id: SessionId,
    pub territory: TerritoryId,
    pub counterpart: String,
    pub event_type: NegotiationEventType,
    pub status: SessionStatus,
    pub current_round: u32,
    pub max_rounds: u32,
    pub context: NegotiationContext,
    pub outcome: Option<NegotiationOutcome>,
    /// Signal of the most recent reply; the round-limit fallback reads it.
    pub last_signal: f64,
    pub history: Vec<HistoryEntry>,
    pub opened_month: Month,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl NegotiationSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// False once the next evaluation will resolve by fallback.
    pub fn needs_reply(&self) -> bool {
        self.is_active() && self.current_round < self.max_rounds
    }

    fn default_signal(context: &NegotiationContext) -> f64 {
        match context.event_type() {
            NegotiationEventType::Irrigation => 0.0,
            _ => DEFAULT_WILLINGNESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationTurnResult {
    pub session_id: SessionId,
    pub counterpart: String,
    pub event_type: NegotiationEventType,
    pub speaker: SpeakerRole,
    pub dialogue: String,
    pub round: u32,
    pub max_rounds: u32,
    pub status: SessionStatus,
    pub final_decision: Option<FinalDecision>,
    pub handoff_to_player: bool,
    pub handoff_message: String,
    pub outcome: Option<NegotiationOutcome>,
    pub treasury: Option<f64>,
}

/// Delegate bonus by role and event type.
pub fn delegate_role_bonus(role: SpeakerRole, event_type: NegotiationEventType) -> f64 {
    use NegotiationEventType::*;
    match (role, event_type) {
        (SpeakerRole::Advisor, Annexation) => 0.10,
        (SpeakerRole::Advisor, HiddenLand) => 0.12,
        (SpeakerRole::Advisor, Irrigation) => 0.08,
        (SpeakerRole::Deputy, Annexation) => 0.06,
        (SpeakerRole::Deputy, HiddenLand) => 0.08,
        (SpeakerRole::Deputy, Irrigation) => 0.06,
        (SpeakerRole::Player, _) => 0.0,
    }
}

/// Delegate bonus from personality, intelligence and the delegate's
/// standing with the player.
pub fn delegate_trait_bonus(delegate: Option<&Delegate>) -> f64 {
    let Some(d) = delegate else {
        return 0.0;
    };
    let intelligence = (d.intelligence / 10.0).clamp(0.0, 1.0);
    let affinity = d.affinity.clamp(-99.0, 99.0);
    0.05 * d.personality.conscientiousness()
        + 0.03 * d.personality.agreeableness()
        + 0.03 * intelligence
        + (affinity - 50.0) * 0.0006
}

fn signal_score(context: &NegotiationContext, signal: f64) -> f64 {
    match context.event_type() {
        NegotiationEventType::Irrigation => {
            let max = context.max_contribution().trunc().max(1.0);
            signal.max(0.0) / max
        }
        _ => signal.clamp(0.0, 1.0),
    }
}

/// Decision the round-limit fallback reaches from the last signal.
pub fn fallback_decision(event_type: NegotiationEventType, signal: f64) -> FinalDecision {
    match event_type {
        NegotiationEventType::Annexation if signal >= FALLBACK_WILLINGNESS => FinalDecision::StopAnnexation,
        NegotiationEventType::Annexation => FinalDecision::ProceedAnnexation,
        NegotiationEventType::HiddenLand if signal >= FALLBACK_WILLINGNESS => FinalDecision::DeclareAll,
        NegotiationEventType::HiddenLand => FinalDecision::Refuse,
        NegotiationEventType::Irrigation if signal > 0.0 => FinalDecision::Accept,
        NegotiationEventType::Irrigation => FinalDecision::Refuse,
    }
}

/// The mutable world one round may touch.
pub struct RoundParties<'a> {
    pub county: &'a mut CountyState,
    pub counterpart: &'a mut Counterpart,
    pub delegate: Option<&'a Delegate>,
    /// Governor knowledge, 0..=10.
    pub knowledge: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnInput {
    pub utterance: String,
    pub speaker: SpeakerRole,
}

/// All sessions of a run, keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegotiationBook {
    sessions: BTreeMap<SessionId, NegotiationSession>,
}

impl NegotiationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book from stored sessions.
    pub fn from_sessions(sessions: Vec<NegotiationSession>) -> Self {
        Self { sessions: sessions.into_iter().map(|s| (s.id.clone(), s)).collect() }
    }

    pub fn get(&self, id: &str) -> Option<&NegotiationSession> {
        self.sessions.get(id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &NegotiationSession> {
        self.sessions.values()
    }

    pub fn active_for(&self, territory: &str) -> Vec<&NegotiationSession> {
        self.sessions
            .values()
            .filter(|s| s.is_active() && s.territory == territory)
            .collect()
    }

    pub fn active_with(&self, territory: &str, counterpart: &str) -> Option<&NegotiationSession> {
        self.sessions
            .values()
            .find(|s| s.is_active() && s.territory == territory && s.counterpart == counterpart)
    }

    /// Open a session. Rejected while another is active with the same counterpart.
    /// The id is a v4 uuid drawn from `rng`, so seeded runs replay their ids.
    pub fn start(
        &mut self,
        territory: &str,
        counterpart: &Counterpart,
        context: NegotiationContext,
        month: Month,
        rng: &mut SubsystemRng,
    ) -> SimResult<SessionId> {
        if let Some(existing) = self.active_with(territory, &counterpart.id) {
            return Err(SimError::conflict(format!(
                "already negotiating {} with {} in {}",
                existing.event_type.label(),
                counterpart.name,
                counterpart.village
            )));
        }
        let event_type = context.event_type();
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&rng.next_u64().to_le_bytes());
        bytes[8..].copy_from_slice(&rng.next_u64().to_le_bytes());
        let id = uuid::Builder::from_random_bytes(bytes).into_uuid().to_string();
        let session = NegotiationSession {
            id: id.clone(),
            territory: territory.to_string(),
            counterpart: counterpart.id.clone(),
            event_type,
            status: SessionStatus::Active,
            current_round: 0,
            max_rounds: event_type.max_rounds(),
            last_signal: NegotiationSession::default_signal(&context),
            context,
            outcome: None,
            history: Vec::new(),
            opened_month: month,
            created_at: chrono::Utc::now(),
        };
        log::info!(
            "month={month} territory={territory} negotiation opened: {} with {}",
            event_type.label(),
            counterpart.id
        );
        self.sessions.insert(id.clone(), session);
        Ok(id)
    }

    /// Run one round. `reply` is ignored when the session is already at
    /// its round limit.
    pub fn negotiate_round(
        &mut self,
        session_id: &str,
        input: TurnInput,
        reply: &RawReply,
        parties: RoundParties<'_>,
        rng: &mut SubsystemRng,
    ) -> SimResult<NegotiationTurnResult> {
        let stored = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SimError::SessionNotFound { id: session_id.to_string() })?;
        if !stored.is_active() {
            return Err(SimError::SessionClosed { id: session_id.to_string() });
        }
        if stored.counterpart != parties.counterpart.id {
            return Err(SimError::validation(format!(
                "session {session_id} is not with {}",
                parties.counterpart.id
            )));
        }

        let mut session = stored.clone();
        let mut county = parties.county.clone();
        let mut counterpart = parties.counterpart.clone();
        let speaker = input.speaker;

        let mut result = NegotiationTurnResult {
            session_id: session.id.clone(),
            counterpart: counterpart.name.clone(),
            event_type: session.event_type,
            speaker,
            dialogue: String::new(),
            round: session.current_round,
            max_rounds: session.max_rounds,
            status: SessionStatus::Active,
            final_decision: None,
            handoff_to_player: false,
            handoff_message: String::new(),
            outcome: None,
            treasury: None,
        };

        if session.current_round >= session.max_rounds {
            let decision = fallback_decision(session.event_type, session.last_signal);
            let signal = session.last_signal;
            let outcome = resolve(&mut session, decision, signal, true, false, &mut county, &mut counterpart, parties.knowledge, rng);
            result.dialogue = format!("{} gives a final answer: {}", counterpart.name, decision.name());
            result.final_decision = Some(decision);
            result.outcome = Some(outcome);
        } else {
            session.current_round += 1;
            let normalized = normalize_reply(&session.context, reply);
            session.last_signal = normalized.signal;
            session.history.push(HistoryEntry {
                round: session.current_round,
                speaker,
                utterance: input.utterance.clone(),
                reply: normalized.dialogue.clone(),
            });
            counterpart.adjust_affinity(normalized.attitude_change);
            result.dialogue = normalized.dialogue.clone();

            let mut decision = normalized.final_decision;
            let mut signal = normalized.signal;
            let mut delegated = false;

            if speaker.is_delegate() {
                match delegate_attempt(&session, &normalized, speaker, parties.delegate) {
                    Some((favorable, secured_signal)) => {
                        decision = Some(favorable);
                        signal = secured_signal;
                        delegated = true;
                    }
                    None => {
                        decision = None;
                        result.handoff_to_player = true;
                        result.handoff_message = handoff_message(speaker);
                        if session.current_round >= session.max_rounds && session.max_rounds > 0 {
                            session.current_round = session.max_rounds - 1;
                        }
                    }
                }
            }

            if let Some(decision) = decision {
                let outcome = resolve(&mut session, decision, signal, false, delegated, &mut county, &mut counterpart, parties.knowledge, rng);
                result.final_decision = Some(decision);
                result.outcome = Some(outcome);
            } else if !result.handoff_to_player && session.current_round >= session.max_rounds {
                let decision = fallback_decision(session.event_type, signal);
                let outcome = resolve(&mut session, decision, signal, true, false, &mut county, &mut counterpart, parties.knowledge, rng);
                result.final_decision = Some(decision);
                result.outcome = Some(outcome);
            }
        }

        result.round = session.current_round;
        result.status = session.status;
        if session.status == SessionStatus::Resolved {
            result.treasury = Some((county.treasury * 10.0).round() / 10.0);
        }

        *parties.county = county;
        *parties.counterpart = counterpart;
        self.sessions.insert(session.id.clone(), session);
        Ok(result)
    }
}

fn handoff_message(role: SpeakerRole) -> String {
    match role {
        SpeakerRole::Advisor => "The advisor could not settle it; your excellency must step in.".to_string(),
        _ => "The deputy could not settle it; your excellency must decide in person.".to_string(),
    }
}

/// One delegate attempt. Returns the secured decision and signal on success.
fn delegate_attempt(
    session: &NegotiationSession,
    reply: &NormalizedReply,
    role: SpeakerRole,
    delegate: Option<&Delegate>,
) -> Option<(FinalDecision, f64)> {
    let event_type = session.event_type;
    let favorable = FinalDecision::favorable(event_type);
    let score = signal_score(&session.context, reply.signal)
        + delegate_role_bonus(role, event_type)
        + delegate_trait_bonus(delegate);
    let explicit = match event_type {
        NegotiationEventType::Irrigation => reply.final_decision == Some(favorable) && reply.signal > 0.0,
        _ => reply.final_decision == Some(favorable),
    };
    log::debug!(
        "delegate attempt on {}: role={role:?} score={score:.3} threshold={:.2}",
        session.id,
        event_type.delegate_threshold()
    );
    if !(explicit || score >= event_type.delegate_threshold()) {
        return None;
    }
    let signal = if event_type == NegotiationEventType::Irrigation && reply.signal <= 0.0 {
        (session.context.max_contribution() * 0.2).trunc().max(1.0)
    } else {
        reply.signal
    };
    Some((favorable, signal))
}

#[allow(clippy::too_many_arguments)]
fn resolve(
    session: &mut NegotiationSession,
    decision: FinalDecision,
    signal: f64,
    fallback: bool,
    delegated: bool,
    county: &mut CountyState,
    counterpart: &mut Counterpart,
    knowledge: f64,
    rng: &mut SubsystemRng,
) -> NegotiationOutcome {
    let affinity_before = counterpart.affinity;
    let effect = apply_resolution(&session.context, decision, signal, county, counterpart, knowledge, rng);
    let outcome = NegotiationOutcome {
        final_decision: decision,
        signal,
        fallback,
        delegated,
        effect,
        affinity_change: counterpart.affinity - affinity_before,
    };
    session.status = SessionStatus::Resolved;
    session.outcome = Some(outcome.clone());
    log::info!(
        "negotiation {} resolved: {} fallback={fallback} delegated={delegated}",
        session.id,
        decision.name()
    );
    outcome
}

/// Write a resolution into the ledgers and the counterpart's standing.
pub fn apply_resolution(
    context: &NegotiationContext,
    decision: FinalDecision,
    signal: f64,
    county: &mut CountyState,
    counterpart: &mut Counterpart,
    knowledge: f64,
    rng: &mut SubsystemRng,
) -> ResolutionEffect {
    let bailiff_level = county.bailiff_level;
    let effect = match (context, decision) {
        (NegotiationContext::Annexation { village, proposed_pct_increase, .. }, FinalDecision::ProceedAnnexation) => {
            let Some(v) = county.village_mut(village) else {
                return ResolutionEffect::Annexed { land: 0, population: 0 };
            };
            let target_pct = (v.gentry_land_pct + proposed_pct_increase).min(crate::constants::MAX_GENTRY_LAND_PCT);
            let peasant_land = v.peasant_ledger.farmland.max(0);
            let gentry_land = v.gentry_ledger.registered_farmland.max(0);
            let desired = ((peasant_land + gentry_land) as f64 * target_pct).round() as i64;
            let annexed = (desired - gentry_land).clamp(0, peasant_land);
            let (land, population) = ledger::transfer_peasant_land_to_gentry(v, annexed);
            v.morale = clamp_metric(v.morale - 8.0);
            counterpart.adjust_affinity(5.0);
            ResolutionEffect::Annexed { land, population }
        }
        (NegotiationContext::Annexation { .. }, _) => {
            counterpart.adjust_affinity(-8.0);
            ResolutionEffect::AnnexationStopped
        }
        (NegotiationContext::HiddenLand { village, .. }, decision) => {
            let Some(v) = county.village_mut(village) else {
                return ResolutionEffect::HiddenLandDiscovered { discovered: 0, forced: false };
            };
            let hidden = v.gentry_ledger.hidden_farmland.max(0);
            if decision == FinalDecision::DeclareAll {
                let discovered = ledger::register_hidden_land(v, hidden);
                counterpart.adjust_affinity(-3.0);
                ResolutionEffect::HiddenLandDiscovered { discovered, forced: false }
            } else {
                let ratio = forced_survey_ratio(v.morale, bailiff_level, knowledge, rng);
                let discovered = ledger::register_hidden_land(v, (hidden as f64 * ratio) as i64);
                counterpart.adjust_affinity(-20.0);
                ResolutionEffect::HiddenLandDiscovered { discovered, forced: true }
            }
        }
        (NegotiationContext::Irrigation { village, max_contribution }, FinalDecision::Accept) if signal > 0.0 => {
            county.treasury += signal;
            if let Some(inv) = county
                .active_investments
                .iter_mut()
                .find(|inv| inv.action == crate::investment::InvestmentAction::BuildIrrigation)
            {
                inv.gentry_contributions.push(crate::county::GentryContribution {
                    village: village.clone(),
                    counterpart: counterpart.id.clone(),
                    amount: signal,
                });
            }
            if *max_contribution > 0.0 {
                counterpart.adjust_affinity(-(8.0 * signal / max_contribution).trunc());
            }
            ResolutionEffect::ContributionAccepted { amount: signal }
        }
        (NegotiationContext::Irrigation { .. }, _) => ResolutionEffect::ContributionRefused,
    };
    county.gentry_land_ratio = ledger::sync_county_gentry_ratio(county);
    effect
}

/// Share of hidden land a forced survey uncovers, in [0.5, 0.9].
pub fn forced_survey_ratio(village_morale: f64, bailiff_level: u8, knowledge: f64, rng: &mut SubsystemRng) -> f64 {
    let morale_score = (village_morale / 100.0).clamp(0.0, 1.0);
    let bailiff_score = (bailiff_level as f64 / 3.0).clamp(0.0, 1.0);
    let knowledge_score = (knowledge / 10.0).clamp(0.0, 1.0);
    let quality = 0.35 * morale_score + 0.35 * bailiff_score + 0.30 * knowledge_score;
    (0.5 + quality * 0.4 + rng.uniform(-0.03, 0.03)).clamp(0.5, 0.9)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn irrigation(max: f64) -> NegotiationContext {
        NegotiationContext::Irrigation { village: "a".into(), max_contribution: max }
    }

    #[test]
    fn normalize_clamps_and_defaults() {
        let ctx = irrigation(30.0);
        let raw = RawReply {
            attitude_change: Some(9.7),
            contribution_offer: Some(55.5),
            final_decision: Some("declare_all".into()),
            ..Default::default()
        };
        let n = normalize_reply(&ctx, &raw);
        assert_eq!(n.attitude_change, 5.0);
        assert_eq!(n.signal, 30.0);
        assert_eq!(n.final_decision, None, "declare_all is not an irrigation decision");

        let n = normalize_reply(&ctx, &RawReply::default());
        assert_eq!(n.signal, 20.0);
        assert_eq!(n.dialogue, "(silence)");

        let annex = NegotiationContext::Annexation {
            village: "a".into(),
            current_pct: 0.3,
            proposed_pct_increase: 0.05,
        };
        let n = normalize_reply(&annex, &RawReply { willingness_to_stop: Some(f64::NAN), ..Default::default() });
        assert_eq!(n.signal, DEFAULT_WILLINGNESS);
    }

    #[test]
    fn fallback_thresholds() {
        use NegotiationEventType::*;
        assert_eq!(fallback_decision(Annexation, 0.5), FinalDecision::StopAnnexation);
        assert_eq!(fallback_decision(Annexation, 0.49), FinalDecision::ProceedAnnexation);
        assert_eq!(fallback_decision(HiddenLand, 0.5), FinalDecision::DeclareAll);
        assert_eq!(fallback_decision(HiddenLand, 0.2), FinalDecision::Refuse);
        assert_eq!(fallback_decision(Irrigation, 1.0), FinalDecision::Accept);
        assert_eq!(fallback_decision(Irrigation, 0.0), FinalDecision::Refuse);
    }

    #[test]
    fn role_bonus_table() {
        assert_eq!(delegate_role_bonus(SpeakerRole::Advisor, NegotiationEventType::HiddenLand), 0.12);
        assert_eq!(delegate_role_bonus(SpeakerRole::Deputy, NegotiationEventType::Irrigation), 0.06);
        assert_eq!(delegate_role_bonus(SpeakerRole::Player, NegotiationEventType::Annexation), 0.0);
    }
}
