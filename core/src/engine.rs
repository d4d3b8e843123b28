//! The term engine: runs every territory of a run month by month.
//!
//! EXECUTION ORDER per month (fixed, never reordered):
//!   1. Peer decisions (provider with timeout, else rule-based governor)
//!   2. Peer views built from the post-decision counties
//!   3. Settlement of every territory, in parallel on the worker pool
//!   4. Negotiation triggers raised by settlement opened as sessions
//!   5. Peer territories negotiate one round per active session
//!   6. Events, sessions and (on interval) snapshots persisted
//!
//! RULES:
//!   - A month commits for all territories or for none.
//!   - The player acts between months through invest / set_tax_rate /
//!     negotiate; nothing decides for the player.
//!   - All randomness flows through each territory's RngBank.
//!   - All state changes are recorded in the event log.

use crate::{
    clock::TermClock,
    command::PlayerCommand,
    config::EngineConfig,
    county::CountyState,
    error::{SimError, SimResult},
    event::{EventLogEntry, SimEvent},
    governor::{
        apply_decision, decide_with_timeout, fill_from_default, normalize_tax_rate,
        reply_with_timeout, CounterpartResponder, DecisionProvider, DecisionRequest,
        ReplyRequest, RuleBasedGovernor, RuleBasedResponder,
    },
    investment::{self, InvestmentAction, InvestmentOutcome},
    negotiation::{
        NegotiationBook, NegotiationEventType, NegotiationTrigger, NegotiationTurnResult,
        RawReply, RoundParties, SessionStatus, TurnInput,
    },
    population::PeerView,
    promise::{self, Promise, PromiseTerms},
    rng::{RngBank, SubsystemRng, SubsystemSlot},
    settlement::{Settlement, SettlementReport},
    snapshot::{TerritoryDocument, TerritorySnapshot},
    store::SimStore,
    summary::{self, TermSummary},
    territory::{SpeakerRole, Territory},
    types::{Month, RunId, SessionId},
};
use rayon::prelude::*;
use serde::Serialize;
use std::{collections::BTreeSet, sync::Arc, time::Duration};

pub const PLAYER_ID: &str = "player";

const SESSION_MIX: u64 = 0xd6e8_feb8_6659_fd93;
const ROUND_MIX: u64 = 0xa076_1d64_78bd_642f;

/// What a player command produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Invested(InvestmentOutcome),
    TaxSet { rate: f64 },
    Negotiated(NegotiationTurnResult),
    Advanced { month: Month },
}

pub struct TermEngine {
    pub run_id: RunId,
    pub clock: TermClock,
    seed: u64,
    settlement: Settlement,
    /// Index 0 is the player.
    territories: Vec<Territory>,
    book: NegotiationBook,
    store: SimStore,
    pool: Option<rayon::ThreadPool>,
    provider: Option<Arc<dyn DecisionProvider>>,
    responder: Arc<dyn CounterpartResponder>,
}

impl TermEngine {
    /// A run with one player territory and `runtime.peer_count` peers.
    pub fn new(run_id: RunId, seed: u64, store: SimStore, config: EngineConfig) -> SimResult<Self> {
        config.validate()?;
        let territories = std::iter::once(PLAYER_ID.to_string())
            .chain((1..=config.runtime.peer_count).map(|i| format!("peer-{i}")))
            .enumerate()
            .map(|(i, id)| Territory::generate(&id, i == 0, RngBank::for_territory(seed, i as u64)))
            .collect();

        let workers = config.runtime.worker_threads.max(1);
        let pool = if workers > 1 {
            rayon::ThreadPoolBuilder::new().num_threads(workers).build().ok()
        } else {
            None
        };

        Ok(Self {
            clock: TermClock::new(run_id.clone(), config.runtime.term_months),
            run_id,
            seed,
            settlement: Settlement::new(config),
            territories,
            book: NegotiationBook::new(),
            store,
            pool,
            provider: None,
            responder: Arc::new(RuleBasedResponder),
        })
    }

    /// Build with config overrides read from `{data_dir}/engine.json`.
    pub fn build(run_id: RunId, seed: u64, store: SimStore, data_dir: &str) -> SimResult<Self> {
        let config = EngineConfig::load(data_dir)?;
        Self::new(run_id, seed, store, config)
    }

    /// External source for peer decisions. Without one, peers use the
    /// rule-based governor.
    pub fn set_decision_provider(&mut self, provider: Arc<dyn DecisionProvider>) {
        self.provider = Some(provider);
    }

    /// Source of counterpart replies for the player's negotiations.
    pub fn set_responder(&mut self, responder: Arc<dyn CounterpartResponder>) {
        self.responder = responder;
    }

    pub fn config(&self) -> &EngineConfig {
        self.settlement.config()
    }

    pub fn territories(&self) -> &[Territory] {
        &self.territories
    }

    pub fn player(&self) -> &Territory {
        &self.territories[0]
    }

    pub fn territory(&self, id: &str) -> SimResult<&Territory> {
        self.territories
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| SimError::TerritoryNotFound { id: id.to_string() })
    }

    pub fn book(&self) -> &NegotiationBook {
        &self.book
    }

    pub fn store(&self) -> &SimStore {
        &self.store
    }

    fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.config().runtime.decision_timeout_ms)
    }

    // ── Month loop ─────────────────────────────────────────────

    /// Settle the next month for every territory.
    pub fn advance_month(&mut self) -> SimResult<Vec<SimEvent>> {
        let month = self.clock.next_month()?;
        let checkpoint = (self.territories.clone(), self.book.clone());

        let mut events = Vec::new();
        if self.clock.current_month == 0 {
            events.push(SimEvent::RunInitialized {
                run_id: self.run_id.clone(),
                seed: self.seed,
                territories: self.territories.iter().map(|t| t.id.clone()).collect(),
            });
        }
        events.push(SimEvent::MonthStarted { month });

        let mut touched = BTreeSet::new();
        if let Err(e) = self.run_month(month, &mut events, &mut touched) {
            log::warn!("month={month} aborted, state rolled back: {e}");
            (self.territories, self.book) = checkpoint;
            return Err(e);
        }

        self.clock.advance()?;
        events.push(SimEvent::MonthCompleted { month });
        self.persist_month(month, &events, &touched)?;
        log::info!("month={month} completed with {} events", events.len());
        Ok(events)
    }

    /// Advance up to `n` months; stops early at the end of the term.
    pub fn run_months(&mut self, n: Month) -> SimResult<()> {
        for _ in 0..n {
            if self.clock.is_over() {
                break;
            }
            self.advance_month()?;
        }
        Ok(())
    }

    fn run_month(
        &mut self,
        month: Month,
        events: &mut Vec<SimEvent>,
        touched: &mut BTreeSet<SessionId>,
    ) -> SimResult<()> {
        for index in 1..self.territories.len() {
            self.apply_peer_decision(index, month, events, touched)?;
        }

        let reports = self.settle_all(month)?;

        for (index, (county, report)) in reports.into_iter().enumerate() {
            let territory = &mut self.territories[index];
            territory.county = county;
            events.push(SimEvent::SettlementCompleted {
                month,
                territory: territory.id.clone(),
                treasury: territory.county.treasury,
                morale: territory.county.morale,
                security: territory.county.security,
                population: territory.county.total_population(),
                notes: report.events.clone(),
            });
            if let Some(impact) = &report.disaster_impact {
                events.push(SimEvent::DisasterStruck {
                    month,
                    territory: territory.id.clone(),
                    kind: impact.disaster.kind.name().to_string(),
                    severity: impact.disaster.severity,
                });
            }
            for resolved in &report.promises {
                events.push(SimEvent::PromiseResolved {
                    month,
                    territory: territory.id.clone(),
                    promise_id: resolved.promise_id,
                    status: resolved.status,
                    integrity_change: resolved.integrity_change,
                    integrity: resolved.integrity_after,
                });
            }
            let triggers = report.negotiation_triggers.clone();
            territory.last_report = Some(report);
            self.open_triggers(index, triggers, month, events, touched)?;
        }

        for index in 1..self.territories.len() {
            let territory_id = self.territories[index].id.clone();
            let active: Vec<SessionId> = self
                .book
                .active_for(&territory_id)
                .into_iter()
                .map(|s| s.id.clone())
                .collect();
            for session_id in active {
                self.play_round(&session_id, "", SpeakerRole::Player, month, false, events)?;
                touched.insert(session_id);
            }
        }
        Ok(())
    }

    fn settle_all(&self, month: Month) -> SimResult<Vec<(CountyState, SettlementReport)>> {
        let views: Vec<PeerView> = self.territories.iter().map(|t| PeerView::of(&t.id, &t.county)).collect();
        let settlement = &self.settlement;
        let territories = &self.territories;
        let settle_one = |t: &Territory| -> SimResult<(CountyState, SettlementReport)> {
            let peers: Vec<PeerView> = views.iter().filter(|p| p.name != t.id).cloned().collect();
            let mut county = t.county.clone();
            let report = settlement.settle(&mut county, month, &peers, &t.rng_bank())?;
            Ok((county, report))
        };
        match &self.pool {
            Some(pool) => pool.install(|| territories.par_iter().map(settle_one).collect()),
            None => territories.iter().map(settle_one).collect(),
        }
    }

    fn apply_peer_decision(
        &mut self,
        index: usize,
        month: Month,
        events: &mut Vec<SimEvent>,
        touched: &mut BTreeSet<SessionId>,
    ) -> SimResult<()> {
        let negotiation = self.config().negotiation.clone();
        let timeout = self.decision_timeout();
        let territory = &self.territories[index];
        let mut rng = territory.rng_bank().for_month(SubsystemSlot::Governor, month);
        let default = RuleBasedGovernor.decide(&territory.county, &territory.profile, month, &negotiation, &mut rng);

        let decision = match &self.provider {
            Some(provider) => {
                let request = DecisionRequest {
                    territory: territory.id.clone(),
                    month,
                    county: territory.county.clone(),
                    profile: territory.profile,
                    available: investment::available_actions(&territory.county),
                };
                match decide_with_timeout(provider.clone(), request, timeout) {
                    Ok(decision) => fill_from_default(decision, default),
                    Err(failure) => {
                        log::info!("month={month} territory={} decision fallback: {failure}", territory.id);
                        events.push(SimEvent::DecisionFallback {
                            month,
                            territory: territory.id.clone(),
                            reason: failure.to_string(),
                        });
                        default
                    }
                }
            }
            None => default,
        };

        let territory = &mut self.territories[index];
        let outcome = apply_decision(&mut territory.county, &decision, month, &negotiation);
        let id = territory.id.clone();
        for started in &outcome.started {
            events.push(SimEvent::InvestmentStarted {
                month,
                territory: id.clone(),
                action: started.action,
                target_village: decision
                    .investments
                    .iter()
                    .find(|o| o.action == started.action)
                    .and_then(|o| o.target_village.clone()),
                cost: started.cost,
            });
        }
        for rejection in &outcome.rejected {
            events.push(SimEvent::InvestmentRejected {
                month,
                territory: id.clone(),
                action: rejection.order.action,
                reason: rejection.reason.clone(),
            });
        }
        if let Some((old_rate, new_rate)) = outcome.tax_change {
            events.push(SimEvent::TaxRateChanged { month, territory: id.clone(), old_rate, new_rate });
        }
        events.push(SimEvent::DecisionApplied {
            month,
            territory: id,
            investments: outcome.started.len(),
            tax_rate: territory.county.tax_rate,
        });
        self.open_triggers(index, outcome.triggers, month, events, touched)
    }

    // ── Negotiation ────────────────────────────────────────────

    /// Open a session per trigger. An annexation proposal is dropped while
    /// the territory has any session open; other proposals are rejected
    /// only for a busy counterpart.
    fn open_triggers(
        &mut self,
        index: usize,
        triggers: Vec<NegotiationTrigger>,
        month: Month,
        events: &mut Vec<SimEvent>,
        touched: &mut BTreeSet<SessionId>,
    ) -> SimResult<()> {
        for trigger in triggers {
            let territory = &self.territories[index];
            let event_type = trigger.context.event_type();
            if event_type == NegotiationEventType::Annexation && !self.book.active_for(&territory.id).is_empty() {
                log::debug!(
                    "month={month} territory={} annexation in {} skipped: negotiation in progress",
                    territory.id,
                    trigger.village
                );
                continue;
            }
            let Some(counterpart) = territory.counterpart_for_village(&trigger.village) else {
                events.push(SimEvent::NegotiationRejected {
                    month,
                    territory: territory.id.clone(),
                    event_type,
                    reason: format!("no counterpart in {}", trigger.village),
                });
                continue;
            };
            let nonce = self.book.sessions().count() as u64 + 1;
            let mut rng = SubsystemRng::new(
                territory.rng_bank().seed() ^ nonce.wrapping_mul(SESSION_MIX),
                SubsystemSlot::Negotiation as u64,
            );
            match self.book.start(&territory.id, counterpart, trigger.context, month, &mut rng) {
                Ok(session_id) => {
                    events.push(SimEvent::NegotiationOpened {
                        month,
                        territory: territory.id.clone(),
                        session_id: session_id.clone(),
                        event_type,
                        counterpart: counterpart.id.clone(),
                    });
                    touched.insert(session_id);
                }
                Err(SimError::Conflict { reason }) => {
                    log::debug!("month={month} territory={} {reason}", territory.id);
                    events.push(SimEvent::NegotiationRejected {
                        month,
                        territory: territory.id.clone(),
                        event_type,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// One round of `session_id`. The player's rounds ask the configured
    /// responder; peers answer through the rule-based responder directly.
    fn play_round(
        &mut self,
        session_id: &str,
        utterance: &str,
        speaker: SpeakerRole,
        month: Month,
        use_responder: bool,
        events: &mut Vec<SimEvent>,
    ) -> SimResult<NegotiationTurnResult> {
        let session = self
            .book
            .get(session_id)
            .cloned()
            .ok_or_else(|| SimError::SessionNotFound { id: session_id.to_string() })?;
        if !session.is_active() {
            return Err(SimError::SessionClosed { id: session_id.to_string() });
        }
        let index = self
            .territories
            .iter()
            .position(|t| t.id == session.territory)
            .ok_or_else(|| SimError::TerritoryNotFound { id: session.territory.clone() })?;
        let counterpart = self.territories[index]
            .counterparts
            .iter()
            .find(|c| c.id == session.counterpart)
            .cloned()
            .ok_or_else(|| SimError::validation(format!("unknown counterpart {}", session.counterpart)))?;

        let mut rng = self.territories[index].rng_bank().for_month(SubsystemSlot::Negotiation, month);
        let reply_seed = rng.next_u64() ^ (session.current_round as u64 + 1).wrapping_mul(ROUND_MIX);

        let reply = if session.needs_reply() {
            let request = ReplyRequest {
                session: session.clone(),
                counterpart,
                utterance: utterance.to_string(),
                speaker,
                month,
                seed: reply_seed,
            };
            if use_responder {
                match reply_with_timeout(self.responder.clone(), request.clone(), self.decision_timeout()) {
                    Ok(reply) => reply,
                    Err(failure) => {
                        log::info!("month={month} session={session_id} reply fallback: {failure}");
                        RuleBasedResponder.reply_now(&request)
                    }
                }
            } else {
                RuleBasedResponder.reply_now(&request)
            }
        } else {
            RawReply::default()
        };

        let territory = &mut self.territories[index];
        let delegate = territory.delegates.iter().find(|d| d.role == speaker);
        let counterpart = territory
            .counterparts
            .iter_mut()
            .find(|c| c.id == session.counterpart)
            .ok_or_else(|| SimError::validation(format!("unknown counterpart {}", session.counterpart)))?;
        let parties = RoundParties {
            county: &mut territory.county,
            counterpart,
            delegate,
            knowledge: territory.knowledge,
        };
        let input = TurnInput { utterance: utterance.to_string(), speaker };
        let result = self.book.negotiate_round(session_id, input, &reply, parties, &mut rng)?;

        events.push(SimEvent::NegotiationRound {
            month,
            territory: territory.id.clone(),
            session_id: session_id.to_string(),
            round: result.round,
            speaker,
            handoff_to_player: result.handoff_to_player,
        });
        if result.status == SessionStatus::Resolved {
            if let (Some(decision), Some(outcome)) = (result.final_decision, &result.outcome) {
                events.push(SimEvent::NegotiationResolved {
                    month,
                    territory: territory.id.clone(),
                    session_id: session_id.to_string(),
                    final_decision: decision,
                    fallback: outcome.fallback,
                    delegated: outcome.delegated,
                });
            }
        }
        Ok(result)
    }

    // ── Player actions ─────────────────────────────────────────

    /// Start an investment in the player's county for the coming month.
    pub fn invest(&mut self, action: InvestmentAction, target_village: Option<&str>) -> SimResult<InvestmentOutcome> {
        let month = self.clock.next_month()?;
        let negotiation = self.config().negotiation.clone();
        let player = &mut self.territories[0];
        let outcome = investment::execute(&mut player.county, action, target_village, month, &negotiation)?;
        let mut events = vec![SimEvent::InvestmentStarted {
            month,
            territory: player.id.clone(),
            action,
            target_village: target_village.map(str::to_string),
            cost: outcome.cost,
        }];
        let mut touched = BTreeSet::new();
        self.open_triggers(0, outcome.triggers.clone(), month, &mut events, &mut touched)?;
        self.persist_events(month, "player", &events)?;
        self.persist_sessions(&touched)?;
        Ok(outcome)
    }

    /// Set the player's agricultural tax rate. Values above 1 are percentages.
    pub fn set_tax_rate(&mut self, raw: f64) -> SimResult<f64> {
        let month = self.clock.next_month()?;
        let rate = normalize_tax_rate(raw).ok_or_else(|| SimError::validation(format!("tax rate {raw} is not a valid rate")))?;
        let player = &mut self.territories[0];
        let old_rate = player.county.tax_rate;
        player.county.tax_rate = rate;
        let event = SimEvent::TaxRateChanged { month, territory: player.id.clone(), old_rate, new_rate: rate };
        self.persist_events(month, "player", &[event])?;
        Ok(rate)
    }

    /// One player (or delegate) utterance in an open session.
    pub fn negotiate(&mut self, session_id: &str, utterance: &str, speaker: SpeakerRole) -> SimResult<NegotiationTurnResult> {
        let month = self.clock.current_month;
        let mut events = Vec::new();
        let result = self.play_round(session_id, utterance, speaker, month, true, &mut events)?;
        self.persist_events(month, "negotiation", &events)?;
        self.persist_sessions(&BTreeSet::from([session_id.to_string()]))?;
        Ok(result)
    }

    /// Record a promise made in `session_id`. It is first judged when the
    /// coming month settles.
    pub fn promise(&mut self, session_id: &str, terms: PromiseTerms) -> SimResult<Promise> {
        let month = self.clock.next_month()?;
        let (index, counterpart) = self.promise_party(session_id)?;
        let territory = &mut self.territories[index];
        let made = promise::make_promise(&mut territory.county, terms, &counterpart, Some(session_id.to_string()), month)?;
        log::info!("month={month} territory={} promised {} to {counterpart}", territory.id, made.kind.name());
        let event = SimEvent::PromiseMade {
            month,
            territory: territory.id.clone(),
            session_id: session_id.to_string(),
            promise_id: made.id,
            kind: made.kind,
            deadline_month: made.deadline_month,
        };
        self.persist_events(month, "player", &[event])?;
        Ok(made)
    }

    /// Territory index and counterpart of an open session.
    fn promise_party(&self, session_id: &str) -> SimResult<(usize, String)> {
        let session = self
            .book
            .get(session_id)
            .ok_or_else(|| SimError::SessionNotFound { id: session_id.to_string() })?;
        if !session.is_active() {
            return Err(SimError::SessionClosed { id: session_id.to_string() });
        }
        let index = self
            .territories
            .iter()
            .position(|t| t.id == session.territory)
            .ok_or_else(|| SimError::TerritoryNotFound { id: session.territory.clone() })?;
        Ok((index, session.counterpart.clone()))
    }

    pub fn apply_command(&mut self, command: PlayerCommand) -> SimResult<CommandOutcome> {
        match command {
            PlayerCommand::Invest { action, target_village } => {
                self.invest(action, target_village.as_deref()).map(CommandOutcome::Invested)
            }
            PlayerCommand::SetTax { rate } => self.set_tax_rate(rate).map(|rate| CommandOutcome::TaxSet { rate }),
            PlayerCommand::Negotiate { session_id, utterance, speaker, promises } => {
                if !promises.is_empty() {
                    let (index, _) = self.promise_party(&session_id)?;
                    for terms in &promises {
                        promise::validate_terms(&self.territories[index].county, terms)?;
                    }
                }
                for terms in promises {
                    self.promise(&session_id, terms)?;
                }
                self.negotiate(&session_id, &utterance, speaker).map(CommandOutcome::Negotiated)
            }
            PlayerCommand::Advance { months } => {
                self.run_months(months)?;
                Ok(CommandOutcome::Advanced { month: self.clock.current_month })
            }
        }
    }

    // ── Persistence ────────────────────────────────────────────

    fn persist_month(&mut self, month: Month, events: &[SimEvent], touched: &BTreeSet<SessionId>) -> SimResult<()> {
        self.persist_events(month, "engine", events)?;
        self.persist_sessions(touched)?;
        let interval = self.config().runtime.snapshot_interval;
        if (interval > 0 && month % interval == 0) || self.clock.is_over() {
            for territory in &self.territories {
                let snapshot = TerritorySnapshot {
                    territory: territory.id.clone(),
                    month,
                    document: TerritoryDocument::from_county(&territory.county),
                };
                self.store.save_snapshot(&self.run_id, &snapshot)?;
            }
            log::debug!("Snapshot saved at month {month}");
        }
        Ok(())
    }

    fn persist_events(&mut self, month: Month, source: &str, events: &[SimEvent]) -> SimResult<()> {
        let entries = events
            .iter()
            .map(|event| EventLogEntry::new(&self.run_id, month, source, event))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.append_events(&entries)
    }

    fn persist_sessions(&self, ids: &BTreeSet<SessionId>) -> SimResult<()> {
        for id in ids {
            if let Some(session) = self.book.get(id) {
                self.store.upsert_session(&self.run_id, session)?;
            }
        }
        Ok(())
    }

    /// Query events for a specific month from the store.
    /// Used by the determinism test and replay tooling.
    pub fn store_events_for_month(&self, month: Month) -> SimResult<Vec<EventLogEntry>> {
        self.store.events_for_month(&self.run_id, month)
    }

    /// Replace the in-memory sessions with those stored for this run.
    pub fn reload_sessions(&mut self) -> SimResult<usize> {
        let sessions = self.store.load_sessions(&self.run_id)?;
        let count = sessions.len();
        self.book = NegotiationBook::from_sessions(sessions);
        Ok(count)
    }

    /// Term summary as of the last settled month.
    pub fn summary(&self) -> TermSummary {
        summary::summarize(&self.territories, self.clock.current_month)
    }
}
