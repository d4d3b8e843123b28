//! The run's event log.
//!
//! RULE: Every state change the engine commits is recorded as a SimEvent.
//! Payloads are deterministic; wall-clock time never appears in them.

use crate::{
    investment::InvestmentAction,
    negotiation::{FinalDecision, NegotiationEventType},
    promise::{PromiseKind, PromiseStatus},
    territory::SpeakerRole,
    types::{Month, RunId, SessionId, TerritoryId},
};
use serde::{Deserialize, Serialize};

/// Every event emitted during a run.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
        territories: Vec<TerritoryId>,
    },
    MonthStarted {
        month: Month,
    },
    MonthCompleted {
        month: Month,
    },

    // ── Decision events ────────────────────────────
    DecisionApplied {
        month: Month,
        territory: TerritoryId,
        investments: usize,
        tax_rate: f64,
    },
    DecisionFallback {
        month: Month,
        territory: TerritoryId,
        reason: String,
    },
    InvestmentStarted {
        month: Month,
        territory: TerritoryId,
        action: InvestmentAction,
        target_village: Option<String>,
        cost: f64,
    },
    InvestmentRejected {
        month: Month,
        territory: TerritoryId,
        action: InvestmentAction,
        reason: String,
    },
    TaxRateChanged {
        month: Month,
        territory: TerritoryId,
        old_rate: f64,
        new_rate: f64,
    },

    // ── Settlement events ──────────────────────────
    SettlementCompleted {
        month: Month,
        territory: TerritoryId,
        treasury: f64,
        morale: f64,
        security: f64,
        population: i64,
        notes: Vec<String>,
    },
    DisasterStruck {
        month: Month,
        territory: TerritoryId,
        kind: String,
        severity: f64,
    },

    // ── Negotiation events ─────────────────────────
    NegotiationOpened {
        month: Month,
        territory: TerritoryId,
        session_id: SessionId,
        event_type: NegotiationEventType,
        counterpart: String,
    },
    NegotiationRejected {
        month: Month,
        territory: TerritoryId,
        event_type: NegotiationEventType,
        reason: String,
    },
    NegotiationRound {
        month: Month,
        territory: TerritoryId,
        session_id: SessionId,
        round: u32,
        speaker: SpeakerRole,
        handoff_to_player: bool,
    },
    NegotiationResolved {
        month: Month,
        territory: TerritoryId,
        session_id: SessionId,
        final_decision: FinalDecision,
        fallback: bool,
        delegated: bool,
    },

    // ── Promise events ─────────────────────────────
    PromiseMade {
        month: Month,
        territory: TerritoryId,
        session_id: SessionId,
        promise_id: u32,
        kind: PromiseKind,
        deadline_month: Month,
    },
    PromiseResolved {
        month: Month,
        territory: TerritoryId,
        promise_id: u32,
        status: PromiseStatus,
        integrity_change: i32,
        integrity: i32,
    },
}

impl SimEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. } => "run_initialized",
            Self::MonthStarted { .. } => "month_started",
            Self::MonthCompleted { .. } => "month_completed",
            Self::DecisionApplied { .. } => "decision_applied",
            Self::DecisionFallback { .. } => "decision_fallback",
            Self::InvestmentStarted { .. } => "investment_started",
            Self::InvestmentRejected { .. } => "investment_rejected",
            Self::TaxRateChanged { .. } => "tax_rate_changed",
            Self::SettlementCompleted { .. } => "settlement_completed",
            Self::DisasterStruck { .. } => "disaster_struck",
            Self::NegotiationOpened { .. } => "negotiation_opened",
            Self::NegotiationRejected { .. } => "negotiation_rejected",
            Self::NegotiationRound { .. } => "negotiation_round",
            Self::NegotiationResolved { .. } => "negotiation_resolved",
            Self::PromiseMade { .. } => "promise_made",
            Self::PromiseResolved { .. } => "promise_resolved",
        }
    }

    /// Territory the event concerns; None for run-wide events.
    pub fn territory(&self) -> Option<&str> {
        match self {
            Self::RunInitialized { .. } | Self::MonthStarted { .. } | Self::MonthCompleted { .. } => None,
            Self::DecisionApplied { territory, .. }
            | Self::DecisionFallback { territory, .. }
            | Self::InvestmentStarted { territory, .. }
            | Self::InvestmentRejected { territory, .. }
            | Self::TaxRateChanged { territory, .. }
            | Self::SettlementCompleted { territory, .. }
            | Self::DisasterStruck { territory, .. }
            | Self::NegotiationOpened { territory, .. }
            | Self::NegotiationRejected { territory, .. }
            | Self::NegotiationRound { territory, .. }
            | Self::NegotiationResolved { territory, .. }
            | Self::PromiseMade { territory, .. }
            | Self::PromiseResolved { territory, .. } => Some(territory),
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub month: Month,
    pub territory: Option<TerritoryId>,
    pub source: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized SimEvent
}

impl EventLogEntry {
    pub fn new(run_id: &str, month: Month, source: &str, event: &SimEvent) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            run_id: run_id.to_string(),
            month,
            territory: event.territory().map(str::to_string),
            source: source.to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }
}
