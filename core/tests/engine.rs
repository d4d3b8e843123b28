//! Term engine: player commands, collaborator fallbacks and the term end.

use county_core::{
    command::{PlayerCommand, TerritoryDecision},
    config::EngineConfig,
    engine::{CommandOutcome, TermEngine},
    error::SimError,
    event::SimEvent,
    governor::{DecisionProvider, DecisionRequest},
    investment::InvestmentAction,
    store::SimStore,
    territory::SpeakerRole,
};
use std::{sync::Arc, thread, time::Duration};

fn build_engine(run_id: &str, seed: u64, configure: impl FnOnce(&mut EngineConfig)) -> TermEngine {
    let store = SimStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store.insert_run(run_id, seed, "0.1.0-test").expect("insert run");
    let mut config = EngineConfig::default();
    config.runtime.peer_count = 2;
    configure(&mut config);
    TermEngine::new(run_id.to_string(), seed, store, config).expect("engine")
}

struct SlowProvider;

impl DecisionProvider for SlowProvider {
    fn decide(&self, _request: &DecisionRequest) -> anyhow::Result<TerritoryDecision> {
        thread::sleep(Duration::from_millis(300));
        Ok(TerritoryDecision::default())
    }
}

struct BrokenProvider;

impl DecisionProvider for BrokenProvider {
    fn decide(&self, _request: &DecisionRequest) -> anyhow::Result<TerritoryDecision> {
        anyhow::bail!("provider offline")
    }
}

#[test]
fn slow_provider_falls_back_to_rule_based_governor() {
    let mut engine = build_engine("timeout-test", 5, |c| c.runtime.decision_timeout_ms = 20);
    engine.set_decision_provider(Arc::new(SlowProvider));

    let events = engine.advance_month().expect("month 1");
    let fallbacks: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SimEvent::DecisionFallback { .. }))
        .collect();
    assert_eq!(fallbacks.len(), 2, "each peer should fall back once, got {fallbacks:?}");
    assert!(events.iter().any(|e| matches!(e, SimEvent::DecisionApplied { .. })),
        "the fallback decision is still applied");
    assert_eq!(engine.clock.current_month, 1);
}

#[test]
fn failing_provider_falls_back_too() {
    let mut engine = build_engine("broken-test", 6, |_| {});
    engine.set_decision_provider(Arc::new(BrokenProvider));
    let events = engine.advance_month().expect("month 1");
    let reasons: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            SimEvent::DecisionFallback { reason, .. } => Some(reason.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), 2);
    assert!(reasons.iter().all(|r| r.contains("provider offline")), "got {reasons:?}");
}

#[test]
fn player_investment_is_charged_and_logged() {
    let mut engine = build_engine("invest-test", 7, |_| {});
    let treasury = engine.player().county.treasury;
    let security = engine.player().county.security;

    let outcome = engine.invest(InvestmentAction::HireBailiffs, None).expect("hire bailiffs");
    assert!(outcome.cost > 0.0);
    assert!((engine.player().county.treasury - (treasury - outcome.cost)).abs() < 1e-9);
    assert!(engine.player().county.security > security);

    let logged = engine.store_events_for_month(1).expect("events");
    assert!(logged.iter().any(|e| e.event_type == "investment_started" && e.source == "player"),
        "player investment should be logged against the coming month");

    let err = engine
        .invest(InvestmentAction::ReclaimLand, Some("Nowhere"))
        .expect_err("unknown village");
    assert!(matches!(err, SimError::Validation { .. }));
}

#[test]
fn tax_rate_accepts_percentages_and_clamps() {
    let mut engine = build_engine("tax-test", 8, |_| {});
    let rate = engine.set_tax_rate(12.0).expect("percent rate");
    assert!((rate - 0.12).abs() < 1e-9);
    assert_eq!(engine.player().county.tax_rate, rate);

    assert!((engine.set_tax_rate(0.5).expect("clamped") - 0.15).abs() < 1e-9);
    assert!(engine.set_tax_rate(-1.0).is_err(), "negative rates are rejected");
}

#[test]
fn commands_route_to_player_actions() {
    let mut engine = build_engine("command-test", 9, |_| {});
    let outcome = engine
        .apply_command(PlayerCommand::SetTax { rate: 10.0 })
        .expect("set tax");
    assert!(matches!(outcome, CommandOutcome::TaxSet { .. }));

    let outcome = engine
        .apply_command(PlayerCommand::Advance { months: 2 })
        .expect("advance");
    assert_eq!(outcome, CommandOutcome::Advanced { month: 2 });

    let err = engine
        .apply_command(PlayerCommand::Negotiate {
            session_id: "missing".into(),
            utterance: "hello".into(),
            speaker: SpeakerRole::Player,
            promises: Vec::new(),
        })
        .expect_err("no such session");
    assert!(matches!(err, SimError::SessionNotFound { .. }));
}

#[test]
fn term_ends_and_summary_covers_every_territory() {
    let mut engine = build_engine("term-test", 10, |c| c.runtime.term_months = 6);
    engine.run_months(10).expect("run");
    assert!(engine.clock.is_over());
    assert_eq!(engine.clock.current_month, 6, "running past the term stops at its end");

    let err = engine.advance_month().expect_err("term is over");
    assert!(matches!(err, SimError::TermOver { .. }));

    let summary = engine.summary();
    assert_eq!(summary.months_completed, 6);
    assert_eq!(summary.territories.len(), 3);
    let player = summary.player().expect("player summary");
    assert!((0.0..=100.0).contains(&player.overall));
    for t in &summary.territories {
        for score in [t.population.score, t.treasury.score, t.morale.score, t.security.score] {
            assert!((0.0..=100.0).contains(&score), "{} score out of range: {score}", t.name);
        }
    }
}

#[test]
fn sessions_survive_a_reload() {
    let mut engine = build_engine("reload-test", 11, |c| c.runtime.term_months = 12);
    engine.run_months(12).expect("run");
    let before = engine.book().sessions().count();
    let reloaded = engine.reload_sessions().expect("reload");
    assert_eq!(reloaded, before, "every session is persisted");
    assert_eq!(engine.book().sessions().count(), before);
}
