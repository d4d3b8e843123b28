//! Promises: made at the table, judged by settlement.

use county_core::{
    command::PlayerCommand,
    config::EngineConfig,
    county::CountyState,
    engine::{TermEngine, PLAYER_ID},
    error::SimError,
    event::SimEvent,
    investment::InvestmentAction,
    promise::{check_promises, make_promise, PromiseKind, PromiseStatus, PromiseTerms, INTEGRITY_START},
    rng::RngBank,
    settlement::Settlement,
    store::SimStore,
    territory::SpeakerRole,
};

fn terms(kind: PromiseKind, deadline_months: u32) -> PromiseTerms {
    PromiseTerms { deadline_months: Some(deadline_months), ..PromiseTerms::new(kind) }
}

#[test]
fn kept_promise_is_fulfilled_before_its_deadline() {
    let mut county = CountyState::standard();
    make_promise(&mut county, terms(PromiseKind::HireBailiffs, 3), "elder", None, 1).expect("promise");

    assert!(check_promises(&mut county, 1).is_empty(), "nothing changed yet");
    county.bailiff_level += 1;
    let resolved = check_promises(&mut county, 2);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].status, PromiseStatus::Fulfilled);
    assert_eq!(resolved[0].integrity_change, 3);
    assert_eq!(county.integrity, INTEGRITY_START + 3);
    assert_eq!(county.promises[0].resolved_month, Some(2));

    assert!(check_promises(&mut county, 3).is_empty(), "resolution is final");
}

#[test]
fn unkept_promise_breaks_on_its_deadline() {
    let mut county = CountyState::standard();
    make_promise(&mut county, terms(PromiseKind::BuildGranary, 2), "elder", None, 1).expect("promise");

    assert!(check_promises(&mut county, 2).is_empty(), "month 2 is still inside the window");
    let resolved = check_promises(&mut county, 3);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].status, PromiseStatus::Broken);
    assert_eq!(county.integrity, INTEGRITY_START - 5);
    assert!(!county.promises[0].is_pending());
}

#[test]
fn promise_kept_on_the_deadline_month_counts() {
    let mut county = CountyState::standard();
    make_promise(&mut county, terms(PromiseKind::BuildGranary, 1), "elder", None, 4).expect("promise");
    county.has_granary = true;
    let resolved = check_promises(&mut county, 5);
    assert_eq!(resolved[0].status, PromiseStatus::Fulfilled);
}

#[test]
fn integrity_stays_within_bounds() {
    let mut county = CountyState::standard();
    county.integrity = 99;
    make_promise(&mut county, terms(PromiseKind::BuildGranary, 6), "elder", None, 1).expect("promise");
    county.has_granary = true;
    let resolved = check_promises(&mut county, 1);
    assert_eq!(county.integrity, 100);
    assert_eq!(resolved[0].integrity_change, 1, "the gain is cut at the ceiling");

    let mut county = CountyState::standard();
    county.integrity = 2;
    make_promise(&mut county, terms(PromiseKind::Other, 1), "elder", None, 1).expect("promise");
    let resolved = check_promises(&mut county, 2);
    assert_eq!(county.integrity, 0);
    assert_eq!(resolved[0].integrity_change, -2, "the loss is cut at the floor");
}

#[test]
fn tax_target_and_village_targets_are_judged_against_the_baseline() {
    let mut county = CountyState::standard();
    let village = county.villages[0].name.clone();
    let cut = PromiseTerms { target_rate: Some(0.10), ..terms(PromiseKind::LowerTax, 4) };
    make_promise(&mut county, cut, "elder", None, 1).expect("tax promise");
    let land = PromiseTerms { target_village: Some(village.clone()), ..terms(PromiseKind::ReclaimLand, 4) };
    make_promise(&mut county, land, "elder", None, 1).expect("land promise");

    county.tax_rate = 0.11;
    assert!(check_promises(&mut county, 1).is_empty(), "0.11 is still above the promised rate");

    county.tax_rate = 0.10;
    if let Some(v) = county.village_mut(&village) {
        v.farmland += 100;
    }
    let resolved = check_promises(&mut county, 2);
    assert_eq!(resolved.len(), 2);
    assert!(resolved.iter().all(|r| r.status == PromiseStatus::Fulfilled));
}

#[test]
fn impossible_terms_are_rejected() {
    let mut county = CountyState::standard();
    let before = county.clone();
    let nowhere = PromiseTerms { target_village: Some("Nowhere".into()), ..PromiseTerms::new(PromiseKind::BuildSchool) };
    assert!(matches!(make_promise(&mut county, nowhere, "elder", None, 1), Err(SimError::Validation { .. })));
    let rate = PromiseTerms { target_rate: Some(1.5), ..PromiseTerms::new(PromiseKind::LowerTax) };
    assert!(matches!(make_promise(&mut county, rate, "elder", None, 1), Err(SimError::Validation { .. })));
    assert!(make_promise(&mut county, terms(PromiseKind::Relief, 0), "elder", None, 1).is_err());
    assert_eq!(county, before);
}

#[test]
fn settlement_checks_promises_after_the_month() {
    let settlement = Settlement::new(EngineConfig::default());
    let bank = RngBank::new(5);
    let mut county = CountyState::standard();
    make_promise(&mut county, terms(PromiseKind::Other, 1), "elder", None, 1).expect("promise");

    let first = settlement.settle(&mut county, 1, &[], &bank).expect("month 1");
    assert!(first.promises.is_empty());
    let second = settlement.settle(&mut county, 2, &[], &bank).expect("month 2");
    assert_eq!(second.promises.len(), 1);
    assert_eq!(second.promises[0].status, PromiseStatus::Broken);
    assert!(second.events.iter().any(|e| e.contains("broken")), "got {:?}", second.events);
    assert_eq!(county.integrity, INTEGRITY_START - 5);
}

fn build_engine(run_id: &str, seed: u64) -> TermEngine {
    let store = SimStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store.insert_run(run_id, seed, "0.1.0-test").expect("insert run");
    let mut config = EngineConfig::default();
    config.runtime.peer_count = 1;
    TermEngine::new(run_id.to_string(), seed, store, config).expect("engine")
}

fn open_player_session(engine: &mut TermEngine) -> String {
    engine.invest(InvestmentAction::BuildIrrigation, None).expect("irrigation");
    engine
        .book()
        .active_for(PLAYER_ID)
        .first()
        .map(|s| s.id.clone())
        .expect("irrigation opens a gentry session")
}

#[test]
fn negotiation_turn_records_promises_and_settlement_resolves_them() {
    let mut engine = build_engine("promise-test", 31);
    let session_id = open_player_session(&mut engine);

    engine
        .apply_command(PlayerCommand::Negotiate {
            session_id: session_id.clone(),
            utterance: "I will put more bailiffs on the roads".into(),
            speaker: SpeakerRole::Player,
            promises: vec![terms(PromiseKind::HireBailiffs, 3)],
        })
        .expect("turn with a promise");
    let promise = engine.player().county.promises.first().cloned().expect("promise recorded");
    assert_eq!(promise.session_id.as_deref(), Some(session_id.as_str()));
    assert_eq!(promise.made_month, 1);
    assert_eq!(promise.deadline_month, 4);
    let logged = engine.store_events_for_month(1).expect("events");
    assert!(logged.iter().any(|e| e.event_type == "promise_made"));

    engine.invest(InvestmentAction::HireBailiffs, None).expect("bailiffs");
    let events = engine.advance_month().expect("month 1");
    let resolved: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SimEvent::PromiseResolved { status, integrity, territory, .. } => Some((*status, *integrity, territory.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(resolved, vec![(PromiseStatus::Fulfilled, INTEGRITY_START + 3, PLAYER_ID.to_string())]);
}

#[test]
fn invalid_promise_leaves_the_turn_unplayed() {
    let mut engine = build_engine("promise-reject-test", 32);
    let session_id = open_player_session(&mut engine);
    let round_before = engine.book().get(&session_id).map(|s| s.current_round);

    let err = engine
        .apply_command(PlayerCommand::Negotiate {
            session_id: session_id.clone(),
            utterance: "a school for a village that does not exist".into(),
            speaker: SpeakerRole::Player,
            promises: vec![PromiseTerms {
                target_village: Some("Nowhere".into()),
                ..PromiseTerms::new(PromiseKind::BuildSchool)
            }],
        })
        .expect_err("unknown village");
    assert!(matches!(err, SimError::Validation { .. }));
    assert!(engine.player().county.promises.is_empty());
    assert_eq!(engine.book().get(&session_id).map(|s| s.current_round), round_before);

    let err = engine
        .promise("missing", PromiseTerms::new(PromiseKind::Relief))
        .expect_err("no such session");
    assert!(matches!(err, SimError::SessionNotFound { .. }));
}
