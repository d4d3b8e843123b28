//! Negotiation sessions: round limits, delegates, conflicts and effects.

use county_core::{
    county::CountyState,
    error::SimError,
    negotiation::{
        FinalDecision, NegotiationBook, NegotiationContext, RawReply, ResolutionEffect,
        RoundParties, SessionStatus, TurnInput,
    },
    rng::{RngBank, SubsystemRng, SubsystemSlot},
    territory::{Counterpart, PersonalityProfile, SpeakerRole},
};

struct Table {
    county: CountyState,
    counterpart: Counterpart,
    book: NegotiationBook,
    rng: SubsystemRng,
}

fn table(seed: u64) -> Table {
    let county = CountyState::standard();
    let village = county.villages[0].name.clone();
    Table {
        counterpart: Counterpart {
            id: format!("gentry-{village}"),
            name: "Zhao Wenbo".into(),
            village,
            personality: PersonalityProfile::default(),
            affinity: 40.0,
        },
        county,
        book: NegotiationBook::new(),
        rng: RngBank::new(seed).for_month(SubsystemSlot::Negotiation, 1),
    }
}

fn annexation(village: &str) -> NegotiationContext {
    NegotiationContext::Annexation {
        village: village.to_string(),
        current_pct: 0.3,
        proposed_pct_increase: 0.05,
    }
}

fn willing(w: f64) -> RawReply {
    RawReply {
        dialogue: Some("We shall see.".into()),
        willingness_to_stop: Some(w),
        ..Default::default()
    }
}

fn round(t: &mut Table, id: &str, speaker: SpeakerRole, reply: &RawReply) -> county_core::negotiation::NegotiationTurnResult {
    let parties = RoundParties {
        county: &mut t.county,
        counterpart: &mut t.counterpart,
        delegate: None,
        knowledge: 5.0,
    };
    t.book
        .negotiate_round(id, TurnInput { utterance: "Consider the harvest.".into(), speaker }, reply, parties, &mut t.rng)
        .expect("negotiate round")
}

#[test]
fn round_limit_resolves_by_fallback() {
    let mut t = table(1);
    let context = annexation(&t.counterpart.village.clone());
    let cp = t.counterpart.clone();
    let id = t.book.start("player", &cp, context, 1, &mut t.rng).expect("start");

    for n in 1..8 {
        let result = round(&mut t, &id, SpeakerRole::Player, &willing(0.7));
        assert_eq!(result.status, SessionStatus::Active, "round {n} should leave the session open");
        assert_eq!(result.round, n);
    }
    let last = round(&mut t, &id, SpeakerRole::Player, &willing(0.7));
    assert_eq!(last.status, SessionStatus::Resolved);
    assert_eq!(last.final_decision, Some(FinalDecision::StopAnnexation));
    let outcome = last.outcome.expect("outcome");
    assert!(outcome.fallback, "eighth round without a decision is a fallback");
    assert_eq!(outcome.effect, ResolutionEffect::AnnexationStopped);

    let err = round_err(&mut t, &id);
    assert!(matches!(err, SimError::SessionClosed { .. }), "resolved sessions take no more rounds: {err}");
}

fn round_err(t: &mut Table, id: &str) -> SimError {
    let parties = RoundParties {
        county: &mut t.county,
        counterpart: &mut t.counterpart,
        delegate: None,
        knowledge: 5.0,
    };
    t.book
        .negotiate_round(id, TurnInput { utterance: String::new(), speaker: SpeakerRole::Player }, &RawReply::default(), parties, &mut t.rng)
        .expect_err("round on a closed session")
}

#[test]
fn low_willingness_fallback_proceeds_with_annexation() {
    let mut t = table(2);
    let village = t.counterpart.village.clone();
    let before = t.county.village(&village).expect("village").gentry_ledger.registered_farmland;
    let cp = t.counterpart.clone();
    let id = t.book.start("player", &cp, annexation(&village), 1, &mut t.rng).expect("start");

    let mut last = None;
    for _ in 0..8 {
        last = Some(round(&mut t, &id, SpeakerRole::Player, &willing(0.1)));
    }
    let last = last.expect("eight rounds");
    assert_eq!(last.final_decision, Some(FinalDecision::ProceedAnnexation));
    let after = t.county.village(&village).expect("village");
    assert!(after.gentry_ledger.registered_farmland > before, "annexation moves land to the gentry");
    assert_eq!(after.farmland, after.peasant_ledger.farmland + after.gentry_ledger.registered_farmland);
}

#[test]
fn failed_delegate_hands_off_to_player() {
    let mut t = table(3);
    let cp = t.counterpart.clone();
    let context = annexation(&cp.village);
    let id = t.book.start("player", &cp, context, 1, &mut t.rng).expect("start");

    let result = round(&mut t, &id, SpeakerRole::Advisor, &willing(0.0));
    assert!(result.handoff_to_player, "willingness 0 plus advisor bonus is below threshold");
    assert!(!result.handoff_message.is_empty());
    assert_eq!(result.status, SessionStatus::Active);
    assert_eq!(result.final_decision, None);
}

#[test]
fn strong_delegate_secures_the_favorable_outcome() {
    let mut t = table(4);
    let cp = t.counterpart.clone();
    let id = t.book.start("player", &cp, annexation(&cp.village), 1, &mut t.rng).expect("start");

    // 0.60 willingness + 0.10 advisor bonus clears the 0.68 bar.
    let result = round(&mut t, &id, SpeakerRole::Advisor, &willing(0.6));
    assert_eq!(result.status, SessionStatus::Resolved);
    assert_eq!(result.final_decision, Some(FinalDecision::StopAnnexation));
    let outcome = result.outcome.expect("outcome");
    assert!(outcome.delegated && !outcome.fallback);
}

#[test]
fn second_session_with_busy_counterpart_conflicts() {
    let mut t = table(5);
    let cp = t.counterpart.clone();
    t.book.start("player", &cp, annexation(&cp.village), 1, &mut t.rng).expect("first start");
    let err = t
        .book
        .start("player", &cp, annexation(&cp.village), 2, &mut t.rng)
        .expect_err("second start must conflict");
    assert!(matches!(err, SimError::Conflict { .. }), "expected a conflict, got {err}");
    assert_eq!(t.book.active_for("player").len(), 1);

    // Another territory may still talk to a counterpart with the same id.
    t.book.start("peer-1", &cp, annexation(&cp.village), 2, &mut t.rng).expect("other territory");
}

#[test]
fn explicit_irrigation_offer_lands_in_treasury() {
    let mut t = table(6);
    let cp = t.counterpart.clone();
    let context = NegotiationContext::Irrigation { village: cp.village.clone(), max_contribution: 40.0 };
    let id = t.book.start("player", &cp, context, 1, &mut t.rng).expect("start");
    let treasury = t.county.treasury;

    let reply = RawReply {
        contribution_offer: Some(55.7),
        final_decision: Some("accept".into()),
        ..Default::default()
    };
    let result = round(&mut t, &id, SpeakerRole::Player, &reply);
    assert_eq!(result.final_decision, Some(FinalDecision::Accept));
    assert!((t.county.treasury - treasury - 40.0).abs() < 1e-9,
        "offers are truncated and clamped to the maximum");
}

#[test]
fn session_ids_replay_with_the_seed() {
    let ids = |seed: u64| {
        let mut t = table(seed);
        let cp = t.counterpart.clone();
        t.book.start("player", &cp, annexation(&cp.village), 1, &mut t.rng).expect("start")
    };
    assert_eq!(ids(9), ids(9));
    assert_ne!(ids(9), ids(10));
}
