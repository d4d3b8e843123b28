//! Dual-ledger consistency and legacy document backfill.

use county_core::{
    county::{CountyState, VillageState},
    ledger::{register_hidden_land, transfer_peasant_land_to_gentry},
    snapshot::{TerritoryDocument, SCHEMA_VERSION},
};
use proptest::prelude::*;

fn assert_consistent(v: &VillageState) {
    assert_eq!(
        v.farmland,
        v.peasant_ledger.farmland + v.gentry_ledger.registered_farmland,
        "legacy farmland must equal registered peasant plus gentry land"
    );
    assert_eq!(v.population, v.peasant_ledger.registered_population,
        "legacy population must equal registered peasants");
    assert_eq!(v.hidden_land, v.gentry_ledger.hidden_farmland,
        "legacy hidden land must equal gentry hidden farmland");
    assert!(v.peasant_ledger.farmland >= 0 && v.peasant_ledger.registered_population >= 0);
    assert!(v.gentry_ledger.registered_farmland >= 0 && v.gentry_ledger.hidden_farmland >= 0);
    assert!(v.gentry_ledger.hidden_population >= 0);
    assert!((0.0..=1.0).contains(&v.gentry_land_pct),
        "gentry_land_pct out of range: {}", v.gentry_land_pct);
}

#[derive(Debug, Clone)]
enum LedgerOp {
    Annex(i64),
    Register(i64),
}

fn op_strategy() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        (-200i64..2_000).prop_map(LedgerOp::Annex),
        (-200i64..2_000).prop_map(LedgerOp::Register),
    ]
}

proptest! {
    #[test]
    fn ledgers_stay_consistent_under_any_mutation_sequence(
        farmland in 0i64..20_000,
        pct in 0.0f64..0.9,
        hidden in 0i64..3_000,
        population in 0i64..15_000,
        ops in prop::collection::vec(op_strategy(), 0..24),
    ) {
        let mut v = VillageState::new("Testcun", farmland, pct, hidden).with_population(population);
        assert_consistent(&v);
        let registered_before = v.farmland;
        let total_before = v.cultivated_land();

        for op in ops {
            match op {
                LedgerOp::Annex(land) => {
                    let (moved, _) = transfer_peasant_land_to_gentry(&mut v, land);
                    prop_assert!(moved >= 0);
                }
                LedgerOp::Register(land) => {
                    let moved = register_hidden_land(&mut v, land);
                    prop_assert!(moved >= 0);
                }
            }
            assert_consistent(&v);
        }

        prop_assert_eq!(v.cultivated_land(), total_before,
            "annexation and registration only move land between registers");
        prop_assert!(v.farmland >= registered_before,
            "registered land never shrinks");
    }
}

#[test]
fn legacy_document_backfills_ledgers() {
    // A save written before ledgers existed: aggregates only.
    let json = r#"{
        "county": {
            "treasury": 321.0,
            "villages": [
                { "name": "Oldcun", "population": 800, "farmland": 1000,
                  "hidden_land": 40, "gentry_land_pct": 0.3 },
                { "name": "Bare", "population": 120.6, "farmland": 500, "hidden_land": 0 }
            ]
        }
    }"#;
    let doc = TerritoryDocument::from_json(json).expect("parse legacy document");
    assert_eq!(doc.schema_version, 0, "missing schema version reads as 0");
    let county = doc.into_county().expect("backfill");

    assert_eq!(county.treasury, 321.0);
    let old = county.village("Oldcun").expect("Oldcun");
    assert_eq!(old.peasant_ledger.registered_population, 800);
    assert_eq!(old.peasant_ledger.farmland, 700);
    assert_eq!(old.gentry_ledger.registered_farmland, 300);
    assert_eq!(old.gentry_ledger.hidden_farmland, 40);
    assert!(old.land_ceiling > 0, "land ceiling is backfilled from cultivated land");
    assert_consistent(old);

    // No gentry_land_pct: the default share is assumed.
    let bare = county.village("Bare").expect("Bare");
    assert_eq!(bare.population, 121, "fractional legacy population rounds");
    assert_eq!(bare.gentry_ledger.registered_farmland, 150);
    assert_consistent(bare);
}

#[test]
fn document_round_trip_preserves_ledgers() {
    let mut county = CountyState::standard();
    let first = county.villages[0].name.clone();
    if let Some(v) = county.village_mut(&first) {
        transfer_peasant_land_to_gentry(v, 120);
        register_hidden_land(v, 10);
    }

    let doc = TerritoryDocument::from_county(&county);
    assert_eq!(doc.schema_version, SCHEMA_VERSION);
    let json = doc.to_json().expect("serialize");
    let restored = TerritoryDocument::from_json(&json)
        .expect("parse")
        .into_county()
        .expect("restore");

    assert_eq!(restored.villages.len(), county.villages.len());
    for (a, b) in county.villages.iter().zip(restored.villages.iter()) {
        assert_eq!(a.peasant_ledger.registered_population, b.peasant_ledger.registered_population,
            "peasant population of {}", a.name);
        assert_eq!(a.peasant_ledger.farmland, b.peasant_ledger.farmland, "peasant land of {}", a.name);
        assert_eq!(a.gentry_ledger.registered_farmland, b.gentry_ledger.registered_farmland,
            "gentry land of {}", a.name);
        assert_eq!(a.gentry_ledger.hidden_farmland, b.gentry_ledger.hidden_farmland,
            "hidden land of {}", a.name);
        assert_eq!(a.gentry_ledger.hidden_population, b.gentry_ledger.hidden_population);
        assert_eq!(a.land_ceiling, b.land_ceiling);
        assert_consistent(b);
    }
    assert_eq!(
        restored.initial_snapshot.map(|s| s.total_population),
        county.initial_snapshot.map(|s| s.total_population)
    );
}

#[test]
fn newer_schema_is_rejected() {
    let json = format!(r#"{{ "schema_version": {}, "county": {{}} }}"#, SCHEMA_VERSION + 1);
    let doc = TerritoryDocument::from_json(&json).expect("parse");
    assert!(doc.into_county().is_err(), "a document from a newer schema must not load");
}
