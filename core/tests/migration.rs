//! Competitive migration between territories.

use county_core::{
    config::MigrationConfig,
    county::CountyState,
    population::{classify_pair, competitive_migration, CompetitionMetrics, FlowDirection, PeerView},
};

fn metrics(morale: f64, security: f64, commercial: f64, education: f64) -> CompetitionMetrics {
    CompetitionMetrics { morale, security, commercial, education }
}

#[test]
fn classification_is_symmetric() {
    let config = MigrationConfig::default();
    let strong = metrics(70.0, 65.0, 40.0, 30.0);
    let weak = metrics(50.0, 48.0, 38.0, 29.0);

    let forward = classify_pair(&strong, &weak, &config);
    let backward = classify_pair(&weak, &strong, &config);

    assert_eq!(forward.direction, FlowDirection::Inflow);
    assert_eq!(backward.direction, FlowDirection::Outflow);
    assert_eq!(forward.lead_count, 2);
    assert_eq!(backward.lag_count, 2);
    assert_eq!(forward.rate, backward.rate, "both sides of a pair see the same rate");
    assert!((forward.rate - 0.015).abs() < 1e-12, "two significant dims, got {}", forward.rate);

    let mut own = CountyState::standard();
    own.morale = strong.morale;
    own.security = strong.security;
    own.commercial = strong.commercial;
    own.education = strong.education;
    let peer = PeerView { name: "Lowland".into(), population: 10_000, metrics: weak };
    let summary = competitive_migration(&own, &[peer], &config);
    assert_eq!(summary.pairs.len(), 1);
    assert_eq!(summary.pairs[0].moved, 150, "inflow is the peer's population times the pair rate");
    let cap = (own.total_population() as f64 * config.flow_cap) as i64;
    assert_eq!(summary.inflow_total, 150.min(cap));
    assert_eq!(summary.outflow_total, 0);
}

#[test]
fn mixed_leads_and_lags_cancel() {
    let config = MigrationConfig::default();
    let eval = classify_pair(&metrics(70.0, 30.0, 40.0, 30.0), &metrics(50.0, 50.0, 40.0, 30.0), &config);
    assert_eq!(eval.direction, FlowDirection::None);
    assert_eq!(eval.rate, 0.0);
}

#[test]
fn parity_produces_no_flow() {
    let config = MigrationConfig::default();
    let eval = classify_pair(&metrics(52.0, 55.0, 35.0, 25.0), &metrics(50.0, 50.0, 40.0, 30.0), &config);
    assert_eq!(eval.direction, FlowDirection::None, "no dimension differs by 15 or more");
    assert_eq!(eval.rate, 0.0);
    assert_eq!(eval.parity_count, 4);
}

#[test]
fn totals_are_capped_and_deterministic() {
    let config = MigrationConfig::default();
    let mut own = CountyState::standard();
    own.morale = 90.0;
    own.security = 90.0;
    own.commercial = 90.0;
    own.education = 90.0;

    let mut weak = CountyState::standard();
    weak.morale = 10.0;
    weak.security = 10.0;
    weak.commercial = 10.0;
    weak.education = 10.0;
    let peers: Vec<PeerView> = (0..5).map(|i| PeerView::of(&format!("peer-{i}"), &weak)).collect();

    let first = competitive_migration(&own, &peers, &config);
    let second = competitive_migration(&own, &peers, &config);
    assert_eq!(first, second, "migration has no randomness");

    let cap = (own.total_population() as f64 * config.flow_cap) as i64;
    assert_eq!(first.inflow_total, cap, "five weak peers saturate the inflow cap");
    assert_eq!(first.outflow_total, 0);
    assert_eq!(first.pairs.len(), 5);
}

#[test]
fn empty_peers_are_skipped() {
    let config = MigrationConfig::default();
    let own = CountyState::standard();
    let empty = PeerView { name: "ghost".into(), population: 0, metrics: metrics(0.0, 0.0, 0.0, 0.0) };
    let summary = competitive_migration(&own, &[empty], &config);
    assert!(summary.pairs.is_empty());
    assert_eq!(summary.inflow_total, 0);
}
