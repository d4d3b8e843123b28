//! Carrying capacity, natural growth and competitive migration.
//!
//! RULES:
//!   - Gentry registered land is excluded from peasant carrying capacity.
//!   - Growth is applied once a year, at the harvest month.
//!   - Peer territories are read-only snapshots; migration never mutates them.

use crate::{
    config::MigrationConfig,
    constants::{
        ANNUAL_CONSUMPTION, BASE_GROWTH_RATE, GROWTH_RATE_CLAMP, IRRIGATION_YIELD_BONUS,
        MAX_YIELD_PER_MU,
    },
    county::{round1, CountyState, VillageState},
    ledger,
};
use serde::{Deserialize, Serialize};

/// Carrying capacity of a village under current policy and environment.
pub fn village_ceiling(village: &VillageState, ag_suitability: f64, irrigation_level: u8, tax_rate: f64) -> i64 {
    let effective_farmland = village.farmland.max(0) as f64 * (1.0 - village.gentry_land_pct);
    let irrigation_bonus = 1.0 + irrigation_level as f64 * IRRIGATION_YIELD_BONUS;
    let ceiling = effective_farmland * ag_suitability * MAX_YIELD_PER_MU * irrigation_bonus * (1.0 - tax_rate)
        / ANNUAL_CONSUMPTION;
    ceiling as i64
}

/// Diminishing boost below capacity, aggressive decline above it.
pub fn capacity_modifier(population: i64, ceiling: i64) -> f64 {
    if ceiling <= 0 {
        return -0.5;
    }
    let ratio = (ceiling - population) as f64 / ceiling as f64;
    if ratio > 0.0 {
        ratio.sqrt()
    } else {
        ratio * 2.0
    }
}

/// Annual growth rate for one village, clamped to the growth band.
pub fn growth_rate(village_morale: f64, medical_level: u8, modifier: f64) -> f64 {
    let morale_mult = 1.01f64.powf(village_morale - 50.0);
    let medical_mult = 1.05f64.powi(medical_level as i32);
    (BASE_GROWTH_RATE * morale_mult * medical_mult * modifier).clamp(-GROWTH_RATE_CLAMP, GROWTH_RATE_CLAMP)
}

/// Recompute every village's dynamic ceiling from the live environment.
pub fn refresh_ceilings(county: &mut CountyState) {
    let suitability = county.environment.agriculture_suitability;
    let irrigation = county.irrigation_level;
    let tax_rate = county.tax_rate;
    for village in &mut county.villages {
        village.ceiling = village_ceiling(village, suitability, irrigation, tax_rate);
    }
}

/// What a territory exposes to its peers for migration comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerView {
    pub name: String,
    pub population: i64,
    pub metrics: CompetitionMetrics,
}

impl PeerView {
    pub fn of(name: &str, county: &CountyState) -> Self {
        Self {
            name: name.to_string(),
            population: county.total_population(),
            metrics: CompetitionMetrics::of(county),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompetitionMetrics {
    pub morale: f64,
    pub security: f64,
    pub commercial: f64,
    pub education: f64,
}

impl CompetitionMetrics {
    pub fn of(county: &CountyState) -> Self {
        Self {
            morale: county.morale,
            security: county.security,
            commercial: county.commercial,
            education: county.education,
        }
    }

    fn dims(&self) -> [(&'static str, f64); 4] {
        [
            ("morale", self.morale),
            ("security", self.security),
            ("commercial", self.commercial),
            ("education", self.education),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimBucket {
    Lead,
    Lag,
    Parity,
    Mid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Inflow,
    Outflow,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimComparison {
    pub dim: String,
    pub own: f64,
    pub peer: f64,
    pub diff: f64,
    pub bucket: DimBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairEvaluation {
    pub direction: FlowDirection,
    pub rate: f64,
    pub lead_count: usize,
    pub lag_count: usize,
    pub parity_count: usize,
    pub mid_count: usize,
    pub dims: Vec<DimComparison>,
}

/// Rate for `count` significant dimensions; counts above the table saturate.
pub fn migration_rate_for_dim_count(count: usize, config: &MigrationConfig) -> f64 {
    if count == 0 {
        return 0.0;
    }
    config.rates[count.min(config.rates.len() - 1)]
}

/// Lead/lag/parity classification of one (own, peer) pair.
/// Flow needs a significant dimension on one side and none on the other.
pub fn classify_pair(own: &CompetitionMetrics, peer: &CompetitionMetrics, config: &MigrationConfig) -> PairEvaluation {
    let mut eval = PairEvaluation {
        direction: FlowDirection::None,
        rate: 0.0,
        lead_count: 0,
        lag_count: 0,
        parity_count: 0,
        mid_count: 0,
        dims: Vec::with_capacity(4),
    };
    for ((dim, own_value), (_, peer_value)) in own.dims().into_iter().zip(peer.dims()) {
        let diff = own_value - peer_value;
        let bucket = if diff >= config.significant_diff {
            eval.lead_count += 1;
            DimBucket::Lead
        } else if diff <= -config.significant_diff {
            eval.lag_count += 1;
            DimBucket::Lag
        } else if diff.abs() < config.parity_diff {
            eval.parity_count += 1;
            DimBucket::Parity
        } else {
            eval.mid_count += 1;
            DimBucket::Mid
        };
        eval.dims.push(DimComparison {
            dim: dim.to_string(),
            own: round1(own_value),
            peer: round1(peer_value),
            diff: round1(diff),
            bucket,
        });
    }

    if eval.lead_count >= 1 && eval.lag_count == 0 {
        eval.direction = FlowDirection::Inflow;
        eval.rate = migration_rate_for_dim_count(eval.lead_count, config);
    } else if eval.lag_count >= 1 && eval.lead_count == 0 {
        eval.direction = FlowDirection::Outflow;
        eval.rate = migration_rate_for_dim_count(eval.lag_count, config);
    }
    eval
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPair {
    pub peer_name: String,
    pub peer_population: i64,
    pub own_population: i64,
    pub moved: i64,
    pub evaluation: PairEvaluation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub inflow_total: i64,
    pub outflow_total: i64,
    pub cap_rate: f64,
    pub pairs: Vec<MigrationPair>,
}

/// County-level annual inflow and outflow against every peer, each total
/// capped at a share of own population.
pub fn competitive_migration(county: &CountyState, peers: &[PeerView], config: &MigrationConfig) -> MigrationSummary {
    let own_pop = county.total_population();
    let mut summary = MigrationSummary { cap_rate: config.flow_cap, ..Default::default() };
    if peers.is_empty() || own_pop <= 0 {
        return summary;
    }
    let own = CompetitionMetrics::of(county);
    let (mut inflow, mut outflow) = (0i64, 0i64);

    for peer in peers {
        if peer.population <= 0 {
            continue;
        }
        let evaluation = classify_pair(&own, &peer.metrics, config);
        let moved = match evaluation.direction {
            FlowDirection::Inflow => (peer.population as f64 * evaluation.rate) as i64,
            FlowDirection::Outflow => (own_pop as f64 * evaluation.rate) as i64,
            FlowDirection::None => 0,
        };
        match evaluation.direction {
            FlowDirection::Inflow => inflow += moved,
            FlowDirection::Outflow => outflow += moved,
            FlowDirection::None => {}
        }
        summary.pairs.push(MigrationPair {
            peer_name: peer.name.clone(),
            peer_population: peer.population,
            own_population: own_pop,
            moved,
            evaluation,
        });
    }

    let cap = (own_pop as f64 * config.flow_cap) as i64;
    summary.inflow_total = inflow.min(cap);
    summary.outflow_total = outflow.min(cap);
    summary
}

/// Split `total_flow` across villages by population share. Leftover units
/// go to the largest fractional remainders, then larger villages, then
/// earlier villages.
pub fn allocate_flow_by_population(populations: &[i64], total_flow: i64) -> Vec<i64> {
    let total_pop: i64 = populations.iter().map(|p| (*p).max(0)).sum();
    if total_flow <= 0 || total_pop <= 0 {
        return vec![0; populations.len()];
    }
    let raw: Vec<f64> = populations
        .iter()
        .map(|p| total_flow as f64 * (*p).max(0) as f64 / total_pop as f64)
        .collect();
    let mut allocated: Vec<i64> = raw.iter().map(|x| *x as i64).collect();
    let remainder = total_flow - allocated.iter().sum::<i64>();
    if remainder <= 0 {
        return allocated;
    }

    let mut ranked: Vec<usize> = (0..populations.len()).collect();
    ranked.sort_by(|&a, &b| {
        let frac_a = raw[a] - allocated[a] as f64;
        let frac_b = raw[b] - allocated[b] as f64;
        frac_b
            .total_cmp(&frac_a)
            .then(populations[b].cmp(&populations[a]))
            .then(a.cmp(&b))
    });
    for &i in ranked.iter().take(remainder as usize) {
        allocated[i] += 1;
    }
    allocated
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VillageGrowth {
    pub name: String,
    pub pop_before: i64,
    pub ceiling: i64,
    /// Percent, two decimals.
    pub growth_rate: f64,
    pub delta_growth: i64,
    pub inflow: i64,
    pub outflow: i64,
    pub pop_after: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationUpdate {
    pub villages: Vec<VillageGrowth>,
    pub total_before: i64,
    pub total_after: i64,
    pub total_change: i64,
    pub migration: MigrationSummary,
}

/// Natural growth plus competitive migration, written to peasant ledgers.
pub fn annual_population_update(county: &mut CountyState, peers: &[PeerView], config: &MigrationConfig) -> PopulationUpdate {
    let total_before = county.total_population();
    let migration = competitive_migration(county, peers, config);
    let populations: Vec<i64> = county.villages.iter().map(|v| v.population).collect();
    let inflow = allocate_flow_by_population(&populations, migration.inflow_total);
    let outflow = allocate_flow_by_population(&populations, migration.outflow_total);

    let suitability = county.environment.agriculture_suitability;
    let irrigation = county.irrigation_level;
    let tax_rate = county.tax_rate;
    let medical = county.medical_level;

    let mut details = Vec::with_capacity(county.villages.len());
    for (idx, village) in county.villages.iter_mut().enumerate() {
        let pop = village.peasant_ledger.registered_population.max(0);
        let ceiling = village_ceiling(village, suitability, irrigation, tax_rate);
        village.ceiling = ceiling;
        let rate = growth_rate(village.morale, medical, capacity_modifier(pop, ceiling));
        let delta_growth = (pop as f64 * rate) as i64;
        let new_pop = (pop + delta_growth + inflow[idx] - outflow[idx]).max(0);
        village.peasant_ledger.registered_population = new_pop;
        ledger::sync_legacy_from_ledgers(village);
        details.push(VillageGrowth {
            name: village.name.clone(),
            pop_before: pop,
            ceiling,
            growth_rate: (rate * 10_000.0).round() / 100.0,
            delta_growth,
            inflow: inflow[idx],
            outflow: outflow[idx],
            pop_after: new_pop,
        });
    }

    let total_after = county.total_population();
    PopulationUpdate {
        villages: details,
        total_before,
        total_after,
        total_change: total_after - total_before,
        migration,
    }
}
