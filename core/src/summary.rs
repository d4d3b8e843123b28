//! End-of-term summary: each territory against its own starting point and
//! against its peers.
//!
//! A metric's raw score comes from its change over the term; it is then
//! blended with the territory's percentile among all territories on the
//! same change.

use crate::{
    county::{round1, CountyState, YearSnapshot},
    territory::Territory,
    types::{Month, TerritoryId},
};
use serde::{Deserialize, Serialize};

const RAW_WEIGHT: f64 = 0.7;
const PERCENTILE_WEIGHT: f64 = 0.3;
const RANK_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
    Failing,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excellent
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Fair
        } else if score >= 30.0 {
            Self::NeedsImprovement
        } else {
            Self::Failing
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::NeedsImprovement => "needs improvement",
            Self::Failing => "failing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub initial: f64,
    pub last: f64,
    pub delta: f64,
    pub raw: f64,
    pub percentile: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerritorySummary {
    pub territory: TerritoryId,
    pub name: String,
    pub is_player: bool,
    pub population_initial: i64,
    pub population_final: i64,
    /// None when the county started empty.
    pub population_change_pct: Option<f64>,
    pub population: MetricScore,
    pub treasury: MetricScore,
    pub morale: MetricScore,
    pub security: MetricScore,
    pub commercial: MetricScore,
    pub education: MetricScore,
    /// Weighted blend of the livelihood metrics.
    pub infrastructure: f64,
    pub overall: f64,
    pub grade: Grade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSummary {
    pub months_completed: Month,
    pub territories: Vec<TerritorySummary>,
}

impl TermSummary {
    pub fn player(&self) -> Option<&TerritorySummary> {
        self.territories.iter().find(|t| t.is_player)
    }
}

pub fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Neutral 50, 1.5 points per unit of change.
pub fn delta_score(delta: f64) -> f64 {
    clamp_score(50.0 + delta * 1.5)
}

pub fn pct_change(initial: f64, last: f64) -> Option<f64> {
    if initial == 0.0 {
        None
    } else {
        Some((last - initial) / initial * 100.0)
    }
}

/// Percentile of `target` among `values`, higher being better. Ties share
/// their average rank; a field of one scores 50.
pub fn rank_percentile(target: f64, values: &[f64]) -> f64 {
    let total = values.len();
    if total <= 1 {
        return 50.0;
    }
    let greater = values.iter().filter(|v| **v > target + RANK_EPSILON).count();
    let equal = values.iter().filter(|v| (**v - target).abs() <= RANK_EPSILON).count().max(1);
    let avg_rank = greater as f64 + (equal as f64 + 1.0) / 2.0;
    round1(clamp_score(100.0 * (total as f64 - avg_rank) / (total as f64 - 1.0)))
}

pub fn blend(raw: f64, percentile: f64) -> f64 {
    clamp_score(raw * RAW_WEIGHT + percentile * PERCENTILE_WEIGHT)
}

struct TermDeltas {
    population_initial: i64,
    population_final: i64,
    population_change_pct: Option<f64>,
    initial: YearSnapshot,
    last: YearSnapshot,
}

fn deltas(county: &CountyState, month: Month) -> TermDeltas {
    let last = county.year_snapshot(crate::types::year_of(month.max(1)), month);
    let initial = county.initial_snapshot.clone().unwrap_or_else(|| last.clone());
    TermDeltas {
        population_initial: initial.total_population,
        population_final: last.total_population,
        population_change_pct: pct_change(initial.total_population as f64, last.total_population as f64),
        initial,
        last,
    }
}

/// Score every territory at `month` against its initial snapshot and its peers.
pub fn summarize(territories: &[Territory], month: Month) -> TermSummary {
    let all: Vec<TermDeltas> = territories.iter().map(|t| deltas(&t.county, month)).collect();

    let field = |pick: fn(&TermDeltas) -> (f64, f64)| -> Vec<(f64, f64)> { all.iter().map(pick).collect() };
    let population = field(|d| (d.population_initial as f64, d.population_final as f64));
    let treasury = field(|d| (d.initial.treasury, d.last.treasury));
    let morale = field(|d| (d.initial.morale, d.last.morale));
    let security = field(|d| (d.initial.security, d.last.security));
    let commercial = field(|d| (d.initial.commercial, d.last.commercial));
    let education = field(|d| (d.initial.education, d.last.education));

    let pop_changes: Vec<f64> = all.iter().map(|d| d.population_change_pct.unwrap_or(0.0)).collect();

    let summaries = territories
        .iter()
        .zip(all.iter())
        .enumerate()
        .map(|(i, (territory, d))| {
            let pop_change = d.population_change_pct.unwrap_or(0.0);
            let pop_raw = clamp_score(65.0 + pop_change * 2.5);
            let pop_percentile = rank_percentile(pop_change, &pop_changes);
            let population_score = MetricScore {
                initial: population[i].0,
                last: population[i].1,
                delta: round1(pop_change),
                raw: round1(pop_raw),
                percentile: pop_percentile,
                score: round1(blend(pop_raw, pop_percentile)),
            };
            let treasury_score = metric_score(i, &treasury, |delta| clamp_score(50.0 + delta / 20.0));
            let morale_score = metric_score(i, &morale, delta_score);
            let security_score = metric_score(i, &security, delta_score);
            let commercial_score = metric_score(i, &commercial, delta_score);
            let education_score = metric_score(i, &education, delta_score);

            let infrastructure = clamp_score(
                morale_score.score * 0.25
                    + security_score.score * 0.25
                    + education_score.score * 0.20
                    + population_score.score * 0.15
                    + commercial_score.score * 0.15,
            );
            let overall = round1(clamp_score(infrastructure * RAW_WEIGHT + treasury_score.score * PERCENTILE_WEIGHT));

            TerritorySummary {
                territory: territory.id.clone(),
                name: territory.name.clone(),
                is_player: territory.is_player,
                population_initial: d.population_initial,
                population_final: d.population_final,
                population_change_pct: d.population_change_pct.map(round1),
                population: population_score,
                treasury: treasury_score,
                morale: morale_score,
                security: security_score,
                commercial: commercial_score,
                education: education_score,
                infrastructure: round1(infrastructure),
                overall,
                grade: Grade::from_score(overall),
            }
        })
        .collect();

    TermSummary { months_completed: month, territories: summaries }
}

fn metric_score(index: usize, values: &[(f64, f64)], raw_of: fn(f64) -> f64) -> MetricScore {
    let (initial, last) = values[index];
    let delta = last - initial;
    let all_deltas: Vec<f64> = values.iter().map(|(a, b)| b - a).collect();
    let raw = raw_of(delta);
    let percentile = rank_percentile(delta, &all_deltas);
    MetricScore {
        initial: round1(initial),
        last: round1(last),
        delta: round1(delta),
        raw: round1(raw),
        percentile,
        score: round1(blend(raw, percentile)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_score_is_centered_and_clamped() {
        assert_eq!(delta_score(0.0), 50.0);
        assert_eq!(delta_score(10.0), 65.0);
        assert_eq!(delta_score(-40.0), 0.0);
        assert_eq!(delta_score(80.0), 100.0);
    }

    #[test]
    fn percentile_uses_average_rank() {
        assert_eq!(rank_percentile(5.0, &[5.0]), 50.0);
        assert_eq!(rank_percentile(3.0, &[3.0, 2.0, 1.0]), 100.0);
        assert_eq!(rank_percentile(1.0, &[3.0, 2.0, 1.0]), 0.0);
        // Two-way tie at the top of three: average rank 1.5.
        assert_eq!(rank_percentile(3.0, &[3.0, 3.0, 1.0]), 75.0);
    }

    #[test]
    fn grade_bands() {
        assert_eq!(Grade::from_score(90.0), Grade::Excellent);
        assert_eq!(Grade::from_score(89.9), Grade::Good);
        assert_eq!(Grade::from_score(50.0), Grade::Fair);
        assert_eq!(Grade::from_score(30.0), Grade::NeedsImprovement);
        assert_eq!(Grade::from_score(29.9), Grade::Failing);
    }

    #[test]
    fn blend_weights_raw_and_percentile() {
        assert!((blend(80.0, 50.0) - 71.0).abs() < 1e-9);
    }
}
