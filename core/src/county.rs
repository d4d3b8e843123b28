//! County state: the document each territory's monthly tick transforms.
//!
//! RULES:
//!   - Legacy village fields (population, farmland, hidden_land,
//!     gentry_land_pct) are a view over the dual ledgers and are only
//!     written by `ledger::sync_legacy_from_ledgers`.
//!   - `land_ceiling` is fixed at creation or backfill.
//!   - Scalar metrics stay within [0, 100].

use crate::{
    constants::{GENTRY_HOUSEHOLD_LAND, LAND_CEILING_HEADROOM, METRIC_MAX, METRIC_MIN},
    investment::InvestmentAction,
    ledger,
    population,
    promise::{Promise, INTEGRITY_START},
    rng::SubsystemRng,
    types::Month,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub agriculture_suitability: f64,
    pub flood_risk: f64,
    pub border_threat: f64,
}

impl Default for Environment {
    fn default() -> Self {
        Self { agriculture_suitability: 0.7, flood_risk: 0.4, border_threat: 0.2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisasterKind {
    Flood,
    Drought,
    Locust,
    Plague,
}

impl DisasterKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flood => "flood",
            Self::Drought => "drought",
            Self::Locust => "locust",
            Self::Plague => "plague",
        }
    }

    /// Whether irrigation mitigates this hazard.
    pub fn irrigation_mitigated(&self) -> bool {
        matches!(self, Self::Flood | Self::Drought)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disaster {
    #[serde(rename = "type")]
    pub kind: DisasterKind,
    pub severity: f64,
    #[serde(default)]
    pub relieved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeasantLedger {
    pub registered_population: i64,
    pub farmland: i64,
    pub grain_surplus: f64,
    pub monthly_consumption: f64,
    pub monthly_surplus: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GentryLedger {
    pub registered_population: i64,
    pub hidden_population: i64,
    pub registered_farmland: i64,
    pub hidden_farmland: i64,
    pub grain_surplus: f64,
    pub grain_surplus_seeded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VillageState {
    pub name: String,
    pub population: i64,
    pub farmland: i64,
    pub hidden_land: i64,
    pub gentry_land_pct: f64,
    pub peasant_ledger: PeasantLedger,
    pub gentry_ledger: GentryLedger,
    /// Fixed land-use baseline for utilization ratios.
    pub land_ceiling: i64,
    /// Dynamic carrying capacity, recomputed every tick.
    pub ceiling: i64,
    pub morale: f64,
    pub security: f64,
    pub has_school: bool,
    pub hidden_land_discovered: bool,
}

impl VillageState {
    /// Build a village with consistent ledgers from headline figures.
    pub fn new(name: &str, farmland: i64, gentry_land_pct: f64, hidden_land: i64) -> Self {
        let farmland = farmland.max(0);
        let gentry_land = (farmland as f64 * gentry_land_pct.clamp(0.0, 1.0)) as i64;
        let peasant_ledger = PeasantLedger { farmland: farmland - gentry_land, ..Default::default() };
        let gentry_ledger = GentryLedger {
            registered_population: gentry_households(gentry_land),
            registered_farmland: gentry_land,
            hidden_farmland: hidden_land.max(0),
            ..Default::default()
        };
        let mut village = Self {
            name: name.to_string(),
            population: 0,
            farmland,
            hidden_land: 0,
            gentry_land_pct: 0.0,
            peasant_ledger,
            gentry_ledger,
            land_ceiling: 0,
            ceiling: 0,
            morale: 50.0,
            security: 50.0,
            has_school: false,
            hidden_land_discovered: false,
        };
        village.land_ceiling = baseline_land_ceiling(village.cultivated_land());
        ledger::sync_legacy_from_ledgers(&mut village);
        village
    }

    pub fn with_metrics(mut self, morale: f64, security: f64) -> Self {
        self.morale = clamp_metric(morale);
        self.security = clamp_metric(security);
        self
    }

    pub fn with_population(mut self, population: i64) -> Self {
        self.peasant_ledger.registered_population = population.max(0);
        ledger::sync_legacy_from_ledgers(&mut self);
        self
    }

    /// Registered plus hidden farmland actually under the plough.
    pub fn cultivated_land(&self) -> i64 {
        self.peasant_ledger.farmland
            + self.gentry_ledger.registered_farmland
            + self.gentry_ledger.hidden_farmland
    }

    /// Cultivated land as a percentage of the fixed land ceiling.
    pub fn utilization_pct(&self) -> f64 {
        if self.land_ceiling <= 0 {
            return 0.0;
        }
        self.cultivated_land() as f64 / self.land_ceiling as f64 * 100.0
    }
}

/// Fixed land ceiling for a village with `cultivated` mu under the plough.
pub fn baseline_land_ceiling(cultivated: i64) -> i64 {
    (cultivated.max(0) as f64 * LAND_CEILING_HEADROOM).round() as i64
}

/// Estimated registered gentry household members for a holding.
pub fn gentry_households(registered_land: i64) -> i64 {
    if registered_land <= 0 {
        0
    } else {
        (registered_land / GENTRY_HOUSEHOLD_LAND).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub name: String,
    pub merchants: u32,
    pub trade_index: f64,
    /// Gross merchandise value of the last month.
    #[serde(default)]
    pub gmv: f64,
}

/// Accumulators reset at month 1 of every year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FiscalYear {
    pub commercial_tax: f64,
    pub commercial_retained: f64,
    pub corvee_tax: f64,
    pub corvee_retained: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminCostDetail {
    pub base: f64,
    pub bailiff: f64,
    pub school: f64,
    pub irrigation_maint: f64,
    pub medical_maint: f64,
}

impl AdminCostDetail {
    pub fn total(&self) -> f64 {
        self.base + self.bailiff + self.school + self.irrigation_maint + self.medical_maint
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GentryContribution {
    pub village: String,
    pub counterpart: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub action: InvestmentAction,
    pub started_month: Month,
    pub completion_month: Month,
    #[serde(default)]
    pub target_village: Option<String>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub gentry_contributions: Vec<GentryContribution>,
}

/// County-level figures captured at creation and at every year end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearSnapshot {
    pub year: u32,
    pub month: Month,
    pub total_population: i64,
    pub total_farmland: i64,
    pub treasury: f64,
    pub morale: f64,
    pub security: f64,
    pub commercial: f64,
    pub education: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyState {
    pub morale: f64,
    pub security: f64,
    pub commercial: f64,
    pub education: f64,
    pub treasury: f64,
    pub tax_rate: f64,
    pub commercial_tax_rate: f64,
    pub remit_ratio: f64,
    pub irrigation_level: u8,
    pub school_level: u8,
    pub medical_level: u8,
    pub bailiff_level: u8,
    pub has_granary: bool,
    pub admin_cost: f64,
    pub admin_cost_detail: AdminCostDetail,
    pub price_index: f64,
    pub road_repair_count: u32,
    pub environment: Environment,
    pub disaster_this_year: Option<Disaster>,
    pub active_investments: Vec<Investment>,
    pub fiscal_year: FiscalYear,
    pub peasant_grain_reserve: f64,
    /// Gentry share of registered land across the county.
    pub gentry_land_ratio: f64,
    pub gentry_grain_surplus_total: f64,
    pub villages: Vec<VillageState>,
    pub markets: Vec<Market>,
    pub pending_land_surveys: Vec<String>,
    pub initial_snapshot: Option<YearSnapshot>,
    /// The magistrate's standing for keeping promises, 0 to 100.
    pub integrity: i32,
    pub promises: Vec<Promise>,
}

/// Headline figures of the standard starting county.
const STANDARD_VILLAGES: [(&str, i64, f64, f64, f64); 6] = [
    ("Lijiacun", 6400, 0.35, 50.0, 55.0),
    ("Zhangjiacun", 5200, 0.30, 52.0, 58.0),
    ("Wangjiacun", 7200, 0.40, 48.0, 50.0),
    ("Chenjiacun", 4400, 0.25, 55.0, 60.0),
    ("Zhaojiacun", 5600, 0.38, 45.0, 52.0),
    ("Liujiacun", 3200, 0.20, 53.0, 57.0),
];

/// Starting population as a share of each village's carrying capacity.
const INITIAL_POPULATION_SHARE: f64 = 0.60;

/// Share of gentry registered land also farmed off the register at start.
const INITIAL_HIDDEN_LAND_SHARE: f64 = 0.15;

impl CountyState {
    /// An empty county with default scalar settings and no villages.
    pub fn blank() -> Self {
        let admin_cost_detail = AdminCostDetail { base: 80.0, ..Default::default() };
        Self {
            morale: 50.0,
            security: 55.0,
            commercial: 35.0,
            education: 25.0,
            treasury: 400.0,
            tax_rate: 0.12,
            commercial_tax_rate: 0.03,
            remit_ratio: 0.65,
            irrigation_level: 0,
            school_level: 1,
            medical_level: 0,
            bailiff_level: 0,
            has_granary: false,
            admin_cost: admin_cost_detail.total(),
            admin_cost_detail,
            price_index: 1.0,
            road_repair_count: 0,
            environment: Environment::default(),
            disaster_this_year: None,
            active_investments: Vec::new(),
            fiscal_year: FiscalYear::default(),
            peasant_grain_reserve: 0.0,
            gentry_land_ratio: 0.0,
            gentry_grain_surplus_total: 0.0,
            villages: Vec::new(),
            markets: Vec::new(),
            pending_land_surveys: Vec::new(),
            initial_snapshot: None,
            integrity: INTEGRITY_START,
            promises: Vec::new(),
        }
    }

    /// The standard six-village county.
    pub fn standard() -> Self {
        let villages = STANDARD_VILLAGES
            .iter()
            .map(|&(name, farmland, pct, morale, security)| {
                let hidden = (farmland as f64 * pct * INITIAL_HIDDEN_LAND_SHARE) as i64;
                VillageState::new(name, farmland, pct, hidden).with_metrics(morale, security)
            })
            .collect();
        let markets = vec![
            Market { name: "Dongguan Fair".into(), merchants: 15, trade_index: 35.0, gmv: 0.0 },
            Market { name: "Xijie Market".into(), merchants: 10, trade_index: 30.0, gmv: 0.0 },
        ];
        Self::populate(villages, markets)
    }

    /// A peer county: the standard layout with seeded variation.
    pub fn generate(rng: &mut SubsystemRng) -> Self {
        let villages = STANDARD_VILLAGES
            .iter()
            .map(|&(name, farmland, pct, morale, security)| {
                let farmland = (farmland as f64 * rng.uniform(0.85, 1.15)) as i64;
                let pct = (pct + rng.uniform(-0.08, 0.08)).clamp(0.1, 0.6);
                let hidden = (farmland as f64 * pct * rng.uniform(0.0, 0.3)) as i64;
                VillageState::new(name, farmland, pct, hidden).with_metrics(
                    morale + rng.uniform(-8.0, 8.0),
                    security + rng.uniform(-8.0, 8.0),
                )
            })
            .collect();
        let markets = vec![
            Market {
                name: "East Fair".into(),
                merchants: 10 + rng.next_u64_below(8) as u32,
                trade_index: 30.0 + rng.uniform(0.0, 10.0),
                gmv: 0.0,
            },
            Market {
                name: "West Market".into(),
                merchants: 6 + rng.next_u64_below(8) as u32,
                trade_index: 25.0 + rng.uniform(0.0, 10.0),
                gmv: 0.0,
            },
        ];
        let mut county = Self::populate(villages, markets);
        county.morale = clamp_metric(county.morale + rng.uniform(-8.0, 8.0));
        county.security = clamp_metric(county.security + rng.uniform(-8.0, 8.0));
        county.commercial = clamp_metric(county.commercial + rng.uniform(-10.0, 10.0));
        county.education = clamp_metric(county.education + rng.uniform(-10.0, 10.0));
        county.treasury = (county.treasury * rng.uniform(0.8, 1.2)).round();
        county.environment.agriculture_suitability =
            (county.environment.agriculture_suitability + rng.uniform(-0.1, 0.1)).clamp(0.3, 1.0);
        county.environment.flood_risk =
            (county.environment.flood_risk + rng.uniform(-0.15, 0.15)).clamp(0.0, 1.0);
        county
    }

    /// Seat populations at a share of capacity and open the grain books.
    pub fn populate(villages: Vec<VillageState>, markets: Vec<Market>) -> Self {
        let mut county = Self::blank();
        county.villages = villages;
        county.markets = markets;
        let tax_rate = county.tax_rate;
        let irrigation = county.irrigation_level;
        let suitability = county.environment.agriculture_suitability;
        for village in &mut county.villages {
            let ceiling = population::village_ceiling(village, suitability, irrigation, tax_rate);
            village.ceiling = ceiling;
            if village.peasant_ledger.registered_population == 0 {
                village.peasant_ledger.registered_population =
                    (ceiling as f64 * INITIAL_POPULATION_SHARE) as i64;
            }
            ledger::sync_legacy_from_ledgers(village);
        }
        county.peasant_grain_reserve = ledger::opening_peasant_reserve(&county);
        ledger::refresh_village_grain_ledgers(&mut county, 1);
        county.initial_snapshot = Some(county.year_snapshot(0, 0));
        county
    }

    pub fn total_population(&self) -> i64 {
        self.villages.iter().map(|v| v.population).sum()
    }

    pub fn total_farmland(&self) -> i64 {
        self.villages.iter().map(|v| v.farmland).sum()
    }

    pub fn village(&self, name: &str) -> Option<&VillageState> {
        self.villages.iter().find(|v| v.name == name)
    }

    pub fn village_mut(&mut self, name: &str) -> Option<&mut VillageState> {
        self.villages.iter_mut().find(|v| v.name == name)
    }

    /// Recompute admin_cost from its breakdown.
    pub fn recompute_admin_cost(&mut self) {
        self.admin_cost = self.admin_cost_detail.total();
    }

    pub fn year_snapshot(&self, year: u32, month: Month) -> YearSnapshot {
        YearSnapshot {
            year,
            month,
            total_population: self.total_population(),
            total_farmland: self.total_farmland(),
            treasury: round1(self.treasury),
            morale: round1(self.morale),
            security: round1(self.security),
            commercial: round1(self.commercial),
            education: round1(self.education),
        }
    }

    /// True once every metric is inside its legal range.
    pub fn metrics_in_bounds(&self) -> bool {
        [self.morale, self.security, self.commercial, self.education]
            .iter()
            .all(|m| (METRIC_MIN..=METRIC_MAX).contains(m))
    }
}

pub fn clamp_metric(value: f64) -> f64 {
    value.clamp(METRIC_MIN, METRIC_MAX)
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
