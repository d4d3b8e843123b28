//! Persisted territory document: full county state to/from JSON.
//!
//! Saves always write complete dual ledgers. Loads tolerate documents
//! written before the ledgers existed (schema 0) or before `land_ceiling`
//! was recorded (schema 1): every ledger field is optional and missing
//! values are backfilled by `ledger::ensure_village_ledgers`.

use crate::{
    county::{
        AdminCostDetail, CountyState, Disaster, Environment, FiscalYear, Investment, Market,
        VillageState, YearSnapshot,
    },
    error::{SimError, SimResult},
    ledger,
    promise::{Promise, INTEGRITY_MAX},
    types::{Month, TerritoryId},
};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerritoryDocument {
    #[serde(default)]
    pub schema_version: u32,
    pub county: CountyRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeasantRecord {
    pub registered_population: Option<f64>,
    pub farmland: Option<f64>,
    pub grain_surplus: Option<f64>,
    pub monthly_consumption: Option<f64>,
    pub monthly_surplus: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GentryRecord {
    pub registered_population: Option<f64>,
    pub hidden_population: Option<f64>,
    pub registered_farmland: Option<f64>,
    pub hidden_farmland: Option<f64>,
    pub grain_surplus: Option<f64>,
    pub grain_surplus_seeded: Option<bool>,
}

/// One village as stored. Legacy aggregates are always present in old
/// saves; ledgers may not be.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VillageRecord {
    pub name: String,
    pub population: f64,
    pub farmland: f64,
    pub hidden_land: f64,
    pub gentry_land_pct: Option<f64>,
    pub peasant_ledger: Option<PeasantRecord>,
    pub gentry_ledger: Option<GentryRecord>,
    pub land_ceiling: Option<i64>,
    pub ceiling: i64,
    pub morale: f64,
    pub security: f64,
    pub has_school: bool,
    pub hidden_land_discovered: bool,
}

impl Default for VillageRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            population: 0.0,
            farmland: 0.0,
            hidden_land: 0.0,
            gentry_land_pct: None,
            peasant_ledger: None,
            gentry_ledger: None,
            land_ceiling: None,
            ceiling: 0,
            morale: 50.0,
            security: 50.0,
            has_school: false,
            hidden_land_discovered: false,
        }
    }
}

impl From<&VillageState> for VillageRecord {
    fn from(v: &VillageState) -> Self {
        let p = &v.peasant_ledger;
        let g = &v.gentry_ledger;
        Self {
            name: v.name.clone(),
            population: v.population as f64,
            farmland: v.farmland as f64,
            hidden_land: v.hidden_land as f64,
            gentry_land_pct: Some(v.gentry_land_pct),
            peasant_ledger: Some(PeasantRecord {
                registered_population: Some(p.registered_population as f64),
                farmland: Some(p.farmland as f64),
                grain_surplus: Some(p.grain_surplus),
                monthly_consumption: Some(p.monthly_consumption),
                monthly_surplus: Some(p.monthly_surplus),
            }),
            gentry_ledger: Some(GentryRecord {
                registered_population: Some(g.registered_population as f64),
                hidden_population: Some(g.hidden_population as f64),
                registered_farmland: Some(g.registered_farmland as f64),
                hidden_farmland: Some(g.hidden_farmland as f64),
                grain_surplus: Some(g.grain_surplus),
                grain_surplus_seeded: Some(g.grain_surplus_seeded),
            }),
            land_ceiling: Some(v.land_ceiling),
            ceiling: v.ceiling,
            morale: v.morale,
            security: v.security,
            has_school: v.has_school,
            hidden_land_discovered: v.hidden_land_discovered,
        }
    }
}

/// County as stored. Any field absent from an old save takes the
/// value of a blank county.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountyRecord {
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
    pub gentry_land_ratio: f64,
    pub gentry_grain_surplus_total: f64,
    pub villages: Vec<VillageRecord>,
    pub markets: Vec<Market>,
    pub pending_land_surveys: Vec<String>,
    pub initial_snapshot: Option<YearSnapshot>,
    pub integrity: i32,
    pub promises: Vec<Promise>,
}

impl Default for CountyRecord {
    fn default() -> Self {
        Self::from(&CountyState::blank())
    }
}

impl From<&CountyState> for CountyRecord {
    fn from(c: &CountyState) -> Self {
        Self {
            morale: c.morale,
            security: c.security,
            commercial: c.commercial,
            education: c.education,
            treasury: c.treasury,
            tax_rate: c.tax_rate,
            commercial_tax_rate: c.commercial_tax_rate,
            remit_ratio: c.remit_ratio,
            irrigation_level: c.irrigation_level,
            school_level: c.school_level,
            medical_level: c.medical_level,
            bailiff_level: c.bailiff_level,
            has_granary: c.has_granary,
            admin_cost: c.admin_cost,
            admin_cost_detail: c.admin_cost_detail.clone(),
            price_index: c.price_index,
            road_repair_count: c.road_repair_count,
            environment: c.environment,
            disaster_this_year: c.disaster_this_year.clone(),
            active_investments: c.active_investments.clone(),
            fiscal_year: c.fiscal_year.clone(),
            peasant_grain_reserve: c.peasant_grain_reserve,
            gentry_land_ratio: c.gentry_land_ratio,
            gentry_grain_surplus_total: c.gentry_grain_surplus_total,
            villages: c.villages.iter().map(VillageRecord::from).collect(),
            markets: c.markets.clone(),
            pending_land_surveys: c.pending_land_surveys.clone(),
            initial_snapshot: c.initial_snapshot.clone(),
            integrity: c.integrity,
            promises: c.promises.clone(),
        }
    }
}

impl TerritoryDocument {
    pub fn from_county(county: &CountyState) -> Self {
        Self { schema_version: SCHEMA_VERSION, county: CountyRecord::from(county) }
    }

    /// Rebuild live state, backfilling whatever the document lacks.
    pub fn into_county(self) -> SimResult<CountyState> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(SimError::UnsupportedSchema { version: self.schema_version });
        }
        let r = self.county;
        let mut county = CountyState {
            morale: r.morale,
            security: r.security,
            commercial: r.commercial,
            education: r.education,
            treasury: r.treasury,
            tax_rate: r.tax_rate,
            commercial_tax_rate: r.commercial_tax_rate,
            remit_ratio: r.remit_ratio,
            irrigation_level: r.irrigation_level,
            school_level: r.school_level,
            medical_level: r.medical_level,
            bailiff_level: r.bailiff_level,
            has_granary: r.has_granary,
            admin_cost: r.admin_cost,
            admin_cost_detail: r.admin_cost_detail,
            price_index: r.price_index,
            road_repair_count: r.road_repair_count,
            environment: r.environment,
            disaster_this_year: r.disaster_this_year,
            active_investments: r.active_investments,
            fiscal_year: r.fiscal_year,
            peasant_grain_reserve: r.peasant_grain_reserve,
            gentry_land_ratio: r.gentry_land_ratio,
            gentry_grain_surplus_total: r.gentry_grain_surplus_total,
            villages: r.villages.into_iter().map(ledger::ensure_village_ledgers).collect(),
            markets: r.markets,
            pending_land_surveys: r.pending_land_surveys,
            initial_snapshot: r.initial_snapshot,
            integrity: r.integrity.clamp(0, INTEGRITY_MAX),
            promises: r.promises,
        };
        county.recompute_admin_cost();
        ledger::ensure_county_ledgers(&mut county);
        Ok(county)
    }

    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Everything needed to resume a territory at a month boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerritorySnapshot {
    pub territory: TerritoryId,
    pub month: Month,
    pub document: TerritoryDocument,
}
