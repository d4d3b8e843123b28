//! Village dual ledgers: peasant vs. gentry population, land and grain.
//!
//! RULES:
//!   - The ledgers are the source of truth. Legacy village fields are
//!     recomputed by `sync_legacy_from_ledgers` after every mutation.
//!   - Hidden land is untaxed and excluded from every registered ratio.
//!   - The gentry grain reserve accumulates across years; it is never reset.

use crate::{
    constants::{
        ANNUAL_CONSUMPTION, GENTRY_CONSUMPTION_MULTIPLIER, IRRIGATION_YIELD_BONUS,
        MAX_YIELD_PER_MU,
    },
    config::EconomyConfig,
    county::{baseline_land_ceiling, clamp_metric, round1, round4, CountyState, GentryLedger, PeasantLedger, VillageState},
    disaster,
    snapshot::VillageRecord,
    types::{month_of_year, Month, HARVEST_MONTH, MONTHS_PER_YEAR},
};

/// Legacy gentry share assumed when an old record carries none.
const DEFAULT_GENTRY_LAND_PCT: f64 = 0.3;

/// Months of consumption already eaten when a reserve is opened in January.
const OPENING_MONTHS_CONSUMED: f64 = 4.0;

fn safe_int(value: f64) -> i64 {
    if value.is_finite() {
        value.round() as i64
    } else {
        0
    }
}

/// Build a village from a persisted record, backfilling any ledger field
/// the record lacks from its legacy aggregates.
pub fn ensure_village_ledgers(record: VillageRecord) -> VillageState {
    let legacy_pop = safe_int(record.population).max(0);
    let legacy_farmland = safe_int(record.farmland).max(0);
    let legacy_hidden = safe_int(record.hidden_land).max(0);
    let legacy_pct = record
        .gentry_land_pct
        .filter(|p| p.is_finite())
        .unwrap_or(DEFAULT_GENTRY_LAND_PCT)
        .clamp(0.0, 1.0);

    let default_gentry_land = ((legacy_farmland as f64 * legacy_pct) as i64).max(0);
    let default_peasant_land = (legacy_farmland - default_gentry_land).max(0);

    let p = record.peasant_ledger.unwrap_or_default();
    let peasant_ledger = PeasantLedger {
        registered_population: p.registered_population.map(safe_int).unwrap_or(legacy_pop),
        farmland: p.farmland.map(safe_int).unwrap_or(default_peasant_land),
        grain_surplus: p.grain_surplus.unwrap_or(0.0),
        monthly_consumption: p.monthly_consumption.unwrap_or(0.0),
        monthly_surplus: p.monthly_surplus.unwrap_or(0.0),
    };

    let g = record.gentry_ledger.unwrap_or_default();
    let gentry_ledger = GentryLedger {
        registered_population: g.registered_population.map(safe_int).unwrap_or(0),
        hidden_population: g.hidden_population.map(safe_int).unwrap_or(0),
        registered_farmland: g.registered_farmland.map(safe_int).unwrap_or(default_gentry_land),
        hidden_farmland: g.hidden_farmland.map(safe_int).unwrap_or(legacy_hidden),
        grain_surplus: g.grain_surplus.unwrap_or(0.0),
        grain_surplus_seeded: g.grain_surplus_seeded.unwrap_or(false),
    };

    let mut village = VillageState {
        name: record.name,
        population: 0,
        farmland: 0,
        hidden_land: 0,
        gentry_land_pct: 0.0,
        peasant_ledger,
        gentry_ledger,
        land_ceiling: 0,
        ceiling: record.ceiling.max(0),
        morale: clamp_metric(record.morale),
        security: clamp_metric(record.security),
        has_school: record.has_school,
        hidden_land_discovered: record.hidden_land_discovered,
    };
    sync_legacy_from_ledgers(&mut village);
    village.land_ceiling = match record.land_ceiling {
        Some(ceiling) if ceiling > 0 => ceiling,
        _ => baseline_land_ceiling(village.cultivated_land()),
    };
    village
}

/// Repair every village of a live county in place.
pub fn ensure_county_ledgers(county: &mut CountyState) {
    for village in &mut county.villages {
        sync_legacy_from_ledgers(village);
    }
    county.gentry_land_ratio = sync_county_gentry_ratio(county);
}

/// Clamp ledger quantities and recompute the legacy aggregates.
pub fn sync_legacy_from_ledgers(village: &mut VillageState) {
    let peasant = &mut village.peasant_ledger;
    peasant.registered_population = peasant.registered_population.max(0);
    peasant.farmland = peasant.farmland.max(0);

    let gentry = &mut village.gentry_ledger;
    gentry.registered_population = gentry.registered_population.max(0);
    gentry.hidden_population = gentry.hidden_population.max(0);
    gentry.registered_farmland = gentry.registered_farmland.max(0);
    gentry.hidden_farmland = gentry.hidden_farmland.max(0);

    let registered_total = village.peasant_ledger.farmland + village.gentry_ledger.registered_farmland;
    village.population = village.peasant_ledger.registered_population;
    village.farmland = registered_total;
    village.hidden_land = village.gentry_ledger.hidden_farmland;
    village.gentry_land_pct = if registered_total > 0 {
        round4(village.gentry_ledger.registered_farmland as f64 / registered_total as f64)
    } else {
        0.0
    };
}

/// County gentry share of registered land. Hidden land is excluded.
pub fn sync_county_gentry_ratio(county: &CountyState) -> f64 {
    let (registered, gentry) = county.villages.iter().fold((0i64, 0i64), |(reg, gen), v| {
        let g = v.gentry_ledger.registered_farmland.max(0);
        (reg + v.peasant_ledger.farmland.max(0) + g, gen + g)
    });
    if registered > 0 {
        round4(gentry as f64 / registered as f64)
    } else {
        0.0
    }
}

/// Months elapsed since the last harvest. The harvest month itself is 0.
/// Month 0 is not a valid month and is treated as January (4).
pub fn months_since_harvest(month: Month) -> u32 {
    if month == 0 {
        return 4;
    }
    let moy = month_of_year(month);
    if moy >= HARVEST_MONTH {
        moy - HARVEST_MONTH
    } else {
        moy + MONTHS_PER_YEAR - HARVEST_MONTH
    }
}

/// Months until the next harvest; the harvest month looks a full year ahead.
pub fn months_until_harvest(month: Month) -> u32 {
    let remaining = MONTHS_PER_YEAR - months_since_harvest(month);
    if remaining == 0 {
        MONTHS_PER_YEAR
    } else {
        remaining
    }
}

/// Grain a gentry household needs in a year. Registered members live
/// at three times a peasant's consumption.
pub fn gentry_annual_need(gentry: &GentryLedger) -> f64 {
    gentry.registered_population.max(0) as f64 * ANNUAL_CONSUMPTION * GENTRY_CONSUMPTION_MULTIPLIER
        + gentry.hidden_population.max(0) as f64 * ANNUAL_CONSUMPTION
}

fn yield_per_mu(county: &CountyState) -> f64 {
    MAX_YIELD_PER_MU
        * county.environment.agriculture_suitability
        * (1.0 + county.irrigation_level as f64 * IRRIGATION_YIELD_BONUS)
}

/// Gentry harvest after tax on registered land and the helper fee.
///
/// `actual = false` is the opening approximation at the nominal tax rate.
/// `actual = true` applies this year's disaster damage and the
/// morale-adjusted collection efficiency.
pub fn gentry_harvest_income(
    village: &VillageState,
    county: &CountyState,
    economy: &EconomyConfig,
    actual: bool,
) -> f64 {
    let gentry = &village.gentry_ledger;
    let per_mu = yield_per_mu(county);
    let registered = gentry.registered_farmland.max(0) as f64;
    let hidden = gentry.hidden_farmland.max(0) as f64;
    let mut gross = (registered + hidden) * per_mu;
    let mut taxable = registered * per_mu;

    let tax_paid = if actual {
        let intact = 1.0 - disaster::harvest_damage(county);
        gross *= intact;
        taxable *= intact;
        taxable * county.tax_rate * collection_efficiency(county.morale)
    } else {
        taxable * county.tax_rate
    };
    gross - tax_paid - gross * economy.gentry_helper_fee_rate
}

/// Share of assessed tax actually collected at a given morale.
pub fn collection_efficiency(morale: f64) -> f64 {
    0.7 + 0.3 * (clamp_metric(morale) / 100.0)
}

/// After-tax peasant grain for one village, optionally disaster-damaged.
pub fn peasant_harvest_income(village: &VillageState, county: &CountyState, include_disaster: bool) -> f64 {
    let income = village.peasant_ledger.farmland.max(0) as f64 * yield_per_mu(county) * (1.0 - county.tax_rate);
    if include_disaster {
        income * (1.0 - disaster::harvest_damage(county))
    } else {
        income
    }
}

/// Open a gentry reserve for every ledger still lacking one.
pub fn seed_gentry_grain_if_needed(county: &mut CountyState, economy: &EconomyConfig, month: Month) {
    let elapsed_ratio = months_since_harvest(month) as f64 / MONTHS_PER_YEAR as f64;
    let snapshot = county.clone();
    for village in &mut county.villages {
        if village.gentry_ledger.grain_surplus_seeded {
            continue;
        }
        let income = gentry_harvest_income(village, &snapshot, economy, false);
        let opening_cost = gentry_annual_need(&village.gentry_ledger) * elapsed_ratio;
        village.gentry_ledger.grain_surplus = round1(income - opening_cost);
        village.gentry_ledger.grain_surplus_seeded = true;
    }
    county.gentry_grain_surplus_total = total_gentry_grain(county);
}

/// One month of gentry grain: the harvest lands in the harvest month,
/// consumption is deducted every month.
pub fn advance_gentry_grain_ledgers(county: &mut CountyState, economy: &EconomyConfig, month: Month) {
    seed_gentry_grain_if_needed(county, economy, month);
    let is_harvest = month_of_year(month) == HARVEST_MONTH;
    let snapshot = county.clone();
    for village in &mut county.villages {
        let mut reserve = village.gentry_ledger.grain_surplus;
        if is_harvest {
            reserve += gentry_harvest_income(village, &snapshot, economy, true);
        }
        reserve -= gentry_annual_need(&village.gentry_ledger) / MONTHS_PER_YEAR as f64;
        village.gentry_ledger.grain_surplus = round1(reserve);
        village.gentry_ledger.grain_surplus_seeded = true;
    }
    county.gentry_grain_surplus_total = total_gentry_grain(county);
}

fn total_gentry_grain(county: &CountyState) -> f64 {
    round1(county.villages.iter().map(|v| v.gentry_ledger.grain_surplus).sum())
}

fn village_reserve_base(village: &VillageState, county: &CountyState) -> f64 {
    let pop = village.peasant_ledger.registered_population.max(0) as f64;
    peasant_harvest_income(village, county, false)
        - pop * ANNUAL_CONSUMPTION * (OPENING_MONTHS_CONSUMED / MONTHS_PER_YEAR as f64)
}

/// County peasant reserve for a freshly created county.
pub fn opening_peasant_reserve(county: &CountyState) -> f64 {
    county.villages.iter().map(|v| village_reserve_base(v, county)).sum::<f64>().max(0.0)
}

/// Distribute the county peasant reserve back onto village ledgers and
/// refresh each village's monthly consumption and per-capita surplus.
pub fn refresh_village_grain_ledgers(county: &mut CountyState, month: Month) {
    let bases: Vec<f64> = county.villages.iter().map(|v| village_reserve_base(v, county)).collect();
    let total_base: f64 = bases.iter().sum();
    let reserve = county.peasant_grain_reserve;
    let scale = if total_base > 0.0 && reserve > 0.0 { reserve / total_base } else { 1.0 };
    let remaining = months_until_harvest(month) as f64;

    for (village, base) in county.villages.iter_mut().zip(bases) {
        let peasant = &mut village.peasant_ledger;
        let pop = peasant.registered_population.max(0);
        let village_reserve = base * scale;
        let per_month = pop as f64 * ANNUAL_CONSUMPTION / MONTHS_PER_YEAR as f64;
        peasant.grain_surplus = round1(village_reserve);
        peasant.monthly_consumption = round1(per_month);
        peasant.monthly_surplus = if pop > 0 {
            round1((village_reserve - per_month * remaining) / pop as f64 / remaining)
        } else {
            0.0
        };
    }
    county.gentry_land_ratio = sync_county_gentry_ratio(county);
}

/// Move `land` mu from peasant holdings to gentry registered land, along
/// with a proportional share of peasants into the gentry hidden register.
/// Returns (land moved, population moved).
pub fn transfer_peasant_land_to_gentry(village: &mut VillageState, land: i64) -> (i64, i64) {
    let peasant_land = village.peasant_ledger.farmland.max(0);
    let land = land.clamp(0, peasant_land);
    let pop = village.peasant_ledger.registered_population.max(0);
    let moved_pop = ((pop as f64) * land as f64 / peasant_land.max(1) as f64) as i64;
    let moved_pop = moved_pop.clamp(0, pop);

    village.peasant_ledger.farmland -= land;
    village.gentry_ledger.registered_farmland += land;
    village.peasant_ledger.registered_population -= moved_pop;
    village.gentry_ledger.hidden_population += moved_pop;
    sync_legacy_from_ledgers(village);
    (land, moved_pop)
}

/// Bring `land` mu of gentry hidden land onto the register.
pub fn register_hidden_land(village: &mut VillageState, land: i64) -> i64 {
    let land = land.clamp(0, village.gentry_ledger.hidden_farmland.max(0));
    village.gentry_ledger.hidden_farmland -= land;
    village.gentry_ledger.registered_farmland += land;
    village.hidden_land_discovered = true;
    sync_legacy_from_ledgers(village);
    land
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn months_since_harvest_wraps_at_september() {
        assert_eq!(months_since_harvest(9), 0);
        assert_eq!(months_since_harvest(12), 3);
        assert_eq!(months_since_harvest(1), 4);
        assert_eq!(months_since_harvest(8), 11);
        assert_eq!(months_since_harvest(21), 0);
        assert_eq!(months_since_harvest(0), 4);
        assert_eq!(months_until_harvest(9), 12);
        assert_eq!(months_until_harvest(1), 8);
    }

    #[test]
    fn transfer_keeps_ledgers_consistent() {
        let mut v = VillageState::new("a", 1000, 0.3, 0).with_population(700);
        let (land, pop) = transfer_peasant_land_to_gentry(&mut v, 70);
        assert_eq!(land, 70);
        assert_eq!(pop, 70);
        assert_eq!(v.farmland, 1000);
        assert_eq!(v.population, 630);
        assert_eq!(v.gentry_ledger.hidden_population, 70);
        assert!((v.gentry_land_pct - 0.37).abs() < 1e-9);
    }
}
