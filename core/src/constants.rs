//! Fixed engine constants. Tunable parameters live in `config.rs`.

/// Grain yield per mu of farmland under perfect conditions (jin).
pub const MAX_YIELD_PER_MU: f64 = 200.0;

/// Grain one person eats in a year (jin).
pub const ANNUAL_CONSUMPTION: f64 = 300.0;

/// Gentry registered households eat at this multiple of a peasant.
pub const GENTRY_CONSUMPTION_MULTIPLIER: f64 = 3.0;

pub const BASE_GROWTH_RATE: f64 = 0.015;
pub const GROWTH_RATE_CLAMP: f64 = 0.025;

/// Yield bonus per irrigation level.
pub const IRRIGATION_YIELD_BONUS: f64 = 0.15;

/// Flood/drought damage reduction by irrigation level.
pub const IRRIGATION_DAMAGE_REDUCTION: [f64; 4] = [0.0, 0.15, 0.30, 0.60];

/// Agricultural output (taels) per mu of farmland at suitability 1.0.
pub const OUTPUT_PER_MU: f64 = 0.5;

pub const INFRA_MAX_LEVEL: u8 = 3;

/// Annual medical upkeep by level.
pub const MEDICAL_COSTS: [f64; 4] = [0.0, 25.0, 50.0, 100.0];

/// Annual irrigation upkeep per level.
pub const IRRIGATION_MAINT_PER_LEVEL: f64 = 10.0;

pub const BAILIFF_COST_PER_LEVEL: f64 = 40.0;
pub const VILLAGE_SCHOOL_COST: f64 = 10.0;

/// Population loss multipliers applied in sequence during autumn.
pub const GRANARY_POP_LOSS_MULTIPLIER: f64 = 0.65;
pub const RELIEF_POP_LOSS_MULTIPLIER: f64 = 0.65;

/// Fixed land-use baseline: cultivated land at creation is 80% of the ceiling.
pub const LAND_CEILING_HEADROOM: f64 = 1.25;

/// Utilization (percent) at which reclamation is no longer advised and
/// overdevelopment starts feeding disaster probability.
pub const LAND_UTILIZATION_LIMIT: f64 = 90.0;

pub const METRIC_MIN: f64 = 0.0;
pub const METRIC_MAX: f64 = 100.0;

/// Land gentry may hold as a share of a village's registered farmland.
pub const MAX_GENTRY_LAND_PCT: f64 = 0.8;

pub const TAX_RATE_MIN: f64 = 0.09;
pub const TAX_RATE_MAX: f64 = 0.15;

/// Registered gentry household members per mu of registered holding.
pub const GENTRY_HOUSEHOLD_LAND: i64 = 400;
