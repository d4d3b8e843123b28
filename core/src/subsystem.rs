//! Settlement step trait.
//!
//! RULE: Every monthly settlement stage implements SettlementStep.
//! The orchestrator calls run() on each registered step in registration
//! order, every month. Execution order is fixed and documented in
//! settlement.rs.

use crate::{
    config::EngineConfig,
    county::CountyState,
    error::SimResult,
    population::PeerView,
    rng::{RngBank, SubsystemRng, SubsystemSlot},
    settlement::SettlementReport,
    types::{month_of_year, Month},
};

/// Read-only inputs shared by every step of one tick.
pub struct TickContext<'a> {
    pub month: Month,
    pub config: &'a EngineConfig,
    pub peers: &'a [PeerView],
    rng_bank: &'a RngBank,
}

impl<'a> TickContext<'a> {
    pub fn new(month: Month, config: &'a EngineConfig, peers: &'a [PeerView], rng_bank: &'a RngBank) -> Self {
        Self { month, config, peers, rng_bank }
    }

    /// Month within the year, 1..=12.
    pub fn month_of_year(&self) -> Month {
        month_of_year(self.month)
    }

    /// This month's stream for `slot`. Asking twice yields the same draws.
    pub fn rng(&self, slot: SubsystemSlot) -> SubsystemRng {
        self.rng_bank.for_month(slot, self.month)
    }
}

/// The contract every settlement stage must fulfill.
pub trait SettlementStep: Send + Sync {
    /// Unique stable name for this step.
    fn name(&self) -> &'static str;

    /// Whether the step runs this month. Most run every month.
    fn applies(&self, _ctx: &TickContext<'_>) -> bool {
        true
    }

    /// Mutate the tick's working copy and record what happened.
    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()>;
}
