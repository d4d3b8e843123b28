//! Monthly settlement of one county.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1.  Ledger sync              every month
//!   2.  Fiscal year reset        month 1
//!   3.  Environment drift        drift month (2)
//!   4.  Investment completions   every month
//!   5.  Disaster check           check month (6)
//!   6.  Morale                   every month
//!   7.  Security                 every month
//!   8.  Corvée                   corvée months (1, 5)
//!   9.  Autumn settlement        harvest month (9)
//!   10. Gentry grain             every month; the harvest lands in month 9
//!   11. Village grain refresh    every month
//!   12. Commerce                 every month
//!   13. Land surveys             every month
//!   14. Annexation watch         every month
//!   15. Ceiling refresh          every month
//!   16. Winter settlement        month 12
//!   17. Promise check            every month
//!
//! RULES:
//!   - A tick works on a copy of the county and commits only on success.
//!   - Each step draws from its own (slot, month) stream.
//!   - Settlement never touches negotiation sessions. It only proposes
//!     triggers for the engine to open.

use crate::{
    config::EngineConfig,
    county::{round2, CountyState, Disaster, YearSnapshot},
    disaster::{self, DisasterImpact},
    error::SimResult,
    ledger,
    metrics::{self, CommercialReport, CorveeCollection},
    negotiation::{NegotiationContext, NegotiationTrigger},
    population::{self, PeerView, PopulationUpdate},
    promise::{self, PromiseResolution},
    rng::{RngBank, SubsystemSlot},
    seasonal::{self, AutumnReport, LandSurveyReport},
    subsystem::{SettlementStep, TickContext},
    types::{year_of, Month, HARVEST_MONTH, MONTHS_PER_YEAR},
};
use serde::{Deserialize, Serialize};

/// Everything one month of settlement did to one county.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub month: Month,
    pub events: Vec<String>,
    pub completed_investments: Vec<String>,
    pub corvee: Option<CorveeCollection>,
    pub commercial: Option<CommercialReport>,
    pub autumn: Option<AutumnReport>,
    pub winter_snapshot: Option<YearSnapshot>,
    pub population_update: Option<PopulationUpdate>,
    pub disaster: Option<Disaster>,
    pub disaster_impact: Option<DisasterImpact>,
    pub land_surveys: Vec<LandSurveyReport>,
    pub negotiation_triggers: Vec<NegotiationTrigger>,
    pub promises: Vec<PromiseResolution>,
    pub monthly_snapshot: YearSnapshot,
}

pub struct Settlement {
    config: EngineConfig,
    steps: Vec<Box<dyn SettlementStep>>,
}

impl Settlement {
    /// A settlement with every step registered in the documented order.
    pub fn new(config: EngineConfig) -> Self {
        let mut settlement = Self { config, steps: Vec::new() };
        settlement.register(Box::new(LedgerSync));
        settlement.register(Box::new(FiscalReset));
        settlement.register(Box::new(EnvironmentDrift));
        settlement.register(Box::new(InvestmentCompletions));
        settlement.register(Box::new(DisasterCheck));
        settlement.register(Box::new(MoraleUpdate));
        settlement.register(Box::new(SecurityUpdate));
        settlement.register(Box::new(CorveeLevy));
        settlement.register(Box::new(AutumnHarvest));
        settlement.register(Box::new(GentryGrain));
        settlement.register(Box::new(VillageGrain));
        settlement.register(Box::new(Commerce));
        settlement.register(Box::new(LandSurveys));
        settlement.register(Box::new(AnnexationWatch));
        settlement.register(Box::new(CeilingRefresh));
        settlement.register(Box::new(WinterClose));
        settlement.register(Box::new(PromiseCheck));
        settlement
    }

    fn register(&mut self, step: Box<dyn SettlementStep>) {
        self.steps.push(step);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Settle `month` for one county. On error the county is unchanged.
    pub fn settle(
        &self,
        county: &mut CountyState,
        month: Month,
        peers: &[PeerView],
        rng_bank: &RngBank,
    ) -> SimResult<SettlementReport> {
        let ctx = TickContext::new(month, &self.config, peers, rng_bank);
        let mut working = county.clone();
        let mut report = SettlementReport { month, ..Default::default() };

        for step in &self.steps {
            if !step.applies(&ctx) {
                continue;
            }
            step.run(&mut working, &ctx, &mut report)?;
            log::trace!("month={month} step={} done", step.name());
        }

        report.disaster = working.disaster_this_year.clone().or_else(|| {
            report.disaster_impact.as_ref().map(|i| i.disaster.clone())
        });
        report.monthly_snapshot = working.year_snapshot(year_of(month), month);
        *county = working;
        log::debug!(
            "month={month} settled: treasury={:.1} morale={:.1} events={}",
            county.treasury,
            county.morale,
            report.events.len()
        );
        Ok(report)
    }
}

struct LedgerSync;

impl SettlementStep for LedgerSync {
    fn name(&self) -> &'static str {
        "ledger_sync"
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, _report: &mut SettlementReport) -> SimResult<()> {
        ledger::ensure_county_ledgers(county);
        ledger::seed_gentry_grain_if_needed(county, &ctx.config.economy, ctx.month);
        Ok(())
    }
}

struct FiscalReset;

impl SettlementStep for FiscalReset {
    fn name(&self) -> &'static str {
        "fiscal_reset"
    }

    fn applies(&self, ctx: &TickContext<'_>) -> bool {
        ctx.month_of_year() == 1
    }

    fn run(&self, county: &mut CountyState, _ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        metrics::reset_fiscal_year(county);
        report.events.push("new fiscal year opened".to_string());
        Ok(())
    }
}

struct EnvironmentDrift;

impl SettlementStep for EnvironmentDrift {
    fn name(&self) -> &'static str {
        "environment_drift"
    }

    fn applies(&self, ctx: &TickContext<'_>) -> bool {
        ctx.month_of_year() == ctx.config.disaster.drift_month
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        let mut rng = ctx.rng(SubsystemSlot::Environment);
        disaster::drift_environment(county, &mut rng);
        report.events.extend(disaster::environment_notes(county));
        Ok(())
    }
}

struct InvestmentCompletions;

impl SettlementStep for InvestmentCompletions {
    fn name(&self) -> &'static str {
        "investment_completions"
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        let done = seasonal::apply_completed_investments(county, ctx.month);
        report.events.extend(done.iter().cloned());
        report.completed_investments.extend(done);
        Ok(())
    }
}

struct DisasterCheck;

impl SettlementStep for DisasterCheck {
    fn name(&self) -> &'static str {
        "disaster_check"
    }

    fn applies(&self, ctx: &TickContext<'_>) -> bool {
        ctx.month_of_year() == ctx.config.disaster.check_month
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        let mut rng = ctx.rng(SubsystemSlot::Disaster);
        if let Some(impact) = disaster::disaster_check(county, &ctx.config.disaster, &mut rng) {
            log::info!("month={} disaster: {} severity={:.3}", ctx.month, impact.disaster.kind.name(), impact.disaster.severity);
            report.events.push(disaster::describe_impact(&impact));
            report.disaster_impact = Some(impact);
        }
        Ok(())
    }
}

struct MoraleUpdate;

impl SettlementStep for MoraleUpdate {
    fn name(&self) -> &'static str {
        "morale"
    }

    fn run(&self, county: &mut CountyState, _ctx: &TickContext<'_>, _report: &mut SettlementReport) -> SimResult<()> {
        metrics::update_morale(county);
        Ok(())
    }
}

struct SecurityUpdate;

impl SettlementStep for SecurityUpdate {
    fn name(&self) -> &'static str {
        "security"
    }

    fn run(&self, county: &mut CountyState, _ctx: &TickContext<'_>, _report: &mut SettlementReport) -> SimResult<()> {
        metrics::update_security(county);
        Ok(())
    }
}

struct CorveeLevy;

impl SettlementStep for CorveeLevy {
    fn name(&self) -> &'static str {
        "corvee"
    }

    fn applies(&self, ctx: &TickContext<'_>) -> bool {
        ctx.config.economy.corvee_months.contains(&ctx.month_of_year())
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        let levy = metrics::collect_corvee(county, &ctx.config.economy);
        report.events.push(format!(
            "corvée on {} registered peasants: {:.0} levied, {:.0} kept",
            levy.liable_population, levy.half_year_levy, levy.retained
        ));
        report.corvee = Some(levy);
        Ok(())
    }
}

struct AutumnHarvest;

impl SettlementStep for AutumnHarvest {
    fn name(&self) -> &'static str {
        "autumn"
    }

    fn applies(&self, ctx: &TickContext<'_>) -> bool {
        ctx.month_of_year() == HARVEST_MONTH
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        let mut rng = ctx.rng(SubsystemSlot::Harvest);
        let outcome = seasonal::autumn_settlement(county, ctx.peers, &ctx.config.migration, &mut rng);
        report.events.extend(outcome.events);
        report.autumn = Some(outcome.report);
        report.population_update = Some(outcome.population);
        Ok(())
    }
}

struct GentryGrain;

impl SettlementStep for GentryGrain {
    fn name(&self) -> &'static str {
        "gentry_grain"
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, _report: &mut SettlementReport) -> SimResult<()> {
        ledger::advance_gentry_grain_ledgers(county, &ctx.config.economy, ctx.month);
        Ok(())
    }
}

struct VillageGrain;

impl SettlementStep for VillageGrain {
    fn name(&self) -> &'static str {
        "village_grain"
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, _report: &mut SettlementReport) -> SimResult<()> {
        ledger::refresh_village_grain_ledgers(county, ctx.month);
        Ok(())
    }
}

struct Commerce;

impl SettlementStep for Commerce {
    fn name(&self) -> &'static str {
        "commercial"
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        report.commercial = Some(metrics::update_commercial(county, &ctx.config.economy));
        Ok(())
    }
}

struct LandSurveys;

impl SettlementStep for LandSurveys {
    fn name(&self) -> &'static str {
        "land_surveys"
    }

    fn run(&self, county: &mut CountyState, _ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        if county.pending_land_surveys.is_empty() {
            return Ok(());
        }
        let (surveys, triggers) = seasonal::run_land_surveys(county);
        for s in &surveys {
            report.events.push(format!(
                "survey of {}: cultivated {} of ceiling {} ({:.1}%), {}",
                s.village, s.cultivated_land, s.land_ceiling, s.utilization_pct, s.verdict
            ));
        }
        report.land_surveys.extend(surveys);
        report.negotiation_triggers.extend(triggers);
        Ok(())
    }
}

/// Probability that a village's gentry moves to buy up peasant land this month.
pub fn annexation_probability(base: f64, village_morale: f64, gentry_pct: f64, has_disaster: bool) -> f64 {
    let mut p = base;
    if village_morale < 40.0 {
        p += 0.10;
    }
    if village_morale < 25.0 {
        p += 0.15;
    }
    if gentry_pct > 0.35 {
        p += 0.05;
    }
    if has_disaster {
        p += 0.10;
    }
    if village_morale > 60.0 {
        p -= 0.05;
    }
    p.clamp(0.0, 0.5)
}

struct AnnexationWatch;

impl SettlementStep for AnnexationWatch {
    fn name(&self) -> &'static str {
        "annexation_watch"
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        let mut rng = ctx.rng(SubsystemSlot::Annexation);
        let has_disaster = county.disaster_this_year.is_some();
        let base = ctx.config.negotiation.annexation_base_probability;
        for v in &county.villages {
            let p = annexation_probability(base, v.morale, v.gentry_land_pct, has_disaster);
            if !rng.chance(p) {
                continue;
            }
            let increase = round2(rng.uniform(0.03, 0.08));
            report.events.push(format!("gentry of {} are buying up peasant land", v.name));
            report.negotiation_triggers.push(NegotiationTrigger {
                village: v.name.clone(),
                context: NegotiationContext::Annexation {
                    village: v.name.clone(),
                    current_pct: v.gentry_land_pct,
                    proposed_pct_increase: increase,
                },
            });
            break;
        }
        Ok(())
    }
}

struct CeilingRefresh;

impl SettlementStep for CeilingRefresh {
    fn name(&self) -> &'static str {
        "ceiling_refresh"
    }

    fn run(&self, county: &mut CountyState, _ctx: &TickContext<'_>, _report: &mut SettlementReport) -> SimResult<()> {
        population::refresh_ceilings(county);
        Ok(())
    }
}

struct WinterClose;

impl SettlementStep for WinterClose {
    fn name(&self) -> &'static str {
        "winter"
    }

    fn applies(&self, ctx: &TickContext<'_>) -> bool {
        ctx.month_of_year() == MONTHS_PER_YEAR
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        let snapshot = seasonal::winter_settlement(county, ctx.month);
        report.events.push(format!("year {} closed", snapshot.year));
        report.winter_snapshot = Some(snapshot);
        Ok(())
    }
}

struct PromiseCheck;

impl SettlementStep for PromiseCheck {
    fn name(&self) -> &'static str {
        "promise_check"
    }

    fn run(&self, county: &mut CountyState, ctx: &TickContext<'_>, report: &mut SettlementReport) -> SimResult<()> {
        if county.promises.iter().all(|p| !p.is_pending()) {
            return Ok(());
        }
        let resolved = promise::check_promises(county, ctx.month);
        for r in &resolved {
            log::debug!("month={} promise {} {:?}, integrity now {}", ctx.month, r.promise_id, r.status, r.integrity_after);
            report.events.push(promise::describe(r));
        }
        report.promises.extend(resolved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_register_in_documented_order() {
        let settlement = Settlement::new(EngineConfig::default());
        assert_eq!(
            settlement.step_names(),
            vec![
                "ledger_sync",
                "fiscal_reset",
                "environment_drift",
                "investment_completions",
                "disaster_check",
                "morale",
                "security",
                "corvee",
                "autumn",
                "gentry_grain",
                "village_grain",
                "commercial",
                "land_surveys",
                "annexation_watch",
                "ceiling_refresh",
                "winter",
                "promise_check",
            ]
        );
    }

    #[test]
    fn annexation_probability_is_capped() {
        assert!((annexation_probability(0.03, 20.0, 0.5, true) - 0.43).abs() < 1e-9);
        assert_eq!(annexation_probability(0.3, 20.0, 0.5, true), 0.5);
        assert_eq!(annexation_probability(0.03, 70.0, 0.2, false), 0.0);
    }
}
