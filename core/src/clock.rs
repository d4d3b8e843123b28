//! Term clock: owns the month counter and the end of the term.

use crate::{
    error::{SimError, SimResult},
    types::{month_of_year, year_of, Month, RunId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermClock {
    pub run_id:        RunId,
    /// Last settled month; 0 before the first tick.
    pub current_month: Month,
    pub term_months:   Month,
}

impl TermClock {
    pub fn new(run_id: RunId, term_months: Month) -> Self {
        Self { run_id, current_month: 0, term_months }
    }

    /// The month the next tick will settle.
    pub fn next_month(&self) -> SimResult<Month> {
        if self.is_over() {
            return Err(SimError::TermOver { month: self.current_month });
        }
        Ok(self.current_month + 1)
    }

    /// Mark the next month as settled. Returns it.
    pub fn advance(&mut self) -> SimResult<Month> {
        let month = self.next_month()?;
        self.current_month = month;
        Ok(month)
    }

    pub fn is_over(&self) -> bool {
        self.current_month >= self.term_months
    }

    pub fn months_left(&self) -> Month {
        self.term_months.saturating_sub(self.current_month)
    }

    /// (year, month of year) of the next month to settle.
    pub fn calendar(&self) -> (u32, Month) {
        let next = self.current_month + 1;
        (year_of(next), month_of_year(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_stops_at_term_end() {
        let mut clock = TermClock::new("r".into(), 2);
        assert_eq!(clock.advance().expect("month 1"), 1);
        assert_eq!(clock.advance().expect("month 2"), 2);
        assert!(clock.is_over());
        assert!(matches!(clock.advance(), Err(SimError::TermOver { month: 2 })));
    }
}
