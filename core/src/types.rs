//! Shared primitive types used across the entire simulation.

/// A simulation month. Month 1 is the first month of the term.
pub type Month = u32;

/// A stable identifier for a territory (the player's county or a peer).
pub type TerritoryId = String;

/// A stable identifier for a negotiation session.
pub type SessionId = String;

/// The canonical run identifier.
pub type RunId = String;

/// Length of one governor's term.
pub const TERM_MONTHS: Month = 36;

/// Month-of-year in which the harvest is collected.
pub const HARVEST_MONTH: Month = 9;

pub const MONTHS_PER_YEAR: Month = 12;

/// Month-of-year (1..=12) for an absolute month. Month 0 maps to 12.
pub fn month_of_year(month: Month) -> Month {
    if month == 0 {
        return MONTHS_PER_YEAR;
    }
    (month - 1) % MONTHS_PER_YEAR + 1
}

/// Term year (1-based) containing `month`.
pub fn year_of(month: Month) -> u32 {
    if month == 0 {
        return 1;
    }
    (month - 1) / MONTHS_PER_YEAR + 1
}

/// Absolute month of the next harvest strictly after `month`.
pub fn next_harvest_month(month: Month) -> Month {
    let base = (year_of(month) - 1) * MONTHS_PER_YEAR;
    if month_of_year(month) < HARVEST_MONTH {
        base + HARVEST_MONTH
    } else {
        base + MONTHS_PER_YEAR + HARVEST_MONTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_helpers() {
        assert_eq!(month_of_year(1), 1);
        assert_eq!(month_of_year(12), 12);
        assert_eq!(month_of_year(13), 1);
        assert_eq!(month_of_year(36), 12);
        assert_eq!(year_of(12), 1);
        assert_eq!(year_of(13), 2);
        assert_eq!(next_harvest_month(3), 9);
        assert_eq!(next_harvest_month(9), 21);
        assert_eq!(next_harvest_month(22), 33);
    }
}
