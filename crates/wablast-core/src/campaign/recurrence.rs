//! Recurrence evaluation for recurring campaigns

use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};

use crate::error::{CampaignError, Result};

/// Upper bound on missed occurrences skipped in one evaluation
const MAX_CATCH_UP: u32 = 100_000;

/// Computes the next run of a recurring campaign
pub trait RecurrenceEvaluator: Send + Sync {
    /// Reject patterns this evaluator cannot handle
    fn validate(&self, pattern: &str) -> Result<()>;

    /// First occurrence after `now`, stepping from `previous`
    fn next_occurrence(
        &self,
        pattern: &str,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;
}

/// Parsed recurrence pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrencePattern {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    EveryMinutes(u32),
    EveryHours(u32),
    EveryDays(u32),
}

impl RecurrencePattern {
    /// One step forward from `from`
    pub fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            RecurrencePattern::Hourly => from.checked_add_signed(Duration::hours(1)),
            RecurrencePattern::Daily => from.checked_add_signed(Duration::days(1)),
            RecurrencePattern::Weekly => from.checked_add_signed(Duration::weeks(1)),
            RecurrencePattern::Monthly => from.checked_add_months(Months::new(1)),
            RecurrencePattern::EveryMinutes(n) => {
                from.checked_add_signed(Duration::minutes(i64::from(n)))
            }
            RecurrencePattern::EveryHours(n) => {
                from.checked_add_signed(Duration::hours(i64::from(n)))
            }
            RecurrencePattern::EveryDays(n) => from.checked_add_signed(Duration::days(i64::from(n))),
        }
    }
}

impl FromStr for RecurrencePattern {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let invalid = || CampaignError::Validation(format!("Unsupported recurrence pattern: {}", s));

        match normalized.as_str() {
            "hourly" => return Ok(RecurrencePattern::Hourly),
            "daily" => return Ok(RecurrencePattern::Daily),
            "weekly" => return Ok(RecurrencePattern::Weekly),
            "monthly" => return Ok(RecurrencePattern::Monthly),
            _ => {}
        }

        let parts: Vec<&str> = normalized.split_whitespace().collect();
        let [keyword, count, unit] = parts.as_slice() else {
            return Err(invalid());
        };
        if *keyword != "every" {
            return Err(invalid());
        }
        let n: u32 = count.parse().map_err(|_| invalid())?;
        if n == 0 {
            return Err(invalid());
        }

        match unit.trim_end_matches('s') {
            "minute" => Ok(RecurrencePattern::EveryMinutes(n)),
            "hour" => Ok(RecurrencePattern::EveryHours(n)),
            "day" => Ok(RecurrencePattern::EveryDays(n)),
            _ => Err(invalid()),
        }
    }
}

/// Evaluator for `hourly`, `daily`, `weekly`, `monthly` and
/// `every <n> <minutes|hours|days>`, computed in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalRecurrence;

impl RecurrenceEvaluator for IntervalRecurrence {
    fn validate(&self, pattern: &str) -> Result<()> {
        pattern.parse::<RecurrencePattern>().map(|_| ())
    }

    fn next_occurrence(
        &self,
        pattern: &str,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let pattern: RecurrencePattern = pattern.parse()?;
        let overflow = || CampaignError::Validation("Recurrence out of range".to_string());

        let mut next = pattern.advance(previous).ok_or_else(overflow)?;
        let mut steps = 0;
        while next <= now {
            steps += 1;
            if steps > MAX_CATCH_UP {
                return pattern.advance(now).ok_or_else(overflow);
            }
            next = pattern.advance(next).ok_or_else(overflow)?;
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_patterns() {
        assert_eq!("Daily".parse::<RecurrencePattern>().unwrap(), RecurrencePattern::Daily);
        assert_eq!(
            "every 15 minutes".parse::<RecurrencePattern>().unwrap(),
            RecurrencePattern::EveryMinutes(15)
        );
        assert_eq!(
            "every 1 hour".parse::<RecurrencePattern>().unwrap(),
            RecurrencePattern::EveryHours(1)
        );
        assert_eq!(
            " every 3 days ".parse::<RecurrencePattern>().unwrap(),
            RecurrencePattern::EveryDays(3)
        );

        for bad in ["", "yearly", "every 0 days", "every two days", "every 5 weeks", "each 5 days"] {
            assert!(bad.parse::<RecurrencePattern>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_next_occurrence_steps_from_previous() {
        let evaluator = IntervalRecurrence;
        let previous = at(2024, 3, 1, 9);

        assert_eq!(
            evaluator.next_occurrence("daily", previous, previous).unwrap(),
            at(2024, 3, 2, 9)
        );
        assert_eq!(
            evaluator.next_occurrence("weekly", previous, previous).unwrap(),
            at(2024, 3, 8, 9)
        );
        assert_eq!(
            evaluator.next_occurrence("every 6 hours", previous, previous).unwrap(),
            at(2024, 3, 1, 15)
        );
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let evaluator = IntervalRecurrence;
        let previous = at(2024, 1, 31, 8);
        assert_eq!(
            evaluator.next_occurrence("monthly", previous, previous).unwrap(),
            at(2024, 2, 29, 8)
        );
    }

    #[test]
    fn test_missed_occurrences_are_skipped() {
        let evaluator = IntervalRecurrence;
        let previous = at(2024, 3, 1, 9);
        let now = at(2024, 3, 4, 12);
        assert_eq!(
            evaluator.next_occurrence("daily", previous, now).unwrap(),
            at(2024, 3, 5, 9)
        );
    }

    #[test]
    fn test_validate() {
        assert!(IntervalRecurrence.validate("hourly").is_ok());
        assert!(matches!(
            IntervalRecurrence.validate("fortnightly"),
            Err(CampaignError::Validation(_))
        ));
    }
}
