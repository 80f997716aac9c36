//! Crontab parsing and next-fire-time computation.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};

use crate::error::{AutocronError, Result};

const ITERATION_CAP: u32 = 10_000;

/// Whether a crontab with both day-of-month and day-of-week restricted
/// treats the two fields as a union (loose, the default) or an
/// intersection (strict, opt-in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DayOfWeekMode {
    #[default]
    Loose,
    Strict,
}

#[derive(Debug, Clone)]
struct Field {
    /// Sorted, de-duplicated, in-range values the field accepts.
    values: Vec<u32>,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    fn first(&self) -> u32 {
        self.values[0]
    }

    fn next_after(&self, value: u32) -> Option<u32> {
        self.values.iter().copied().find(|v| *v > value)
    }

}

fn parse_field(raw: &str, min: u32, max: u32) -> Result<Field> {
    if raw == "*" {
        return Ok(Field { values: (min..=max).collect() });
    }
    if let Some(step_raw) = raw.strip_prefix("*/") {
        let step: u32 = step_raw
            .parse()
            .map_err(|_| field_error(raw, "invalid step"))?;
        let step = step.max(1);
        let values = (min..=max).step_by(step as usize).collect();
        return Ok(Field { values });
    }
    let mut values = Vec::new();
    for atom in raw.split(',') {
        if let Some((lo, hi)) = atom.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| field_error(raw, "invalid range start"))?;
            let hi: u32 = hi.parse().map_err(|_| field_error(raw, "invalid range end"))?;
            for v in lo..=hi {
                values.push(v);
            }
        } else {
            let v: u32 = atom.parse().map_err(|_| field_error(raw, "invalid atom"))?;
            values.push(v);
        }
    }
    values.sort_unstable();
    values.dedup();
    Ok(Field { values })
}

fn field_error(crontab: &str, reason: &str) -> AutocronError {
    AutocronError::Scheduler {
        crontab: crontab.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses a five-field crontab and computes the next fire time after a
/// given reference instant.
#[derive(Debug, Clone)]
pub struct CronScheduler {
    crontab: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
    mode: DayOfWeekMode,
}

impl CronScheduler {
    pub fn new(crontab: &str) -> Result<Self> {
        Self::with_mode(crontab, DayOfWeekMode::default())
    }

    pub fn with_mode(crontab: &str, mode: DayOfWeekMode) -> Result<Self> {
        let fields: Vec<&str> = crontab.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(field_error(crontab, "expected 5 whitespace-separated fields"));
        }
        Ok(CronScheduler {
            crontab: crontab.to_string(),
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
            mode,
        })
    }

    /// Returns the smallest instant strictly after `reference` that matches
    /// this crontab, at minute resolution (seconds/sub-seconds are zeroed).
    pub fn next_fire_after(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let reference = reference.with_second(0).unwrap().with_nanosecond(0).unwrap();

        // Step 1: later minute within the same hour.
        if let Some(minute) = self.minute.next_after(reference.minute()) {
            if self.hour.contains(reference.hour()) && self.matches_day(reference.date_naive()) {
                return Ok(reference
                    .date_naive()
                    .and_hms_opt(reference.hour(), minute, 0)
                    .unwrap()
                    .and_utc());
            }
        }

        // Step 2: later hour within the same day.
        if let Some(hour) = self.hour.next_after(reference.hour()) {
            if self.matches_day(reference.date_naive()) {
                return Ok(reference
                    .date_naive()
                    .and_hms_opt(hour, self.minute.first(), 0)
                    .unwrap()
                    .and_utc());
            }
        }

        // Step 3 / 4: advance the date, carrying into the month/year as needed.
        let mut date = reference.date_naive();
        for _ in 0..ITERATION_CAP {
            date = date.succ_opt().ok_or_else(|| AutocronError::SchedulerOverflow(self.crontab.clone()))?;
            if !self.month.contains(date.month()) {
                date = first_day_of_next_matching_month(date, &self.month)
                    .ok_or_else(|| AutocronError::SchedulerOverflow(self.crontab.clone()))?;
                continue;
            }
            if self.matches_day(date) {
                return Ok(date
                    .and_hms_opt(self.hour.first(), self.minute.first(), 0)
                    .unwrap()
                    .and_utc());
            }
        }
        Err(AutocronError::SchedulerOverflow(self.crontab.clone()))
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        if !self.month.contains(date.month()) || !self.day_of_month_in_range(date) {
            return false;
        }
        let dom_ok = self.day_of_month.contains(date.day());
        let dow_ok = self.day_of_week.contains(weekday_index(date.weekday()));
        match self.mode {
            DayOfWeekMode::Loose => dom_ok || dow_ok,
            DayOfWeekMode::Strict => dom_ok && dow_ok,
        }
    }

    fn day_of_month_in_range(&self, date: NaiveDate) -> bool {
        date.day() <= days_in_month(date.year(), date.month())
    }
}

/// Sunday = 0 .. Saturday = 6, the day-of-week field's wire convention.
fn weekday_index(weekday: Weekday) -> u32 {
    weekday.num_days_from_sunday()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next_month
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn first_day_of_next_matching_month(from: NaiveDate, month_field: &Field) -> Option<NaiveDate> {
    let mut year = from.year();
    let mut month = from.month();
    for _ in 0..13 {
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
        if month_field.contains(month) {
            return NaiveDate::from_ymd_opt(year, month, 1);
        }
    }
    None
}

/// Sanity helper used by tests and callers that need a concrete
/// `chrono::DateTime<Utc>` from year/month/day/hour/minute components.
pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_step_matches_concrete_scenario() {
        let scheduler = CronScheduler::new("0,30 5,17 * * *").unwrap();
        let reference = utc(2024, 2, 8, 17, 30);
        let next = scheduler.next_fire_after(reference).unwrap();
        assert_eq!(next, utc(2024, 2, 9, 5, 0));
    }

    #[test]
    fn loose_day_of_week_uses_union_semantics() {
        let scheduler = CronScheduler::with_mode("30 13 * * 5", DayOfWeekMode::Loose).unwrap();
        let reference = utc(2024, 2, 9, 13, 30); // a Friday
        let next = scheduler.next_fire_after(reference).unwrap();
        assert_eq!(next, utc(2024, 2, 10, 13, 30));
    }

    #[test]
    fn strict_day_of_week_uses_intersection_semantics() {
        let scheduler = CronScheduler::with_mode("30 13 * * 5", DayOfWeekMode::Strict).unwrap();
        let reference = utc(2024, 2, 9, 13, 30); // a Friday
        let next = scheduler.next_fire_after(reference).unwrap();
        assert_eq!(next, utc(2024, 2, 16, 13, 30));
    }

    #[test]
    fn step_of_one_equals_wildcard() {
        let wildcard = CronScheduler::new("*/1 * * * *").unwrap();
        let reference = utc(2024, 1, 1, 0, 0);
        let next = wildcard.next_fire_after(reference).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 0, 1));
    }

    #[test]
    fn step_beyond_max_yields_only_field_minimum() {
        let field = parse_field("*/100", 0, 59).unwrap();
        assert_eq!(field.values, vec![0]);
    }

    #[test]
    fn next_fire_after_is_strictly_in_the_future() {
        let scheduler = CronScheduler::new("* * * * *").unwrap();
        let reference = Utc::now();
        let next = scheduler.next_fire_after(reference).unwrap();
        assert!(next > reference);
    }
}
