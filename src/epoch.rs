//! Calendar day numbers counted from a fixed local epoch.
//!
//! Day one is 2000-01-01. Time-of-day never matters: every timestamp on the
//! same local calendar date maps to the same number.

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone};

/// Day count since [`EPOCH`], where the epoch itself is day 1.
pub type DayNumber = u32;

/// First day of the numbering.
pub const EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(date) => date,
    None => panic!("epoch is a valid date"),
};

const MONTH_LEN: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

// Every fourth year is a leap year; 2000 counts and 2100 lies outside any
// window this numbering is used for.
fn is_leap(year: i32) -> bool {
    year % 4 == 0
}

/// Convert a calendar date to its day number; dates before the epoch yield 0.
#[must_use]
pub fn date_to_number(date: NaiveDate) -> DayNumber {
    if date < EPOCH {
        return 0;
    }

    let mut n: DayNumber = 0;
    for year in EPOCH.year()..date.year() {
        n += if is_leap(year) { 366 } else { 365 };
    }
    for month in 0..date.month0() as usize {
        n += if month == 1 && is_leap(date.year()) {
            29
        } else {
            MONTH_LEN[month]
        };
    }
    n + date.day()
}

/// Day number of the calendar date `at` falls on in its own time zone.
#[must_use]
pub fn datetime_to_number<Tz: TimeZone>(at: &DateTime<Tz>) -> DayNumber {
    date_to_number(at.date_naive())
}

/// Inverse of [`date_to_number`]; `None` for numbers below 1.
#[must_use]
pub fn number_to_date(n: i64) -> Option<NaiveDate> {
    if n < 1 {
        return None;
    }
    EPOCH.checked_add_days(Days::new(u64::try_from(n - 1).ok()?))
}

/// Local midnight starting day `n`.
///
/// Falls back to the earliest valid instant when midnight is skipped by a
/// daylight-saving transition.
#[must_use]
pub fn local_midnight(n: i64) -> Option<DateTime<Local>> {
    let naive = number_to_date(n)?.and_hms_opt(0, 0, 0)?;
    Local.from_local_datetime(&naive).earliest()
}

/// Day number for today in local time.
#[must_use]
pub fn today_to_number() -> DayNumber {
    datetime_to_number(&Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Timelike};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn epoch_is_day_one() {
        assert_eq!(date_to_number(EPOCH), 1);
        assert_eq!(number_to_date(1), Some(EPOCH));
    }

    #[test]
    fn dates_before_epoch_are_zero() {
        assert_eq!(date_to_number(ymd(1900, 1, 1)), 0);
        assert_eq!(date_to_number(ymd(1999, 12, 31)), 0);
    }

    #[test]
    fn epoch_year_is_leap() {
        assert_eq!(date_to_number(ymd(2000, 2, 28)), 59);
        assert_eq!(date_to_number(ymd(2000, 2, 29)), 60);
        assert_eq!(date_to_number(ymd(2000, 3, 1)), 61);
    }

    #[test]
    fn leap_and_regular_years() {
        let n0 = date_to_number(ymd(2003, 12, 31));
        assert_eq!(n0, 366 + 365 + 365 + 365);
        assert_eq!(date_to_number(ymd(2004, 2, 28)), n0 + 59);
        assert_eq!(date_to_number(ymd(2004, 2, 29)), n0 + 60);
        assert_eq!(date_to_number(ymd(2004, 3, 1)), n0 + 61);

        let n0 = date_to_number(ymd(2002, 12, 31));
        assert_eq!(n0, 366 + 365 + 365);
        assert_eq!(date_to_number(ymd(2003, 2, 28)), n0 + 59);
        assert_eq!(date_to_number(ymd(2003, 3, 1)), n0 + 60);
    }

    #[test]
    fn time_of_day_is_ignored() {
        let day = ymd(2017, 10, 19);
        let n0 = date_to_number(day);
        assert!(n0 > 17 * 365 && n0 < 18 * 365);
        for (h, m, s) in [(0, 0, 0), (6, 30, 12), (12, 0, 0), (23, 59, 59)] {
            let at = day.and_time(NaiveTime::from_hms_opt(h, m, s).unwrap());
            let local = Local.from_local_datetime(&at).earliest().unwrap();
            assert_eq!(datetime_to_number(&local), n0);
        }
    }

    #[test]
    fn invalid_numbers_have_no_date() {
        assert_eq!(number_to_date(0), None);
        assert_eq!(number_to_date(-1), None);
        assert!(local_midnight(-5).is_none());
    }

    #[test]
    fn numbers_map_back_to_dates() {
        assert_eq!(number_to_date(59), Some(ymd(2000, 2, 28)));
        assert_eq!(number_to_date(60), Some(ymd(2000, 2, 29)));
        assert_eq!(number_to_date(61), Some(ymd(2000, 3, 1)));

        let n0 = i64::from(date_to_number(ymd(2003, 12, 31)));
        assert_eq!(number_to_date(n0 + 60), Some(ymd(2004, 2, 29)));
        assert_eq!(number_to_date(n0 + 61), Some(ymd(2004, 3, 1)));
    }

    #[test]
    fn round_trip_truncates_to_midnight() {
        let mut day = EPOCH;
        while day.year() < 2040 {
            let n = date_to_number(day);
            assert_eq!(number_to_date(i64::from(n)), Some(day));
            day = day + Days::new(17);
        }

        let midnight = local_midnight(i64::from(date_to_number(ymd(2021, 6, 5)))).unwrap();
        assert_eq!(midnight.date_naive(), ymd(2021, 6, 5));
        assert_eq!(midnight.hour(), 0);
    }

    #[test]
    fn today_is_after_epoch() {
        assert!(today_to_number() > date_to_number(ymd(2020, 1, 1)));
    }
}
