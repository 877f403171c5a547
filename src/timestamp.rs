//! Instant reconstruction for legacy logs.
//!
//! The legacy transcripts only carry a time-of-day fragment per line, so an
//! absolute instant has to be rebuilt from an external base date plus a
//! manual local-to-UTC offset. Kept as pure functions so the arithmetic is
//! testable on its own, away from the line matchers.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

/// Combine a time-of-day with a base date and a local-to-UTC offset in
/// minutes. The offset is subtracted: a line stamped `23:30:00` in a
/// UTC-3 log (`offset = -180`) happened at `02:30:00Z` the next day.
pub fn resolve_instant(
    time: NaiveTime,
    base_date: NaiveDate,
    offset_minutes: i32,
) -> DateTime<Utc> {
    let naive = base_date.and_time(time);
    (naive - Duration::minutes(offset_minutes as i64)).and_utc()
}

/// Parse the `HH:MM:SS` fragment found inside the bracketed line prefix.
pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S").ok()
}

/// Parse a caller-supplied `YYYY-MM-DD` base date.
pub fn parse_base_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Parse the `MM-DD-YY` date embedded in the ULX continuation header.
/// Two-digit years are taken as 20YY; these logs postdate 2000.
pub fn parse_header_date(s: &str) -> Option<NaiveDate> {
    let mut parts = s.splitn(3, '-');
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// Base date precedence: caller-supplied, then the date mined from the log's
/// own header, then today (UTC).
pub fn effective_base_date(
    supplied: Option<NaiveDate>,
    header: Option<NaiveDate>,
) -> NaiveDate {
    supplied.or(header).unwrap_or_else(|| Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_offset_rolls_into_next_day() {
        let time = parse_clock("23:30:00").unwrap();
        let date = parse_base_date("2024-01-01").unwrap();
        let instant = resolve_instant(time, date, -180);
        assert_eq!(instant.to_rfc3339(), "2024-01-02T02:30:00+00:00");
    }

    #[test]
    fn zero_offset_is_identity() {
        let time = parse_clock("12:00:00").unwrap();
        let date = parse_base_date("2024-06-15").unwrap();
        let instant = resolve_instant(time, date, 0);
        assert_eq!(instant.to_rfc3339(), "2024-06-15T12:00:00+00:00");
    }

    #[test]
    fn positive_offset_moves_backwards() {
        let time = parse_clock("00:30:00").unwrap();
        let date = parse_base_date("2024-06-15").unwrap();
        let instant = resolve_instant(time, date, 120);
        assert_eq!(instant.to_rfc3339(), "2024-06-14T22:30:00+00:00");
    }

    #[test]
    fn header_date_two_digit_year() {
        let date = parse_header_date("03-22-19").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2019, 3, 22).unwrap());
    }

    #[test]
    fn header_date_rejects_garbage() {
        assert!(parse_header_date("not-a-date").is_none());
        assert!(parse_header_date("13-45-19").is_none());
    }

    #[test]
    fn base_date_precedence() {
        let supplied = parse_base_date("2024-01-01");
        let header = parse_header_date("03-22-19");
        assert_eq!(effective_base_date(supplied, header), supplied.unwrap());
        assert_eq!(effective_base_date(None, header), header.unwrap());
    }

    #[test]
    fn clock_rejects_bad_fragments() {
        assert!(parse_clock("25:00:00").is_none());
        assert!(parse_clock("12:00").is_none());
    }
}
