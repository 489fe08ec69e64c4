use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::record::DateRange;

/// A full date: `2024-01-01`, `2024/1/1`, `2024.01.01`, `2024年1月1日` or `20240101`.
/// The leading `(?:^|\D)` stops a match from starting inside a longer number.
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|\D)(\d{4})(?:\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})\s*日?|(\d{2})(\d{2}))",
    )
    .expect("date pattern compiles")
});

/// A bare month: `2024-01`, `2024/1`, `2024.01`, `2024年1月`.
static MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{4})\s*[-/.年]\s*(\d{1,2})\s*月?\s*$").expect("month pattern compiles")
});

/// Separators after which the second date is the last billed day.
const INCLUSIVE_SEPARATORS: &[&str] = &["-", "~", "～", "至", "到", "—", "–"];
/// Separators after which the second date is already exclusive.
const EXCLUSIVE_SEPARATORS: &[&str] = &["..", "..."];

/// Parse a period label into a half-open range.
///
/// Two dates joined by `..` are taken as `[start, end)`; joined by any of the
/// inclusive separators they are `[start, end]` and the end is moved one day
/// forward. A bare month covers the whole month. Anything else is `None`.
pub fn parse_period_label(label: &str) -> Option<DateRange> {
    let mut dates = Vec::new();
    for caps in DATE_RE.captures_iter(label) {
        let date = date_from_captures(&caps)?;
        let begin = caps.get(1)?.start();
        let end = caps.get(0)?.end();
        dates.push((date, begin, end));
    }

    match dates.as_slice() {
        [] => parse_month(label),
        [(start, _, first_end), (last, second_begin, _)] => {
            let separator = label[*first_end..*second_begin].trim();
            if EXCLUSIVE_SEPARATORS.contains(&separator) {
                DateRange::new(*start, *last)
            } else if INCLUSIVE_SEPARATORS.contains(&separator) {
                DateRange::from_inclusive(*start, *last)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn date_from_captures(caps: &Captures<'_>) -> Option<NaiveDate> {
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let (month, day) = match (caps.get(2), caps.get(3)) {
        (Some(m), Some(d)) => (m, d),
        _ => (caps.get(4)?, caps.get(5)?),
    };
    NaiveDate::from_ymd_opt(year, month.as_str().parse().ok()?, day.as_str().parse().ok()?)
}

fn parse_month(label: &str) -> Option<DateRange> {
    let caps = MONTH_RE.captures(label)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    DateRange::month(year, month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: (i32, u32, u32), end: (i32, u32, u32)) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn double_dot_end_is_exclusive() {
        assert_eq!(
            parse_period_label("2024-01-01..2024-02-01"),
            Some(range((2024, 1, 1), (2024, 2, 1)))
        );
    }

    #[test]
    fn dash_and_chinese_separators_are_inclusive() {
        let jan = Some(range((2024, 1, 1), (2024, 2, 1)));
        assert_eq!(parse_period_label("2024.01.01-2024.01.31"), jan);
        assert_eq!(parse_period_label("2024/1/1 ~ 2024/1/31"), jan);
        assert_eq!(parse_period_label("2024年1月1日至2024年1月31日"), jan);
        assert_eq!(parse_period_label("20240101-20240131"), jan);
        assert_eq!(parse_period_label("2024-01-01-2024-01-31"), jan);
    }

    #[test]
    fn bare_month_covers_the_month() {
        let feb = Some(range((2024, 2, 1), (2024, 3, 1)));
        assert_eq!(parse_period_label("2024-02"), feb);
        assert_eq!(parse_period_label("2024年2月"), feb);
        assert_eq!(parse_period_label(" 2024.2 "), feb);
    }

    #[test]
    fn surrounding_text_is_ignored() {
        assert_eq!(
            parse_period_label("账单 2023.12.15-2024.01.14 (一号楼)"),
            Some(range((2023, 12, 15), (2024, 1, 15)))
        );
    }

    #[test]
    fn unrecognized_labels_are_rejected() {
        assert_eq!(parse_period_label("Sheet1"), None);
        assert_eq!(parse_period_label("费用(元)"), None);
        assert_eq!(parse_period_label("2024-01-01"), None);
        assert_eq!(parse_period_label("2024-13-01..2024-14-01"), None);
        assert_eq!(parse_period_label("2024-02-01..2024-01-01"), None);
        assert_eq!(parse_period_label("2024-01-01 and 2024-01-31"), None);
        assert_eq!(parse_period_label("2024-01-01..2024-02-01..2024-03-01"), None);
    }
}
