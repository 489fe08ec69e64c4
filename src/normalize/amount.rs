use rust_decimal::{Decimal, RoundingStrategy};
use std::{fmt, str::FromStr};

use crate::grid::RawCell;

/// Why a charge cell could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum AmountIssue {
    Missing,
    Unparsable(String),
    Negative(Decimal),
}

impl fmt::Display for AmountIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountIssue::Missing => write!(f, "charge amount is missing"),
            AmountIssue::Unparsable(raw) => write!(f, "cannot parse charge amount `{}`", raw),
            AmountIssue::Negative(v) => write!(f, "charge amount {} is negative", v),
        }
    }
}

/// Parse a charge cell and fix it to `scale` decimal places (midpoints round
/// away from zero).
pub fn parse_amount(cell: &RawCell, scale: u32) -> Result<Decimal, AmountIssue> {
    let value = match cell {
        RawCell::Empty => return Err(AmountIssue::Missing),
        RawCell::Number(n) => {
            decimal_from_f64(*n).ok_or_else(|| AmountIssue::Unparsable(n.to_string()))?
        }
        RawCell::Text(raw) => {
            let cleaned = clean_amount(raw);
            if cleaned.is_empty() {
                return Err(AmountIssue::Missing);
            }
            Decimal::from_str(&cleaned)
                .map_err(|_| AmountIssue::Unparsable(raw.trim().to_string()))?
        }
        RawCell::Bool(b) => return Err(AmountIssue::Unparsable(b.to_string())),
    };

    let mut value = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    if value.is_zero() {
        value.set_sign_positive(true);
    } else if value.is_sign_negative() {
        return Err(AmountIssue::Negative(value));
    }
    value.rescale(scale);
    Ok(value)
}

/// Go through the shortest round-trip text so `0.1` stays `0.1` instead of
/// the binary expansion of the float.
fn decimal_from_f64(n: f64) -> Option<Decimal> {
    if !n.is_finite() {
        return None;
    }
    Decimal::from_str(&n.to_string()).ok()
}

/// Strip whitespace, thousands separators and currency marks.
fn clean_amount(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches(['¥', '￥', '$'])
        .trim_end_matches('元')
        .trim();
    trimmed
        .chars()
        .filter(|c| !matches!(c, ',' | '，' | ' ' | '\u{a0}'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn numbers_are_fixed_to_scale() {
        let v = parse_amount(&RawCell::Number(100.0), 2).unwrap();
        assert_eq!(v, dec!(100));
        assert_eq!(v.to_string(), "100.00");
        assert_eq!(parse_amount(&RawCell::Number(0.1), 2).unwrap().to_string(), "0.10");
    }

    #[test]
    fn midpoints_round_away_from_zero() {
        assert_eq!(
            parse_amount(&RawCell::Text("2.345".into()), 2).unwrap(),
            dec!(2.35)
        );
        assert_eq!(
            parse_amount(&RawCell::Text("2.344".into()), 2).unwrap(),
            dec!(2.34)
        );
    }

    #[test]
    fn text_amounts_tolerate_formatting() {
        assert_eq!(
            parse_amount(&RawCell::Text(" ¥1,234.50 ".into()), 2).unwrap(),
            dec!(1234.50)
        );
        assert_eq!(
            parse_amount(&RawCell::Text("88元".into()), 2).unwrap(),
            dec!(88)
        );
    }

    #[test]
    fn bad_cells_report_the_reason() {
        assert_eq!(parse_amount(&RawCell::Empty, 2), Err(AmountIssue::Missing));
        assert_eq!(
            parse_amount(&RawCell::Text(" ".into()), 2),
            Err(AmountIssue::Missing)
        );
        assert_eq!(
            parse_amount(&RawCell::Text("n/a".into()), 2),
            Err(AmountIssue::Unparsable("n/a".into()))
        );
        assert_eq!(
            parse_amount(&RawCell::Number(-5.0), 2),
            Err(AmountIssue::Negative(dec!(-5)))
        );
        assert!(parse_amount(&RawCell::Number(f64::NAN), 2).is_err());
    }

    #[test]
    fn negative_zero_is_zero() {
        let v = parse_amount(&RawCell::Text("-0.001".into()), 2).unwrap();
        assert!(v.is_zero());
        assert!(!v.is_sign_negative());
    }
}
