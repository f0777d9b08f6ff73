/// Money Conversion
///
/// Amounts cross the tool boundary as decimal numbers and are stored as
/// integer cents. All balance arithmetic happens in cents.

use super::error::{LedgerError, LedgerResult};

/// Largest absolute cent value accepted for a single amount and for the
/// running total of one group. Keeps every cent value exactly representable
/// as f64; sums across groups are still checked by their callers.
pub const MAX_CENTS: i64 = 1_000_000_000_000_000;

/// Convert a decimal amount to cents, rounding half to even.
pub fn to_cents(amount: f64) -> LedgerResult<i64> {
    if !amount.is_finite() {
        return Err(LedgerError::invalid("amount must be a finite number"));
    }
    let cents = (amount * 100.0).round_ties_even();
    if cents.abs() > MAX_CENTS as f64 {
        return Err(LedgerError::invalid("amount is out of range"));
    }
    Ok(cents as i64)
}

/// Convert cents back to a decimal amount.
pub fn to_amount(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Split `total` cents into `parts` shares that sum exactly to `total`.
///
/// The first `total % parts` shares carry one extra cent.
pub fn split_cents(total: i64, parts: usize) -> Vec<i64> {
    if parts == 0 {
        return Vec::new();
    }
    let n = parts as i64;
    let base = total.div_euclid(n);
    let extra = total.rem_euclid(n) as usize;
    (0..parts)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

/// Add two cent values, failing instead of wrapping.
pub fn checked_add(a: i64, b: i64) -> LedgerResult<i64> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::invalid("amounts exceed the supported range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_decimal_amounts() {
        assert_eq!(to_cents(12.34).unwrap(), 1234);
        assert_eq!(to_cents(0.1 + 0.2).unwrap(), 30);
        assert_eq!(to_cents(5.0).unwrap(), 500);
        assert_eq!(to_cents(-1.5).unwrap(), -150);
    }

    #[test]
    fn half_cents_round_to_even() {
        assert_eq!(to_cents(0.125).unwrap(), 12);
        assert_eq!(to_cents(0.375).unwrap(), 38);
    }

    #[test]
    fn rejects_non_finite_and_huge_amounts() {
        assert!(to_cents(f64::NAN).is_err());
        assert!(to_cents(f64::INFINITY).is_err());
        assert!(to_cents(1.0e20).is_err());
    }

    #[test]
    fn limit_is_inclusive() {
        assert_eq!(to_cents(1.0e13).unwrap(), MAX_CENTS);
        assert!(to_cents(1.0e13 + 0.01).is_err());
    }

    #[test]
    fn checked_add_reports_overflow() {
        assert_eq!(checked_add(2, 3).unwrap(), 5);
        assert!(matches!(checked_add(i64::MAX, 1), Err(LedgerError::InvalidInput(_))));
        assert!(matches!(checked_add(i64::MIN, -1), Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn split_distributes_remainder_to_leading_shares() {
        assert_eq!(split_cents(1000, 3), vec![334, 333, 333]);
        assert_eq!(split_cents(900, 3), vec![300, 300, 300]);
        assert_eq!(split_cents(2, 3), vec![1, 1, 0]);
        assert_eq!(split_cents(5, 0), Vec::<i64>::new());
    }

    #[test]
    fn split_always_sums_to_total() {
        for total in [1_i64, 7, 99, 10_001, 123_456_789] {
            for parts in 1..=9 {
                assert_eq!(split_cents(total, parts).iter().sum::<i64>(), total);
            }
        }
    }

    #[test]
    fn amount_round_trips_through_cents() {
        assert_eq!(to_amount(1234), 12.34);
        assert_eq!(to_amount(-5), -0.05);
    }
}
