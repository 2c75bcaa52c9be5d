//! Frame interval <-> time-per-frame fraction conversion

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::INTERVAL_UNITS_PER_SECOND;

/// Continued-fraction terms kept when simplifying reported intervals
const SIMPLIFY_TERMS: usize = 8;
/// A continued-fraction term at or above this value ends the expansion
const SIMPLIFY_THRESHOLD: u32 = 333;

/// Time per frame in seconds, `numerator / denominator`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    /// Frames per second, `None` for a zero numerator
    pub fn fps(&self) -> Option<f64> {
        (self.numerator != 0).then(|| f64::from(self.denominator) / f64::from(self.numerator))
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Approximate `numerator / denominator` with a short continued fraction.
///
/// At most `n_terms` terms are expanded and the expansion stops at the first
/// term greater than or equal to `threshold`, which keeps values such as
/// `333333/10000000` reported as `1/30`.
pub fn simplify_fraction(
    numerator: u32,
    denominator: u32,
    n_terms: usize,
    threshold: u32,
) -> (u32, u32) {
    if denominator == 0 {
        return (numerator, denominator);
    }

    let mut terms = Vec::with_capacity(n_terms);
    let (mut x, mut y) = (numerator, denominator);

    while terms.len() < n_terms && y != 0 {
        let term = x / y;
        if term >= threshold {
            // A huge leading or second term still has to be represented.
            if terms.len() < 2 {
                terms.push(term);
            }
            break;
        }
        terms.push(term);

        let r = x - term * y;
        x = y;
        y = r;
    }

    // Fold the continued fraction back into num/den.
    let (mut num, mut den) = (1u64, 0u64);
    for &term in terms.iter().rev() {
        let next = u64::from(term) * num + den;
        den = num;
        num = next;
    }

    (saturate(num), saturate(den))
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Convert a time-per-frame fraction to a 100 ns frame interval.
///
/// Saturates to `u32::MAX` for a zero denominator or an overflowing result.
pub fn fraction_to_interval(numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 || numerator / denominator >= u32::MAX / INTERVAL_UNITS_PER_SECOND {
        return u32::MAX;
    }
    let interval =
        u64::from(numerator) * u64::from(INTERVAL_UNITS_PER_SECOND) / u64::from(denominator);
    saturate(interval)
}

/// Report a 100 ns frame interval as a compact time-per-frame fraction
pub fn interval_to_fraction(interval: u32) -> Fraction {
    let (numerator, denominator) = simplify_fraction(
        interval,
        INTERVAL_UNITS_PER_SECOND,
        SIMPLIFY_TERMS,
        SIMPLIFY_THRESHOLD,
    );
    Fraction { numerator, denominator }
}
