//! Exact byte quantities for GPU memory accounting

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::error::{FlexError, FlexResult};

/// An exact whole-byte quantity.
///
/// GPU memory capacities and limits are whole-byte counts; addition,
/// subtraction and comparison never round. External records report
/// quantities as strings ("8589934592", "16Gi", "500M"); parsing one that is
/// not a non-negative integer count yields `MalformedQuantity` instead of
/// panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity(i64);

/// Binary (power-of-two) and decimal suffixes accepted by the external
/// string format.
const SUFFIXES: &[(&str, i64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
];

impl Quantity {
    /// A zero quantity.
    pub const ZERO: Quantity = Quantity(0);

    /// Create a quantity from a raw byte count.
    pub fn from_bytes(bytes: i64) -> Self {
        Quantity(bytes)
    }

    /// Parse the external string format.
    ///
    /// `resource` names the field being parsed and is carried into the error.
    pub fn parse(resource: &str, value: &str) -> FlexResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(FlexError::malformed(resource, value));
        }

        let (digits, scale) = match SUFFIXES.iter().find(|(s, _)| trimmed.ends_with(s)) {
            Some((suffix, scale)) => (&trimmed[..trimmed.len() - suffix.len()], *scale),
            None => (trimmed, 1),
        };

        let count: i64 = digits
            .parse()
            .map_err(|_| FlexError::malformed(resource, value))?;
        if count < 0 {
            return Err(FlexError::malformed(resource, value));
        }

        count
            .checked_mul(scale)
            .map(Quantity)
            .ok_or_else(|| FlexError::malformed(resource, value))
    }

    /// The raw byte count.
    pub fn as_bytes(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Truncating division by a count, used for per-GPU capacity.
    ///
    /// The remainder is the caller's concern.
    pub fn div_floor(&self, count: i64) -> Quantity {
        Quantity(self.0 / count)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        self.0 += rhs.0;
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 - rhs.0)
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        self.0 -= rhs.0;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Quantity {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
