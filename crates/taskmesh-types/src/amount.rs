//! Token amounts with checked arithmetic
//!
//! TaskMesh treats the fungible asset as external: amounts are unsigned
//! counts of the asset's smallest unit. All arithmetic is checked -
//! overflow or underflow surfaces as a typed error and never wraps.

use crate::{Result, TaskMeshError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Basis-point denominator (100 bps = 1%)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// An unsigned token amount in smallest units
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    /// Create an amount from smallest units
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// The zero amount
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Raw value in smallest units
    pub const fn raw(&self) -> u128 {
        self.0
    }

    /// Check if the amount is zero
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(TaskMeshError::AmountOverflow)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(TaskMeshError::AmountUnderflow)
    }

    /// Saturating subtraction (read-side helpers only)
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Take a basis-point fraction of this amount (100 bps = 1%)
    ///
    /// Truncates toward zero, so small stakes may yield a zero cut.
    pub fn basis_points(self, bps: u32) -> Result<Self> {
        self.0
            .checked_mul(bps as u128)
            .map(|v| Self(v / BPS_DENOMINATOR))
            .ok_or(TaskMeshError::AmountOverflow)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for TokenAmount {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_arithmetic() {
        let a = TokenAmount::new(100);
        let b = TokenAmount::new(40);

        assert_eq!(a.checked_add(b).unwrap(), TokenAmount::new(140));
        assert_eq!(a.checked_sub(b).unwrap(), TokenAmount::new(60));
    }

    #[test]
    fn underflow_is_an_error() {
        let a = TokenAmount::new(10);
        let b = TokenAmount::new(40);
        assert!(matches!(
            a.checked_sub(b),
            Err(TaskMeshError::AmountUnderflow)
        ));
    }

    #[test]
    fn overflow_is_an_error() {
        let a = TokenAmount::new(u128::MAX);
        assert!(matches!(
            a.checked_add(TokenAmount::new(1)),
            Err(TaskMeshError::AmountOverflow)
        ));
    }

    #[test]
    fn basis_points_take_a_fraction() {
        let stake = TokenAmount::new(1_000);
        assert_eq!(stake.basis_points(1_000).unwrap(), TokenAmount::new(100)); // 10%
        assert_eq!(stake.basis_points(5_000).unwrap(), TokenAmount::new(500)); // 50%
    }

    #[test]
    fn basis_points_truncate() {
        let stake = TokenAmount::new(9);
        assert_eq!(stake.basis_points(1_000).unwrap(), TokenAmount::zero());
    }
}
