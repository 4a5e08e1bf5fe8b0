/// ENFORCED BALANCE TYPE - Used by the Ledger
///
/// The single source of truth for both cash and share balances.
/// ALL balance mutations MUST go through these methods.
///
/// # Enforcement Strategy:
/// 1. Fields are PRIVATE - no direct access
/// 2. All mutations return Result - errors are explicit
/// 3. checked_add/sub - overflow protection
/// 4. A failed mutation leaves the balance untouched
use serde::{Deserialize, Serialize};

/// Why a balance mutation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    /// `available` is smaller than the requested amount
    InsufficientAvailable { required: u64, available: u64 },
    /// `locked` is smaller than the requested amount
    InsufficientLocked { required: u64, locked: u64 },
    /// A credit would overflow u64
    Overflow,
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::InsufficientAvailable {
                required,
                available,
            } => write!(f, "available {} < required {}", available, required),
            BalanceError::InsufficientLocked { required, locked } => {
                write!(f, "locked {} < required {}", locked, required)
            }
            BalanceError::Overflow => write!(f, "balance overflow"),
        }
    }
}

impl std::error::Error for BalanceError {}

/// Balance for a single cash account or share position
///
/// # Invariants (ENFORCED by private fields):
/// - available and locked are never negative (u64 + checked arithmetic)
/// - available + locked never overflows
/// - All state changes return Result
///
/// # Usage:
/// ```ignore
/// let mut balance = Balance::default();
/// balance.credit(1000)?;          // available = 1000
/// balance.lock(500)?;              // available = 500, locked = 500
/// balance.spend_locked(100)?;      // locked = 400
/// balance.unlock(200)?;            // available = 700, locked = 200
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    available: u64, // PRIVATE - ONLY modified through credit/lock/unlock
    locked: u64,    // PRIVATE - ONLY modified through lock/unlock/spend_locked
}

impl Balance {
    /// Rebuild a balance from snapshot values
    pub fn from_parts(available: u64, locked: u64) -> Result<Self, BalanceError> {
        available.checked_add(locked).ok_or(BalanceError::Overflow)?;
        Ok(Self { available, locked })
    }

    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    #[inline(always)]
    pub const fn available(&self) -> u64 {
        self.available
    }

    #[inline(always)]
    pub const fn locked(&self) -> u64 {
        self.locked
    }

    /// available + locked (cannot overflow, enforced on every credit)
    #[inline(always)]
    pub const fn total(&self) -> u64 {
        self.available + self.locked
    }

    #[inline(always)]
    pub const fn is_zero(&self) -> bool {
        self.available == 0 && self.locked == 0
    }

    // ============================================================
    // VALIDATED MUTATIONS
    // ============================================================

    /// Add to available balance (deposit, settlement proceeds, share credit)
    pub fn credit(&mut self, amount: u64) -> Result<(), BalanceError> {
        let available = self
            .available
            .checked_add(amount)
            .ok_or(BalanceError::Overflow)?;
        available
            .checked_add(self.locked)
            .ok_or(BalanceError::Overflow)?;
        self.available = available;
        Ok(())
    }

    /// Move funds from available to locked
    pub fn lock(&mut self, amount: u64) -> Result<(), BalanceError> {
        if self.available < amount {
            return Err(BalanceError::InsufficientAvailable {
                required: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        self.locked += amount;
        Ok(())
    }

    /// Move funds from locked back to available
    pub fn unlock(&mut self, amount: u64) -> Result<(), BalanceError> {
        if self.locked < amount {
            return Err(BalanceError::InsufficientLocked {
                required: amount,
                locked: self.locked,
            });
        }
        self.locked -= amount;
        self.available += amount;
        Ok(())
    }

    /// Remove locked funds without returning them to available.
    /// Used when locked value leaves the account during settlement.
    pub fn spend_locked(&mut self, amount: u64) -> Result<(), BalanceError> {
        if self.locked < amount {
            return Err(BalanceError::InsufficientLocked {
                required: amount,
                locked: self.locked,
            });
        }
        self.locked -= amount;
        Ok(())
    }
}

// ============================================================
// TESTS - Prove enforcement works
// ============================================================
