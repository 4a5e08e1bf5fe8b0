//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They give the integer quantities flowing through the engine a name.

/// User ID - globally unique, immutable after registration.
///
/// # Usage:
/// - Primary key for ledger accounts
/// - Owner key of resting orders inside a price level
pub type UserId = u64;

/// Market symbol, e.g. `"BTC-100K-DEC"`.
pub type Symbol = String;

/// Contract price in cash units per share, always in `1..PAR`.
pub type Price = u64;

/// Share quantity (whole shares only).
pub type Qty = u64;

/// Cash amount in the smallest cash unit.
pub type Amount = u64;

/// Default PAR: one YES share plus one NO share always pays out this much.
pub const DEFAULT_PAR: Price = 1000;
