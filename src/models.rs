// models.rs - Core order, fill and view types

use crate::core_types::{Amount, Price, Qty, Symbol, UserId};
use serde::{Deserialize, Serialize};

/// Outcome of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The opposite outcome. One YES plus one NO always pays PAR.
    #[inline]
    pub fn complement(self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

/// Order action: Buy or Sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

/// Origin of a resting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Unfilled remainder of a SELL. Owner's shares are locked.
    New,
    /// Unfilled remainder of a BUY of the opposite outcome, rested at
    /// `PAR - price`. Owner's cash is locked.
    Complementary,
}

// ============================================================
// ORDER REQUEST
// ============================================================

/// An incoming trade intent, already authenticated by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user: UserId,
    pub symbol: Symbol,
    pub outcome: Outcome,
    pub action: Action,
    pub price: Price,
    pub qty: Qty,
}

impl OrderRequest {
    pub fn buy(user: UserId, symbol: &str, outcome: Outcome, price: Price, qty: Qty) -> Self {
        Self {
            user,
            symbol: symbol.to_string(),
            outcome,
            action: Action::Buy,
            price,
            qty,
        }
    }

    pub fn sell(user: UserId, symbol: &str, outcome: Outcome, price: Price, qty: Qty) -> Self {
        Self {
            user,
            symbol: symbol.to_string(),
            outcome,
            action: Action::Sell,
            price,
            qty,
        }
    }
}

// ============================================================
// FILLS
// ============================================================

/// How a fill moved value between the two parties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillKind {
    /// Existing shares changed hands for cash.
    Transfer,
    /// Both parties funded PAR per share into collateral and each received
    /// one side of a newly minted YES/NO pair.
    Mint,
}

/// The matched portion of an incoming order against one resting order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub counterparty: UserId,
    pub qty: Qty,
    /// Maker price, expressed in the incoming order's outcome
    pub price: Price,
    pub kind: FillKind,
}

/// Where the unfilled remainder of an order now rests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestingPlacement {
    pub outcome: Outcome,
    pub price: Price,
    pub qty: Qty,
    pub kind: OrderKind,
}

/// Result of a submitted order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReport {
    pub symbol: Symbol,
    pub outcome: Outcome,
    pub action: Action,
    pub requested_qty: Qty,
    pub fills: Vec<Fill>,
    pub remaining_qty: Qty,
    pub rested: Option<RestingPlacement>,
    /// Cash returned to the buyer because fills happened below the limit price
    pub released_cash: Amount,
}

impl FillReport {
    #[inline]
    pub fn filled_qty(&self) -> Qty {
        self.requested_qty - self.remaining_qty
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.remaining_qty == 0
    }
}

// ============================================================
// READ VIEWS
// ============================================================

/// Cash balance of one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashView {
    pub available: Amount,
    pub locked: Amount,
}

/// Share balance of one user for one `(symbol, outcome)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: Symbol,
    pub outcome: Outcome,
    pub available: Qty,
    pub locked: Qty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complement() {
        assert_eq!(Outcome::Yes.complement(), Outcome::No);
        assert_eq!(Outcome::No.complement(), Outcome::Yes);
        assert_eq!(Outcome::Yes.complement().complement(), Outcome::Yes);
    }

    #[test]
    fn test_fill_report_quantities() {
        let report = FillReport {
            symbol: "M".into(),
            outcome: Outcome::Yes,
            action: Action::Buy,
            requested_qty: 30,
            fills: vec![Fill {
                counterparty: 1,
                qty: 20,
                price: 400,
                kind: FillKind::Transfer,
            }],
            remaining_qty: 10,
            rested: None,
            released_cash: 0,
        };
        assert_eq!(report.filled_qty(), 20);
        assert!(!report.is_filled());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Outcome::No).unwrap();
        assert_eq!(json, "\"no\"");
        let kind: OrderKind = serde_json::from_str("\"complementary\"").unwrap();
        assert_eq!(kind, OrderKind::Complementary);
    }
}
