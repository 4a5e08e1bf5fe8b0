use crate::balance::Balance;
use crate::core_types::{Symbol, UserId};
use crate::models::Outcome;
use rustc_hash::FxHashMap;

/// Key of a share position: one outcome of one market
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub symbol: Symbol,
    pub outcome: Outcome,
}

impl PositionKey {
    pub fn new(symbol: &str, outcome: Outcome) -> Self {
        Self {
            symbol: symbol.to_string(),
            outcome,
        }
    }
}

/// UserAccount represents a user's cash and share positions.
///
/// # Data Structure:
/// - `cash`: one enforced [`Balance`]
/// - `positions`: `(symbol, outcome) -> Balance`, created lazily on first
///   credit or lock. A missing entry reads as zero.
///
/// # Invariants (enforced by private fields):
/// 1. user_id is immutable after creation
/// 2. All mutations go through validated [`Balance`] operations
#[derive(Debug, Clone)]
pub struct UserAccount {
    user_id: UserId,                             // PRIVATE - use user_id()
    cash: Balance,                               // PRIVATE - use cash()/cash_mut()
    positions: FxHashMap<PositionKey, Balance>, // PRIVATE - use position()/position_mut()
}

impl UserAccount {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            cash: Balance::default(),
            positions: FxHashMap::default(),
        }
    }

    /// Rebuild an account from snapshot parts
    pub fn from_parts(
        user_id: UserId,
        cash: Balance,
        positions: impl IntoIterator<Item = (PositionKey, Balance)>,
    ) -> Self {
        Self {
            user_id,
            cash,
            positions: positions.into_iter().collect(),
        }
    }

    #[inline(always)]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[inline(always)]
    pub fn cash(&self) -> &Balance {
        &self.cash
    }

    #[inline(always)]
    pub fn cash_mut(&mut self) -> &mut Balance {
        &mut self.cash
    }

    /// Share balance for a position (zero if never touched)
    pub fn position(&self, symbol: &str, outcome: Outcome) -> Balance {
        self.positions
            .get(&PositionKey::new(symbol, outcome))
            .copied()
            .unwrap_or_default()
    }

    /// Mutable share balance, auto-created on first access
    pub fn position_mut(&mut self, symbol: &str, outcome: Outcome) -> &mut Balance {
        self.positions
            .entry(PositionKey::new(symbol, outcome))
            .or_default()
    }

    /// All non-empty positions, sorted by symbol then outcome
    pub fn positions(&self) -> Vec<(&PositionKey, &Balance)> {
        let mut out: Vec<_> = self
            .positions
            .iter()
            .filter(|(_, bal)| !bal.is_zero())
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_defaults_to_zero() {
        let account = UserAccount::new(1);
        let bal = account.position("M", Outcome::Yes);
        assert_eq!(bal.available(), 0);
        assert_eq!(bal.locked(), 0);
        assert!(account.positions().is_empty());
    }

    #[test]
    fn test_positions_sorted_and_non_empty() {
        let mut account = UserAccount::new(1);
        account.position_mut("B", Outcome::No).credit(5).unwrap();
        account.position_mut("A", Outcome::Yes).credit(3).unwrap();
        // Touched but empty
        account.position_mut("C", Outcome::Yes);

        let positions = account.positions();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].0, &PositionKey::new("A", Outcome::Yes));
        assert_eq!(positions[1].0, &PositionKey::new("B", Outcome::No));
        assert_eq!(positions[1].1.available(), 5);
    }

    #[test]
    fn test_cash_independent_of_positions() {
        let mut account = UserAccount::new(9);
        account.cash_mut().credit(100).unwrap();
        account.position_mut("M", Outcome::Yes).credit(10).unwrap();
        account.position_mut("M", Outcome::Yes).lock(4).unwrap();

        assert_eq!(account.cash().available(), 100);
        assert_eq!(account.position("M", Outcome::Yes).locked(), 4);
        assert_eq!(account.position("M", Outcome::No).total(), 0);
        assert_eq!(account.user_id(), 9);
    }
}
