//! Engine snapshots
//!
//! A snapshot is a consistent copy of every book and the whole ledger, taken
//! with all book locks (ascending symbol order) and the ledger lock held.
//! Restoring rebuilds the engine and runs a full [`MatchingEngine::audit`],
//! so a tampered or inconsistent snapshot is rejected rather than loaded.

use crate::balance::Balance;
use crate::core_types::{Amount, Price, Qty, Symbol, UserId};
use crate::engine::MatchingEngine;
use crate::error::EngineError;
use crate::ledger::{Ledger, LedgerState};
use crate::market_registry::MarketRegistry;
use crate::models::{CashView, Outcome};
use crate::orderbook::{BookSnapshot, OrderBook};
use crate::user_account::{PositionKey, UserAccount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: Symbol,
    pub outcome: Outcome,
    pub available: Qty,
    pub locked: Qty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub user: UserId,
    pub cash: CashView,
    pub positions: Vec<PositionSnapshot>,
}

/// Shares issued by `credit_shares` for one position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditedSnapshot {
    pub symbol: Symbol,
    pub outcome: Outcome,
    pub qty: Qty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// One entry per registered user, ordered by user id
    pub accounts: Vec<AccountSnapshot>,
    pub collateral: BTreeMap<Symbol, Amount>,
    pub deposited: Amount,
    pub credited: Vec<CreditedSnapshot>,
    pub minted: BTreeMap<Symbol, Qty>,
}

impl LedgerSnapshot {
    pub(crate) fn capture(state: &LedgerState) -> Self {
        let mut accounts: Vec<AccountSnapshot> = state
            .users
            .iter()
            .map(|user| {
                let account = state.accounts.get(user);
                AccountSnapshot {
                    user: *user,
                    cash: account
                        .map(|a| CashView {
                            available: a.cash().available(),
                            locked: a.cash().locked(),
                        })
                        .unwrap_or_default(),
                    positions: account
                        .map(|a| {
                            a.positions()
                                .into_iter()
                                .map(|(key, bal)| PositionSnapshot {
                                    symbol: key.symbol.clone(),
                                    outcome: key.outcome,
                                    available: bal.available(),
                                    locked: bal.locked(),
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                }
            })
            .collect();
        accounts.sort_by_key(|a| a.user);

        let mut credited: Vec<CreditedSnapshot> = state
            .credited
            .iter()
            .map(|(key, qty)| CreditedSnapshot {
                symbol: key.symbol.clone(),
                outcome: key.outcome,
                qty: *qty,
            })
            .collect();
        credited.sort_by(|a, b| (&a.symbol, a.outcome).cmp(&(&b.symbol, b.outcome)));

        Self {
            accounts,
            collateral: state.collateral.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            deposited: state.deposited,
            credited,
            minted: state.minted.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    fn restore(&self) -> Result<LedgerState, EngineError> {
        let mut state = LedgerState::default();
        for acct in &self.accounts {
            if !state.users.insert(acct.user) {
                return Err(EngineError::invariant(format!(
                    "user {} appears twice in snapshot",
                    acct.user
                )));
            }
            let cash = Balance::from_parts(acct.cash.available, acct.cash.locked).map_err(|e| {
                EngineError::invariant(format!("user {} cash: {}", acct.user, e))
            })?;
            let positions = acct
                .positions
                .iter()
                .map(|p| {
                    Balance::from_parts(p.available, p.locked)
                        .map(|bal| (PositionKey::new(&p.symbol, p.outcome), bal))
                        .map_err(|e| {
                            EngineError::invariant(format!(
                                "user {} position {} {:?}: {}",
                                acct.user, p.symbol, p.outcome, e
                            ))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            state
                .accounts
                .insert(acct.user, UserAccount::from_parts(acct.user, cash, positions));
        }
        state.collateral = self.collateral.iter().map(|(k, v)| (k.clone(), *v)).collect();
        state.deposited = self.deposited;
        state.credited = self
            .credited
            .iter()
            .map(|c| (PositionKey::new(&c.symbol, c.outcome), c.qty))
            .collect();
        state.minted = self.minted.iter().map(|(k, v)| (k.clone(), *v)).collect();
        Ok(state)
    }

    /// Every market this ledger refers to
    fn symbols(&self) -> impl Iterator<Item = &str> + '_ {
        self.collateral
            .keys()
            .chain(self.minted.keys())
            .map(String::as_str)
            .chain(self.credited.iter().map(|c| c.symbol.as_str()))
            .chain(
                self.accounts
                    .iter()
                    .flat_map(|a| a.positions.iter().map(|p| p.symbol.as_str())),
            )
    }
}

/// Consistent point-in-time copy of the whole engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub par: Price,
    /// Ordered by symbol
    pub markets: Vec<BookSnapshot>,
    pub ledger: LedgerSnapshot,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl MatchingEngine {
    pub fn snapshot(&self) -> EngineSnapshot {
        self.with_locked_books(|books, state| EngineSnapshot {
            taken_at: Utc::now(),
            par: self.par(),
            markets: books
                .iter()
                .map(|(symbol, book)| book.snapshot(symbol))
                .collect(),
            ledger: LedgerSnapshot::capture(state),
        })
    }

    /// Rebuild an engine from a snapshot. The result must pass a full audit.
    pub fn from_snapshot(snapshot: &EngineSnapshot) -> Result<Self, EngineError> {
        let registry = MarketRegistry::new();
        for market in &snapshot.markets {
            registry.insert_book(&market.symbol, OrderBook::from_snapshot(market)?)?;
        }
        if let Some(symbol) = snapshot
            .ledger
            .symbols()
            .find(|symbol| !registry.contains(symbol))
        {
            return Err(EngineError::invariant(format!(
                "snapshot ledger refers to missing market {}",
                symbol
            )));
        }

        let ledger = Ledger::from_state(snapshot.ledger.restore()?);
        let engine = MatchingEngine::from_parts(snapshot.par, registry, ledger)?;
        engine.audit()?;
        tracing::info!(
            markets = snapshot.markets.len(),
            users = snapshot.ledger.accounts.len(),
            taken_at = %snapshot.taken_at,
            "Engine restored from snapshot"
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderRequest;

    fn busy_engine() -> MatchingEngine {
        let engine = MatchingEngine::with_par(1000).unwrap();
        engine.create_market("M").unwrap();
        engine.create_market("N").unwrap();
        for user in 1..=3 {
            engine.create_user(user).unwrap();
            engine.deposit(user, 50_000).unwrap();
        }
        engine.credit_shares(1, "M", Outcome::Yes, 40).unwrap();
        engine
            .submit_order(&OrderRequest::sell(1, "M", Outcome::Yes, 450, 40))
            .unwrap();
        engine
            .submit_order(&OrderRequest::buy(2, "M", Outcome::Yes, 500, 25))
            .unwrap();
        engine
            .submit_order(&OrderRequest::buy(3, "M", Outcome::No, 300, 10))
            .unwrap();
        engine
            .submit_order(&OrderRequest::buy(2, "N", Outcome::No, 650, 10))
            .unwrap();
        engine
            .submit_order(&OrderRequest::buy(3, "N", Outcome::Yes, 350, 4))
            .unwrap();
        engine
    }

    #[test]
    fn test_snapshot_restores_identical_state() {
        let engine = busy_engine();
        let snap = engine.snapshot();
        assert_eq!(snap.markets.len(), 2);
        assert_eq!(snap.ledger.minted.get("N"), Some(&4));

        let json = snap.to_json().unwrap();
        let parsed = EngineSnapshot::from_json(&json).unwrap();
        assert_eq!(parsed, snap);

        let restored = MatchingEngine::from_snapshot(&parsed).unwrap();
        assert_eq!(restored.order_books(), engine.order_books());
        assert_eq!(restored.all_cash(), engine.all_cash());
        assert_eq!(restored.positions(2).unwrap(), engine.positions(2).unwrap());
        assert_eq!(restored.ledger().audit(), engine.ledger().audit());
    }

    #[test]
    fn test_restored_engine_keeps_trading() {
        let restored = MatchingEngine::from_snapshot(&busy_engine().snapshot()).unwrap();
        // The rest of user 1's YES offer @ 450
        let report = restored
            .submit_order(&OrderRequest::buy(3, "M", Outcome::Yes, 450, 15))
            .unwrap();
        assert_eq!(report.filled_qty(), 15);
        assert_eq!(report.fills[0].counterparty, 1);
        restored.audit().unwrap();
    }

    #[test]
    fn test_tampered_cash_rejected() {
        let mut snap = busy_engine().snapshot();
        snap.ledger.accounts[0].cash.available += 1;
        let err = MatchingEngine::from_snapshot(&snap).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_tampered_lock_rejected() {
        let mut snap = busy_engine().snapshot();
        // Move cash from locked to available: totals still conserve
        let cash = &mut snap.ledger.accounts[2].cash;
        assert!(cash.locked > 0);
        cash.locked -= 1;
        cash.available += 1;
        assert!(MatchingEngine::from_snapshot(&snap).is_err());
    }

    #[test]
    fn test_missing_market_rejected() {
        let mut snap = busy_engine().snapshot();
        snap.markets.retain(|m| m.symbol != "N");
        assert!(matches!(
            MatchingEngine::from_snapshot(&snap),
            Err(EngineError::InvariantViolation(_))
        ));
    }
}
