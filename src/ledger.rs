//! Ledger - cash and share positions for every user
//!
//! Owns per-user cash (`available` / `locked`), per-`(symbol, outcome)` share
//! balances, the collateral escrowed by minted YES/NO pairs, and the issuance
//! tallies (deposits, credited shares, minted pairs) that make conservation
//! checkable. It knows nothing about order books.
//!
//! # Atomicity
//!
//! Every mutation runs inside [`Ledger::transaction`]: operations are applied
//! to staged copies of the touched rows and only written back when the whole
//! closure returns `Ok`. A failing operation discards the stage, so callers
//! never observe a half-applied transition.
//!
//! ```text
//! transaction(|txn| {
//!     txn.reserve_cash(buyer, 12_000)?;       // staged
//!     txn.settle_cash(buyer, seller, 12_000)?; // staged
//!     txn.settle_shares(seller, buyer, "M", Yes, 30)?;
//!     Ok(())
//! })                                           // commit or discard
//! ```

use crate::balance::{Balance, BalanceError};
use crate::core_types::{Amount, Qty, Symbol, UserId};
use crate::error::EngineError;
use crate::models::{CashView, Outcome, PositionView};
use crate::user_account::{PositionKey, UserAccount};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

// ============================================================
// STATE
// ============================================================

/// Authoritative ledger state. Only mutated through [`LedgerTxn`].
#[derive(Debug, Clone, Default)]
pub(crate) struct LedgerState {
    pub(crate) users: FxHashSet<UserId>,
    pub(crate) accounts: FxHashMap<UserId, UserAccount>,
    /// Cash escrowed per market by minted pairs
    pub(crate) collateral: FxHashMap<Symbol, Amount>,
    /// Sum of all on-ramp deposits
    pub(crate) deposited: Amount,
    /// Shares issued by the external credit collaborator
    pub(crate) credited: FxHashMap<PositionKey, Qty>,
    /// YES/NO pairs minted per market
    pub(crate) minted: FxHashMap<Symbol, Qty>,
}

impl LedgerState {
    fn commit(&mut self, staged: Staged) {
        self.accounts.extend(staged.accounts);
        self.collateral.extend(staged.collateral);
        self.credited.extend(staged.credited);
        self.minted.extend(staged.minted);
        if let Some(deposited) = staged.deposited {
            self.deposited = deposited;
        }
    }
}

/// Staged rows of an open transaction (absolute values, not deltas)
#[derive(Default)]
struct Staged {
    accounts: FxHashMap<UserId, UserAccount>,
    collateral: FxHashMap<Symbol, Amount>,
    credited: FxHashMap<PositionKey, Qty>,
    minted: FxHashMap<Symbol, Qty>,
    deposited: Option<Amount>,
}

// ============================================================
// LEDGER
// ============================================================

/// Thread-safe ledger. One mutex guards all rows; transactions are short
/// because matching is planned before the ledger is locked.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: LedgerState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Read the whole state under the ledger lock
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> R {
        let state = self.state.lock();
        f(&state)
    }

    /// Run `f` as one all-or-nothing transition.
    ///
    /// Nothing is written unless `f` returns `Ok`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut LedgerTxn<'_>) -> Result<T, EngineError>,
    {
        let mut state = self.state.lock();
        let (out, staged) = {
            let mut txn = LedgerTxn::new(&state);
            let out = f(&mut txn)?;
            (out, txn.staged)
        };
        state.commit(staged);
        Ok(out)
    }

    // ============================================================
    // USERS & ON-RAMP
    // ============================================================

    /// Register a user with an empty account
    pub fn register_user(&self, user: UserId) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if !state.users.insert(user) {
            return Err(EngineError::AlreadyExists(format!("user {}", user)));
        }
        state
            .accounts
            .entry(user)
            .or_insert_with(|| UserAccount::new(user));
        Ok(())
    }

    pub fn is_registered(&self, user: UserId) -> bool {
        self.state.lock().users.contains(&user)
    }

    /// Credit on-ramp cash to a registered user
    pub fn deposit(&self, user: UserId, amount: Amount) -> Result<CashView, EngineError> {
        self.transaction(|txn| {
            txn.deposit(user, amount)?;
            Ok(txn.cash(user))
        })
    }

    // ============================================================
    // SINGLE-OPERATION TRANSITIONS
    // ============================================================

    pub fn reserve_cash(&self, user: UserId, amount: Amount) -> Result<(), EngineError> {
        self.transaction(|txn| txn.reserve_cash(user, amount))
    }

    pub fn release_cash(&self, user: UserId, amount: Amount) -> Result<(), EngineError> {
        self.transaction(|txn| txn.release_cash(user, amount))
    }

    pub fn settle_cash(
        &self,
        payer: UserId,
        payee: UserId,
        amount: Amount,
    ) -> Result<(), EngineError> {
        self.transaction(|txn| txn.settle_cash(payer, payee, amount))
    }

    pub fn reserve_shares(
        &self,
        user: UserId,
        symbol: &str,
        outcome: Outcome,
        qty: Qty,
    ) -> Result<(), EngineError> {
        self.transaction(|txn| txn.reserve_shares(user, symbol, outcome, qty))
    }

    pub fn settle_shares(
        &self,
        seller: UserId,
        buyer: UserId,
        symbol: &str,
        outcome: Outcome,
        qty: Qty,
    ) -> Result<(), EngineError> {
        self.transaction(|txn| txn.settle_shares(seller, buyer, symbol, outcome, qty))
    }

    pub fn credit_shares(
        &self,
        user: UserId,
        symbol: &str,
        outcome: Outcome,
        qty: Qty,
    ) -> Result<(), EngineError> {
        self.transaction(|txn| {
            if !txn.is_registered(user) {
                return Err(EngineError::UnknownUser(user));
            }
            txn.credit_shares(user, symbol, outcome, qty)
        })
    }

    // ============================================================
    // QUERIES (Read-Only)
    // ============================================================

    pub fn cash(&self, user: UserId) -> Option<CashView> {
        let state = self.state.lock();
        state.accounts.get(&user).map(|a| cash_view(a.cash()))
    }

    pub fn positions(&self, user: UserId) -> Option<Vec<PositionView>> {
        let state = self.state.lock();
        state.accounts.get(&user).map(|account| {
            account
                .positions()
                .into_iter()
                .map(|(key, bal)| PositionView {
                    symbol: key.symbol.clone(),
                    outcome: key.outcome,
                    available: bal.available(),
                    locked: bal.locked(),
                })
                .collect()
        })
    }

    /// Cash of every registered user, ordered by user id
    pub fn all_cash(&self) -> BTreeMap<UserId, CashView> {
        let state = self.state.lock();
        state
            .accounts
            .iter()
            .map(|(user, account)| (*user, cash_view(account.cash())))
            .collect()
    }

    pub fn collateral(&self, symbol: &str) -> Amount {
        self.state
            .lock()
            .collateral
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }

    /// Aggregate totals for conservation checks
    pub fn audit(&self) -> LedgerAudit {
        self.with_state(LedgerAudit::from_state)
    }
}

fn cash_view(bal: &Balance) -> CashView {
    CashView {
        available: bal.available(),
        locked: bal.locked(),
    }
}

// ============================================================
// TRANSACTION
// ============================================================

/// An open ledger transaction. See [`Ledger::transaction`].
pub struct LedgerTxn<'a> {
    base: &'a LedgerState,
    staged: Staged,
}

impl<'a> LedgerTxn<'a> {
    fn new(base: &'a LedgerState) -> Self {
        Self {
            base,
            staged: Staged::default(),
        }
    }

    fn account_mut(&mut self, user: UserId) -> &mut UserAccount {
        let base = self.base;
        self.staged.accounts.entry(user).or_insert_with(|| {
            base.accounts
                .get(&user)
                .cloned()
                .unwrap_or_else(|| UserAccount::new(user))
        })
    }

    fn account(&self, user: UserId) -> Option<&UserAccount> {
        self.staged
            .accounts
            .get(&user)
            .or_else(|| self.base.accounts.get(&user))
    }

    pub fn is_registered(&self, user: UserId) -> bool {
        self.base.users.contains(&user)
    }

    /// Cash as seen inside this transaction
    pub fn cash(&self, user: UserId) -> CashView {
        self.account(user)
            .map(|a| cash_view(a.cash()))
            .unwrap_or_default()
    }

    /// Share balance as seen inside this transaction
    pub fn position(&self, user: UserId, symbol: &str, outcome: Outcome) -> Balance {
        self.account(user)
            .map(|a| a.position(symbol, outcome))
            .unwrap_or_default()
    }

    pub fn deposit(&mut self, user: UserId, amount: Amount) -> Result<(), EngineError> {
        if !self.is_registered(user) {
            return Err(EngineError::UnknownUser(user));
        }
        if amount == 0 {
            return Err(EngineError::InvalidAmount(
                "deposit must be greater than zero".into(),
            ));
        }
        let total = self
            .staged
            .deposited
            .unwrap_or(self.base.deposited)
            .checked_add(amount)
            .ok_or_else(|| EngineError::InvalidAmount("deposit overflow".into()))?;
        self.account_mut(user)
            .cash_mut()
            .credit(amount)
            .map_err(|_| EngineError::InvalidAmount("deposit overflow".into()))?;
        self.staged.deposited = Some(total);
        Ok(())
    }

    /// Move `amount` of available cash to locked
    pub fn reserve_cash(&mut self, user: UserId, amount: Amount) -> Result<(), EngineError> {
        self.account_mut(user)
            .cash_mut()
            .lock(amount)
            .map_err(|e| match e {
                BalanceError::InsufficientAvailable {
                    required,
                    available,
                } => EngineError::InsufficientFunds {
                    required,
                    available,
                },
                other => invariant("reserve_cash", user, other),
            })
    }

    /// Return locked cash to the same user's available cash
    pub fn release_cash(&mut self, user: UserId, amount: Amount) -> Result<(), EngineError> {
        self.account_mut(user)
            .cash_mut()
            .unlock(amount)
            .map_err(|e| invariant("release_cash", user, e))
    }

    /// Pay `amount` out of `payer`'s locked cash into `payee`'s available cash
    pub fn settle_cash(
        &mut self,
        payer: UserId,
        payee: UserId,
        amount: Amount,
    ) -> Result<(), EngineError> {
        self.account_mut(payer)
            .cash_mut()
            .spend_locked(amount)
            .map_err(|e| invariant("settle_cash debit", payer, e))?;
        self.account_mut(payee)
            .cash_mut()
            .credit(amount)
            .map_err(|e| invariant("settle_cash credit", payee, e))
    }

    /// Move `qty` available shares to locked
    pub fn reserve_shares(
        &mut self,
        user: UserId,
        symbol: &str,
        outcome: Outcome,
        qty: Qty,
    ) -> Result<(), EngineError> {
        self.account_mut(user)
            .position_mut(symbol, outcome)
            .lock(qty)
            .map_err(|e| match e {
                BalanceError::InsufficientAvailable {
                    required,
                    available,
                } => EngineError::InsufficientShares {
                    required,
                    available,
                },
                other => invariant("reserve_shares", user, other),
            })
    }

    /// Deliver `qty` of `seller`'s locked shares to `buyer`'s available shares
    pub fn settle_shares(
        &mut self,
        seller: UserId,
        buyer: UserId,
        symbol: &str,
        outcome: Outcome,
        qty: Qty,
    ) -> Result<(), EngineError> {
        self.account_mut(seller)
            .position_mut(symbol, outcome)
            .spend_locked(qty)
            .map_err(|e| invariant("settle_shares debit", seller, e))?;
        self.account_mut(buyer)
            .position_mut(symbol, outcome)
            .credit(qty)
            .map_err(|e| invariant("settle_shares credit", buyer, e))
    }

    /// Issue new shares to a user (external share seeding)
    pub fn credit_shares(
        &mut self,
        user: UserId,
        symbol: &str,
        outcome: Outcome,
        qty: Qty,
    ) -> Result<(), EngineError> {
        if qty == 0 {
            return Err(EngineError::InvalidAmount(
                "share credit must be greater than zero".into(),
            ));
        }
        let key = PositionKey::new(symbol, outcome);
        let issued = self
            .staged
            .credited
            .get(&key)
            .or_else(|| self.base.credited.get(&key))
            .copied()
            .unwrap_or(0)
            .checked_add(qty)
            .ok_or_else(|| EngineError::InvalidAmount("share credit overflow".into()))?;
        self.account_mut(user)
            .position_mut(symbol, outcome)
            .credit(qty)
            .map_err(|_| EngineError::InvalidAmount("share credit overflow".into()))?;
        self.staged.credited.insert(key, issued);
        Ok(())
    }

    /// Mint `qty` YES/NO pairs.
    ///
    /// `buyer` pays `buyer_cost` and `writer` pays `writer_cost`, both from
    /// locked cash, into the market's collateral. `buyer` receives `qty`
    /// shares of `buyer_outcome`, `writer` receives `qty` of its complement.
    #[allow(clippy::too_many_arguments)]
    pub fn mint_pair(
        &mut self,
        symbol: &str,
        buyer: UserId,
        buyer_outcome: Outcome,
        buyer_cost: Amount,
        writer: UserId,
        writer_cost: Amount,
        qty: Qty,
    ) -> Result<(), EngineError> {
        self.account_mut(buyer)
            .cash_mut()
            .spend_locked(buyer_cost)
            .map_err(|e| invariant("mint_pair buyer debit", buyer, e))?;
        self.account_mut(writer)
            .cash_mut()
            .spend_locked(writer_cost)
            .map_err(|e| invariant("mint_pair writer debit", writer, e))?;
        self.account_mut(buyer)
            .position_mut(symbol, buyer_outcome)
            .credit(qty)
            .map_err(|e| invariant("mint_pair buyer credit", buyer, e))?;
        self.account_mut(writer)
            .position_mut(symbol, buyer_outcome.complement())
            .credit(qty)
            .map_err(|e| invariant("mint_pair writer credit", writer, e))?;

        let base = self.base;
        let collateral = self
            .staged
            .collateral
            .entry(symbol.to_string())
            .or_insert_with(|| base.collateral.get(symbol).copied().unwrap_or(0));
        let escrowed = *collateral;
        *collateral = buyer_cost
            .checked_add(writer_cost)
            .and_then(|paid| escrowed.checked_add(paid))
            .ok_or_else(|| EngineError::invariant(format!("collateral overflow on {}", symbol)))?;

        let minted = self
            .staged
            .minted
            .entry(symbol.to_string())
            .or_insert_with(|| base.minted.get(symbol).copied().unwrap_or(0));
        let pairs = *minted;
        *minted = pairs
            .checked_add(qty)
            .ok_or_else(|| EngineError::invariant(format!("mint overflow on {}", symbol)))?;
        Ok(())
    }
}

fn invariant(op: &str, user: UserId, err: BalanceError) -> EngineError {
    tracing::error!(op, user, error = %err, "Ledger invariant violated");
    EngineError::invariant(format!("{} for user {}: {}", op, user, err))
}

// ============================================================
// AUDIT
// ============================================================

/// Ledger-wide totals. Sums are u128 so they cannot overflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerAudit {
    /// Σ (available + locked) cash over all accounts
    pub cash_total: u128,
    pub collateral_total: u128,
    pub deposited: u128,
    /// Σ (available + locked) shares per position
    pub shares: BTreeMap<PositionKey, u128>,
    pub credited: BTreeMap<PositionKey, u128>,
    pub minted: BTreeMap<Symbol, u128>,
}

impl LedgerAudit {
    pub(crate) fn from_state(state: &LedgerState) -> Self {
        let mut audit = LedgerAudit {
            deposited: state.deposited as u128,
            collateral_total: state.collateral.values().map(|c| *c as u128).sum(),
            credited: state
                .credited
                .iter()
                .map(|(k, v)| (k.clone(), *v as u128))
                .collect(),
            minted: state
                .minted
                .iter()
                .map(|(k, v)| (k.clone(), *v as u128))
                .collect(),
            ..Default::default()
        };
        for account in state.accounts.values() {
            audit.cash_total += account.cash().total() as u128;
            for (key, bal) in account.positions() {
                *audit.shares.entry(key.clone()).or_default() += bal.total() as u128;
            }
        }
        audit
    }

    /// Cash is conserved: everything deposited is held by a user or in escrow
    pub fn cash_conserved(&self) -> bool {
        self.cash_total + self.collateral_total == self.deposited
    }

    /// Shares are conserved: every share outstanding was credited or minted
    pub fn shares_conserved(&self) -> bool {
        let mut keys: Vec<PositionKey> = self
            .shares
            .keys()
            .chain(self.credited.keys())
            .cloned()
            .collect();
        for symbol in self.minted.keys() {
            keys.push(PositionKey::new(symbol, Outcome::Yes));
            keys.push(PositionKey::new(symbol, Outcome::No));
        }
        keys.iter().all(|key| {
            let held = self.shares.get(key).copied().unwrap_or(0);
            let credited = self.credited.get(key).copied().unwrap_or(0);
            let minted = self.minted.get(&key.symbol).copied().unwrap_or(0);
            held == credited + minted
        })
    }

    pub fn is_balanced(&self) -> bool {
        self.cash_conserved() && self.shares_conserved()
    }
}
