//! Matching Engine - order validation, matching and settlement
//!
//! The engine handles:
//! 1. Validating an incoming order (price, quantity, symbol, user)
//! 2. Planning fills against the symbol's book, best price first, FIFO
//!    within a level
//! 3. Applying the ledger transitions and book mutations of the plan as one
//!    all-or-nothing unit
//!
//! # Complementary pricing
//!
//! A YES share at `p` and a NO share at `PAR - p` are two views of the same
//! risk. Books therefore only hold offers: an unfilled BUY of YES at `p` rests
//! as a complementary offer of NO at `PAR - p`, and the YES bids a SELL can
//! hit are exactly the complementary offers on the NO book.
//!
//! | Incoming | Hits | Fill |
//! |----------|------|------|
//! | BUY O @ p | `New` offer on O ≤ p | Transfer: buyer cash → seller, seller shares → buyer |
//! | BUY O @ p | `Complementary` offer on O ≤ p | Mint: both pay into collateral, each gets one side |
//! | SELL O @ s | `Complementary` offer on ¬O ≤ PAR - s | Transfer: bidder cash → seller, seller shares → bidder |
//!
//! # Locking
//!
//! ```text
//! submit_order: lock(book[symbol]) ─▶ plan ─▶ lock(ledger) ─▶ stage ledger + book ─▶ commit
//! ```
//! Book locks are always taken before the ledger lock, and several books are
//! locked in ascending symbol order.

use crate::config::EngineConfig;
use crate::core_types::{Amount, Price, Qty, UserId};
use crate::error::EngineError;
use crate::ledger::{Ledger, LedgerAudit, LedgerState, LedgerTxn};
use crate::market_registry::{MarketRegistry, SharedBook};
use crate::models::{
    Action, CashView, Fill, FillKind, FillReport, OrderKind, OrderRequest, Outcome, PositionView,
    RestingPlacement,
};
use crate::orderbook::{BookOp, BookSnapshot, OrderBook};
use parking_lot::MutexGuard;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Fill info before settlement
struct PlannedFill {
    counterparty: UserId,
    qty: Qty,
    /// Price in the incoming order's outcome
    price: Price,
    kind: FillKind,
}

/// Everything an order will do, computed against the locked book
struct MatchPlan {
    fills: Vec<PlannedFill>,
    book_ops: Vec<BookOp>,
    remaining: Qty,
    rested: Option<RestingPlacement>,
}

/// Matching engine over every market plus the shared ledger
#[derive(Debug)]
pub struct MatchingEngine {
    par: Price,
    registry: MarketRegistry,
    ledger: Ledger,
}

impl MatchingEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::with_par(config.par)
    }

    pub fn with_par(par: Price) -> Result<Self, EngineError> {
        Self::from_parts(par, MarketRegistry::new(), Ledger::new())
    }

    pub(crate) fn from_parts(
        par: Price,
        registry: MarketRegistry,
        ledger: Ledger,
    ) -> Result<Self, EngineError> {
        if par < 2 {
            return Err(EngineError::InvalidAmount(format!(
                "par must be at least 2, got {}",
                par
            )));
        }
        Ok(Self {
            par,
            registry,
            ledger,
        })
    }

    #[inline]
    pub fn par(&self) -> Price {
        self.par
    }

    pub fn registry(&self) -> &MarketRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // ============================================================
    // MARKETS & USERS
    // ============================================================

    pub fn create_market(&self, symbol: &str) -> Result<(), EngineError> {
        self.registry.create(symbol)?;
        tracing::info!(symbol, "Market created");
        Ok(())
    }

    pub fn create_user(&self, user: UserId) -> Result<(), EngineError> {
        self.ledger.register_user(user)?;
        tracing::info!(user, "User registered");
        Ok(())
    }

    /// On-ramp cash for a registered user
    pub fn deposit(&self, user: UserId, amount: Amount) -> Result<CashView, EngineError> {
        let view = self.ledger.deposit(user, amount)?;
        tracing::info!(user, amount, available = view.available, "Deposit credited");
        Ok(view)
    }

    /// Issue shares of an existing market to a registered user
    pub fn credit_shares(
        &self,
        user: UserId,
        symbol: &str,
        outcome: Outcome,
        qty: Qty,
    ) -> Result<(), EngineError> {
        if !self.registry.contains(symbol) {
            return Err(EngineError::UnknownSymbol(symbol.to_string()));
        }
        self.ledger.credit_shares(user, symbol, outcome, qty)?;
        tracing::info!(user, symbol, ?outcome, qty, "Shares credited");
        Ok(())
    }

    // ============================================================
    // ORDER PROCESSING
    // ============================================================

    /// Match an order against resting liquidity and rest any remainder.
    ///
    /// # Flow:
    /// 1. Validate price in `(0, PAR)`, `qty > 0`, user and symbol known
    /// 2. Lock the symbol's book and plan fills (read-only)
    /// 3. In one ledger transaction: reserve cash (BUY) or shares (SELL),
    ///    settle every fill, refund price improvement, stage book mutations
    /// 4. Commit the staged book levels
    ///
    /// Any error leaves ledger and book exactly as they were.
    pub fn submit_order(&self, req: &OrderRequest) -> Result<FillReport, EngineError> {
        let result = self.process_order(req);
        match &result {
            Ok(report) => {
                tracing::debug!(
                    target: "orderflow",
                    user = req.user,
                    symbol = %req.symbol,
                    outcome = ?req.outcome,
                    action = ?req.action,
                    price = req.price,
                    qty = req.qty,
                    filled = report.filled_qty(),
                    rested = report.remaining_qty,
                    "Order processed"
                );
            }
            Err(err) if err.is_internal() => {
                tracing::error!(user = req.user, symbol = %req.symbol, error = %err, "Order aborted");
            }
            Err(err) => {
                tracing::warn!(user = req.user, symbol = %req.symbol, error = %err, "Order rejected");
            }
        }
        result
    }

    fn process_order(&self, req: &OrderRequest) -> Result<FillReport, EngineError> {
        let notional = self.validate(req)?;
        if !self.ledger.is_registered(req.user) {
            return Err(EngineError::UnknownUser(req.user));
        }
        let shared = self.registry.get(&req.symbol)?;
        let mut book = shared.lock();

        let plan = match req.action {
            Action::Buy => self.plan_buy(&book, req),
            Action::Sell => self.plan_sell(&book, req),
        };

        let (staged, released_cash) = self.ledger.transaction(|txn| {
            let released = match req.action {
                Action::Buy => self.settle_buy(txn, req, notional, &plan)?,
                Action::Sell => self.settle_sell(txn, req, &plan)?,
            };
            let staged = book.stage(&plan.book_ops)?;
            Ok((staged, released))
        })?;
        book.commit(staged);

        for fill in &plan.fills {
            tracing::debug!(
                target: "orderflow",
                symbol = %req.symbol,
                taker = req.user,
                maker = fill.counterparty,
                price = fill.price,
                qty = fill.qty,
                kind = ?fill.kind,
                "Fill"
            );
        }

        Ok(FillReport {
            symbol: req.symbol.clone(),
            outcome: req.outcome,
            action: req.action,
            requested_qty: req.qty,
            fills: plan
                .fills
                .into_iter()
                .map(|f| Fill {
                    counterparty: f.counterparty,
                    qty: f.qty,
                    price: f.price,
                    kind: f.kind,
                })
                .collect(),
            remaining_qty: plan.remaining,
            rested: plan.rested,
            released_cash,
        })
    }

    /// Field checks. Returns the BUY notional `price * qty`.
    fn validate(&self, req: &OrderRequest) -> Result<Amount, EngineError> {
        if req.price == 0 || req.price >= self.par {
            return Err(EngineError::InvalidOrder(format!(
                "price {} outside (0, {})",
                req.price, self.par
            )));
        }
        if req.qty == 0 {
            return Err(EngineError::InvalidOrder(
                "quantity must be greater than zero".into(),
            ));
        }
        req.price.checked_mul(req.qty).ok_or_else(|| {
            EngineError::InvalidOrder(format!(
                "notional overflow: price={} * qty={}",
                req.price, req.qty
            ))
        })
    }

    /// BUY: walk the outcome's offers up to the limit price. The remainder
    /// rests as a complementary offer on the opposite outcome.
    fn plan_buy(&self, book: &OrderBook, req: &OrderRequest) -> MatchPlan {
        let mut fills = Vec::new();
        let mut book_ops = Vec::new();
        let mut remaining = req.qty;

        for level in book.levels(req.outcome) {
            // Buy order can match offers at or below its price
            if remaining == 0 || level.price() > req.price {
                break;
            }
            for order in level.orders() {
                if remaining == 0 {
                    break;
                }
                let qty = remaining.min(order.qty);
                fills.push(PlannedFill {
                    counterparty: order.owner,
                    qty,
                    price: level.price(),
                    kind: match order.kind {
                        OrderKind::New => FillKind::Transfer,
                        OrderKind::Complementary => FillKind::Mint,
                    },
                });
                book_ops.push(BookOp::Reduce {
                    outcome: req.outcome,
                    price: level.price(),
                    owner: order.owner,
                    kind: order.kind,
                    qty,
                });
                remaining -= qty;
            }
        }

        let rested = (remaining > 0).then(|| {
            let placement = RestingPlacement {
                outcome: req.outcome.complement(),
                price: self.par - req.price,
                qty: remaining,
                kind: OrderKind::Complementary,
            };
            book_ops.push(BookOp::Grow {
                outcome: placement.outcome,
                price: placement.price,
                owner: req.user,
                kind: placement.kind,
                qty: remaining,
            });
            placement
        });

        MatchPlan {
            fills,
            book_ops,
            remaining,
            rested,
        }
    }

    /// SELL: walk complementary offers on the opposite outcome, which are
    /// bids for this outcome at `PAR - y`. The remainder rests as a new offer.
    fn plan_sell(&self, book: &OrderBook, req: &OrderRequest) -> MatchPlan {
        let mirror = req.outcome.complement();
        // Bid PAR - y must reach the ask: y <= PAR - price
        let ceiling = self.par - req.price;
        let mut fills = Vec::new();
        let mut book_ops = Vec::new();
        let mut remaining = req.qty;

        for level in book.levels(mirror) {
            if remaining == 0 || level.price() > ceiling {
                break;
            }
            for order in level
                .orders()
                .filter(|o| o.kind == OrderKind::Complementary)
            {
                if remaining == 0 {
                    break;
                }
                let qty = remaining.min(order.qty);
                fills.push(PlannedFill {
                    counterparty: order.owner,
                    qty,
                    price: self.par - level.price(),
                    kind: FillKind::Transfer,
                });
                book_ops.push(BookOp::Reduce {
                    outcome: mirror,
                    price: level.price(),
                    owner: order.owner,
                    kind: order.kind,
                    qty,
                });
                remaining -= qty;
            }
        }

        let rested = (remaining > 0).then(|| {
            let placement = RestingPlacement {
                outcome: req.outcome,
                price: req.price,
                qty: remaining,
                kind: OrderKind::New,
            };
            book_ops.push(BookOp::Grow {
                outcome: placement.outcome,
                price: placement.price,
                owner: req.user,
                kind: placement.kind,
                qty: remaining,
            });
            placement
        });

        MatchPlan {
            fills,
            book_ops,
            remaining,
            rested,
        }
    }

    /// Ledger side of a BUY. Returns the price-improvement refund.
    fn settle_buy(
        &self,
        txn: &mut LedgerTxn<'_>,
        req: &OrderRequest,
        notional: Amount,
        plan: &MatchPlan,
    ) -> Result<Amount, EngineError> {
        txn.reserve_cash(req.user, notional)?;

        let mut refund: Amount = 0;
        for fill in &plan.fills {
            // fill.price <= req.price, so neither product exceeds the notional
            let cost = fill.price * fill.qty;
            match fill.kind {
                FillKind::Transfer => {
                    txn.settle_cash(req.user, fill.counterparty, cost)?;
                    txn.settle_shares(
                        fill.counterparty,
                        req.user,
                        &req.symbol,
                        req.outcome,
                        fill.qty,
                    )?;
                }
                FillKind::Mint => {
                    let writer_cost = (self.par - fill.price) * fill.qty;
                    txn.mint_pair(
                        &req.symbol,
                        req.user,
                        req.outcome,
                        cost,
                        fill.counterparty,
                        writer_cost,
                        fill.qty,
                    )?;
                }
            }
            refund += (req.price - fill.price) * fill.qty;
        }

        if refund > 0 {
            txn.release_cash(req.user, refund)?;
        }
        Ok(refund)
    }

    /// Ledger side of a SELL
    fn settle_sell(
        &self,
        txn: &mut LedgerTxn<'_>,
        req: &OrderRequest,
        plan: &MatchPlan,
    ) -> Result<Amount, EngineError> {
        txn.reserve_shares(req.user, &req.symbol, req.outcome, req.qty)?;

        for fill in &plan.fills {
            let proceeds = fill.price.checked_mul(fill.qty).ok_or_else(|| {
                EngineError::invariant(format!(
                    "proceeds overflow: price={} * qty={}",
                    fill.price, fill.qty
                ))
            })?;
            txn.settle_cash(fill.counterparty, req.user, proceeds)?;
            txn.settle_shares(
                req.user,
                fill.counterparty,
                &req.symbol,
                req.outcome,
                fill.qty,
            )?;
        }
        Ok(0)
    }

    // ============================================================
    // QUERIES (Read-Only)
    // ============================================================

    pub fn order_book(&self, symbol: &str) -> Result<BookSnapshot, EngineError> {
        let shared = self.registry.get(symbol)?;
        let book = shared.lock();
        Ok(book.snapshot(symbol))
    }

    /// Snapshots of every market, ordered by symbol
    pub fn order_books(&self) -> Vec<BookSnapshot> {
        self.with_locked_books(|books, _| {
            books
                .iter()
                .map(|(symbol, book)| book.snapshot(symbol))
                .collect()
        })
    }

    pub fn positions(&self, user: UserId) -> Result<Vec<PositionView>, EngineError> {
        self.ledger
            .positions(user)
            .ok_or(EngineError::UnknownUser(user))
    }

    pub fn cash(&self, user: UserId) -> Result<CashView, EngineError> {
        self.ledger.cash(user).ok_or(EngineError::UnknownUser(user))
    }

    pub fn all_cash(&self) -> BTreeMap<UserId, CashView> {
        self.ledger.all_cash()
    }

    /// Lock every book (ascending symbol order), then the ledger, and hand a
    /// consistent view of all of them to `f`.
    pub(crate) fn with_locked_books<R>(
        &self,
        f: impl FnOnce(&[(&str, &OrderBook)], &LedgerState) -> R,
    ) -> R {
        let shared: Vec<(String, SharedBook)> = self
            .registry
            .symbols()
            .into_iter()
            .filter_map(|symbol| self.registry.get(&symbol).ok().map(|b| (symbol, b)))
            .collect();
        let guards: Vec<(&str, MutexGuard<'_, OrderBook>)> = shared
            .iter()
            .map(|(symbol, book)| (symbol.as_str(), book.lock()))
            .collect();
        let books: Vec<(&str, &OrderBook)> =
            guards.iter().map(|(symbol, guard)| (*symbol, &**guard)).collect();
        self.ledger.with_state(|state| f(&books, state))
    }

    // ============================================================
    // AUDIT
    // ============================================================

    /// Full consistency check of books against the ledger.
    ///
    /// Verifies cash and share conservation, collateral = PAR × minted pairs,
    /// book structure, uncrossed books, and that every locked balance is
    /// backed by exactly the resting orders that locked it.
    pub fn audit(&self) -> Result<(), EngineError> {
        let result = self.with_locked_books(|books, state| self.audit_locked(books, state));
        if let Err(err) = &result {
            tracing::error!(error = %err, "Audit failed");
        }
        result
    }

    pub(crate) fn audit_locked(
        &self,
        books: &[(&str, &OrderBook)],
        state: &LedgerState,
    ) -> Result<(), EngineError> {
        let audit = LedgerAudit::from_state(state);
        if !audit.cash_conserved() {
            return Err(EngineError::invariant(format!(
                "cash not conserved: held {} + collateral {} != deposited {}",
                audit.cash_total, audit.collateral_total, audit.deposited
            )));
        }
        if !audit.shares_conserved() {
            return Err(EngineError::invariant("shares not conserved"));
        }

        let symbols = state.collateral.keys().chain(state.minted.keys());
        for symbol in symbols {
            let collateral = state.collateral.get(symbol).copied().unwrap_or(0) as u128;
            let minted = state.minted.get(symbol).copied().unwrap_or(0) as u128;
            if collateral != minted * self.par as u128 {
                return Err(EngineError::invariant(format!(
                    "{}: collateral {} != par {} x minted {}",
                    symbol, collateral, self.par, minted
                )));
            }
        }

        // Locks implied by resting orders
        let mut cash_locks: FxHashMap<UserId, u128> = FxHashMap::default();
        let mut share_locks: FxHashMap<(UserId, &str, Outcome), u128> = FxHashMap::default();
        for (symbol, book) in books {
            book.check_consistency()?;
            if book.is_crossed(self.par) {
                return Err(EngineError::invariant(format!("{}: book is crossed", symbol)));
            }
            for outcome in [Outcome::Yes, Outcome::No] {
                for level in book.levels(outcome) {
                    if level.price() >= self.par {
                        return Err(EngineError::invariant(format!(
                            "{}: level price {} not below par",
                            symbol,
                            level.price()
                        )));
                    }
                    for order in level.orders() {
                        match order.kind {
                            OrderKind::New => {
                                *share_locks
                                    .entry((order.owner, *symbol, outcome))
                                    .or_default() += order.qty as u128;
                            }
                            OrderKind::Complementary => {
                                *cash_locks.entry(order.owner).or_default() +=
                                    (self.par - level.price()) as u128 * order.qty as u128;
                            }
                        }
                    }
                }
            }
        }

        for (user, account) in &state.accounts {
            let expected = cash_locks.remove(user).unwrap_or(0);
            if account.cash().locked() as u128 != expected {
                return Err(EngineError::invariant(format!(
                    "user {}: locked cash {} != resting bids {}",
                    user,
                    account.cash().locked(),
                    expected
                )));
            }
            for (key, bal) in account.positions() {
                let expected = share_locks
                    .remove(&(*user, key.symbol.as_str(), key.outcome))
                    .unwrap_or(0);
                if bal.locked() as u128 != expected {
                    return Err(EngineError::invariant(format!(
                        "user {}: locked {} {:?} shares {} != resting offers {}",
                        user,
                        key.symbol,
                        key.outcome,
                        bal.locked(),
                        expected
                    )));
                }
            }
        }
        if let Some((user, _)) = cash_locks.iter().next() {
            return Err(EngineError::invariant(format!(
                "resting bids of user {} have no locked cash",
                user
            )));
        }
        if let Some(((user, symbol, outcome), _)) = share_locks.iter().next() {
            return Err(EngineError::invariant(format!(
                "resting {} {:?} offers of user {} have no locked shares",
                symbol, outcome, user
            )));
        }
        Ok(())
    }
}
