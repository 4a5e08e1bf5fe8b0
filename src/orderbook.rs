//! OrderBook - per-symbol YES/NO offer books with price-time priority
//!
//! This module contains only the book data structure and its consistency
//! rules. The matching logic lives in the Engine module.
//!
//! # Key Design:
//! - Each outcome has its own `BTreeMap<Price, PriceLevel>`, ascending, so the
//!   first level is always the cheapest offer.
//! - Every resting entry is an **offer** to deliver one share of that outcome:
//!   a `New` entry is a real seller with locked shares, a `Complementary` entry
//!   is the mirrored remainder of a BUY on the opposite outcome.
//! - A level holds one entry per `(owner, kind)` in FIFO order; growing an
//!   entry keeps its queue position.
//! - Empty entries and empty levels are removed immediately.
//!
//! # Complexity:
//! | Operation | Time |
//! |-----------|------|
//! | Best offer | O(1) amortized |
//! | Grow / reduce | O(log n + k) |
//! | Stage + commit | O(ops × (log n + k)) |

use crate::core_types::{Price, Qty, Symbol, UserId};
use crate::error::EngineError;
use crate::models::{Action, OrderKind, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// A resting order. Orders have no identity beyond `(owner, kind)` inside
/// their price level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub owner: UserId,
    pub kind: OrderKind,
    pub qty: Qty,
}

// ============================================================
// PRICE LEVEL
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    price: Price,
    total_qty: Qty,
    orders: VecDeque<Order>,
}

impl PriceLevel {
    pub fn new(price: Price) -> Self {
        Self {
            price,
            total_qty: 0,
            orders: VecDeque::new(),
        }
    }

    #[inline]
    pub fn price(&self) -> Price {
        self.price
    }

    /// Sum of all constituent order quantities
    #[inline]
    pub fn total_qty(&self) -> Qty {
        self.total_qty
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders in time priority (oldest first)
    pub fn orders(&self) -> impl Iterator<Item = &Order> + '_ {
        self.orders.iter()
    }

    /// Quantity resting as complementary offers at this level
    pub fn complementary_qty(&self) -> Qty {
        self.orders
            .iter()
            .filter(|o| o.kind == OrderKind::Complementary)
            .map(|o| o.qty)
            .sum()
    }

    /// Quantity of a single `(owner, kind)` entry
    pub fn qty_of(&self, owner: UserId, kind: OrderKind) -> Qty {
        self.orders
            .iter()
            .find(|o| o.owner == owner && o.kind == kind)
            .map(|o| o.qty)
            .unwrap_or(0)
    }

    fn grow(&mut self, owner: UserId, kind: OrderKind, qty: Qty) -> Result<(), EngineError> {
        if qty == 0 {
            return Err(EngineError::invariant(format!(
                "zero-quantity insert at price {}",
                self.price
            )));
        }
        let total = self.total_qty.checked_add(qty).ok_or_else(|| {
            EngineError::invariant(format!("level total overflow at price {}", self.price))
        })?;
        match self
            .orders
            .iter_mut()
            .find(|o| o.owner == owner && o.kind == kind)
        {
            Some(order) => order.qty += qty,
            None => self.orders.push_back(Order { owner, kind, qty }),
        }
        self.total_qty = total;
        Ok(())
    }

    fn reduce(&mut self, owner: UserId, kind: OrderKind, qty: Qty) -> Result<(), EngineError> {
        let pos = self
            .orders
            .iter()
            .position(|o| o.owner == owner && o.kind == kind)
            .ok_or_else(|| {
                EngineError::invariant(format!(
                    "no {:?} order of user {} at price {}",
                    kind, owner, self.price
                ))
            })?;
        let resting = self.orders[pos].qty;
        if qty == 0 || qty > resting || qty > self.total_qty {
            return Err(EngineError::invariant(format!(
                "reduce {} exceeds resting {} for user {} at price {}",
                qty, resting, owner, self.price
            )));
        }
        if qty == resting {
            self.orders.remove(pos);
        } else {
            self.orders[pos].qty -= qty;
        }
        self.total_qty -= qty;
        Ok(())
    }

    fn check(&self) -> Result<(), String> {
        if self.orders.is_empty() {
            return Err(format!("empty level at price {}", self.price));
        }
        if self.orders.iter().any(|o| o.qty == 0) {
            return Err(format!("zero-quantity order at price {}", self.price));
        }
        let sum: u128 = self.orders.iter().map(|o| o.qty as u128).sum();
        if sum != self.total_qty as u128 {
            return Err(format!(
                "level total {} != order sum {} at price {}",
                self.total_qty, sum, self.price
            ));
        }
        Ok(())
    }
}

// ============================================================
// BOOK OPERATIONS
// ============================================================

/// A single book mutation, planned before it is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookOp {
    Grow {
        outcome: Outcome,
        price: Price,
        owner: UserId,
        kind: OrderKind,
        qty: Qty,
    },
    Reduce {
        outcome: Outcome,
        price: Price,
        owner: UserId,
        kind: OrderKind,
        qty: Qty,
    },
}

/// Post-operation state of every level touched by a batch of [`BookOp`]s.
///
/// Only [`OrderBook::stage`] can build one, so a staged batch has already
/// passed every check and [`OrderBook::commit`] cannot fail.
#[derive(Debug)]
pub struct StagedLevels {
    levels: Vec<(Outcome, PriceLevel)>,
}

// ============================================================
// ORDER BOOK
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBook {
    /// YES offers: price -> level (ascending, lowest = best)
    yes: BTreeMap<Price, PriceLevel>,
    /// NO offers: price -> level (ascending, lowest = best)
    no: BTreeMap<Price, PriceLevel>,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn side(&self, outcome: Outcome) -> &BTreeMap<Price, PriceLevel> {
        match outcome {
            Outcome::Yes => &self.yes,
            Outcome::No => &self.no,
        }
    }

    #[inline]
    fn side_mut(&mut self, outcome: Outcome) -> &mut BTreeMap<Price, PriceLevel> {
        match outcome {
            Outcome::Yes => &mut self.yes,
            Outcome::No => &mut self.no,
        }
    }

    /// Levels of one outcome, cheapest first
    pub fn levels(&self, outcome: Outcome) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.side(outcome).values()
    }

    pub fn level(&self, outcome: Outcome, price: Price) -> Option<&PriceLevel> {
        self.side(outcome).get(&price)
    }

    /// Lowest offer price for an outcome (any kind)
    #[inline]
    pub fn best_offer(&self, outcome: Outcome) -> Option<Price> {
        self.side(outcome).first_key_value().map(|(p, _)| *p)
    }

    /// Lowest level of `outcome` holding complementary quantity
    pub fn lowest_complementary(&self, outcome: Outcome) -> Option<Price> {
        self.levels(outcome)
            .find(|level| level.complementary_qty() > 0)
            .map(|level| level.price)
    }

    /// Best price an incoming order of `(outcome, action)` could trade at.
    ///
    /// - BUY: cheapest offer on the outcome's own book.
    /// - SELL: highest bid, i.e. `par - y` for the lowest complementary offer
    ///   `y` on the opposite outcome's book.
    pub fn best_price(&self, outcome: Outcome, action: Action, par: Price) -> Option<Price> {
        match action {
            Action::Buy => self.best_offer(outcome),
            Action::Sell => self
                .lowest_complementary(outcome.complement())
                .map(|y| par - y),
        }
    }

    /// Total quantity at a price level (0 if absent)
    pub fn qty_at_price(&self, outcome: Outcome, price: Price) -> Qty {
        self.level(outcome, price)
            .map(|l| l.total_qty())
            .unwrap_or(0)
    }

    /// Number of price levels per outcome (yes_depth, no_depth)
    #[inline]
    pub fn depth(&self) -> (usize, usize) {
        (self.yes.len(), self.no.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.yes.is_empty() && self.no.is_empty()
    }

    /// Create the level if absent, then create or grow the `(owner, kind)` entry
    pub fn insert_or_grow(
        &mut self,
        outcome: Outcome,
        price: Price,
        owner: UserId,
        kind: OrderKind,
        qty: Qty,
    ) -> Result<(), EngineError> {
        let staged = self.stage(&[BookOp::Grow {
            outcome,
            price,
            owner,
            kind,
            qty,
        }])?;
        self.commit(staged);
        Ok(())
    }

    /// Shrink the `(owner, kind)` entry, dropping it at zero and the level
    /// once its total reaches zero
    pub fn reduce_or_remove(
        &mut self,
        outcome: Outcome,
        price: Price,
        owner: UserId,
        kind: OrderKind,
        qty: Qty,
    ) -> Result<(), EngineError> {
        let staged = self.stage(&[BookOp::Reduce {
            outcome,
            price,
            owner,
            kind,
            qty,
        }])?;
        self.commit(staged);
        Ok(())
    }

    /// Check a batch of operations against the current book without
    /// mutating it.
    pub fn stage(&self, ops: &[BookOp]) -> Result<StagedLevels, EngineError> {
        let mut touched: BTreeMap<(Outcome, Price), PriceLevel> = BTreeMap::new();
        for op in ops {
            let (outcome, price) = match *op {
                BookOp::Grow { outcome, price, .. } | BookOp::Reduce { outcome, price, .. } => {
                    (outcome, price)
                }
            };
            if price == 0 {
                return Err(EngineError::invariant("book operation at price 0"));
            }
            let level = touched.entry((outcome, price)).or_insert_with(|| {
                self.level(outcome, price)
                    .cloned()
                    .unwrap_or_else(|| PriceLevel::new(price))
            });
            match *op {
                BookOp::Grow {
                    owner, kind, qty, ..
                } => level.grow(owner, kind, qty)?,
                BookOp::Reduce {
                    owner, kind, qty, ..
                } => level.reduce(owner, kind, qty)?,
            }
        }
        Ok(StagedLevels {
            levels: touched
                .into_iter()
                .map(|((outcome, _), level)| (outcome, level))
                .collect(),
        })
    }

    /// Install the levels produced by [`OrderBook::stage`]
    pub fn commit(&mut self, staged: StagedLevels) {
        for (outcome, level) in staged.levels {
            let side = self.side_mut(outcome);
            if level.is_empty() {
                side.remove(&level.price);
            } else {
                side.insert(level.price, level);
            }
        }
    }

    /// True if some offer could have traded against a complementary bid.
    ///
    /// A complementary offer at `y` on one outcome is a bid at `par - y` on the
    /// other; the book is crossed when that bid reaches the other outcome's
    /// best offer.
    pub fn is_crossed(&self, par: Price) -> bool {
        [Outcome::Yes, Outcome::No].into_iter().any(|outcome| {
            match (
                self.best_offer(outcome),
                self.lowest_complementary(outcome.complement()),
            ) {
                (Some(offer), Some(comp)) => offer + comp <= par,
                _ => false,
            }
        })
    }

    /// Structural check: level keys match prices, totals match order sums,
    /// no empty levels or zero-quantity orders.
    pub fn check_consistency(&self) -> Result<(), EngineError> {
        for outcome in [Outcome::Yes, Outcome::No] {
            for (price, level) in self.side(outcome) {
                if *price != level.price {
                    return Err(EngineError::invariant(format!(
                        "level keyed {} holds price {}",
                        price, level.price
                    )));
                }
                level.check().map_err(EngineError::invariant)?;
            }
        }
        Ok(())
    }

    /// Serializable view of the full book
    pub fn snapshot(&self, symbol: &str) -> BookSnapshot {
        let levels = |outcome: Outcome| -> Vec<LevelSnapshot> {
            self.levels(outcome)
                .map(|level| LevelSnapshot {
                    price: level.price,
                    total_qty: level.total_qty,
                    orders: level.orders.iter().cloned().collect(),
                })
                .collect()
        };
        BookSnapshot {
            symbol: symbol.to_string(),
            yes: levels(Outcome::Yes),
            no: levels(Outcome::No),
        }
    }

    /// Rebuild a book from its snapshot, rejecting inconsistent input
    pub fn from_snapshot(snapshot: &BookSnapshot) -> Result<Self, EngineError> {
        let mut book = OrderBook::new();
        for (outcome, levels) in [(Outcome::Yes, &snapshot.yes), (Outcome::No, &snapshot.no)] {
            for snap in levels {
                if snap.price == 0 || book.side(outcome).contains_key(&snap.price) {
                    return Err(EngineError::invariant(format!(
                        "bad level price {} in snapshot of {}",
                        snap.price, snapshot.symbol
                    )));
                }
                let level = PriceLevel {
                    price: snap.price,
                    total_qty: snap.total_qty,
                    orders: snap.orders.iter().cloned().collect(),
                };
                level.check().map_err(EngineError::invariant)?;
                book.side_mut(outcome).insert(snap.price, level);
            }
        }
        Ok(book)
    }
}

// ============================================================
// SNAPSHOTS
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub price: Price,
    pub total_qty: Qty,
    pub orders: Vec<Order>,
}

/// Full book of one market. Levels are sorted by ascending price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: Symbol,
    pub yes: Vec<LevelSnapshot>,
    pub no: Vec<LevelSnapshot>,
}

impl BookSnapshot {
    pub fn levels(&self, outcome: Outcome) -> &[LevelSnapshot] {
        match outcome {
            Outcome::Yes => &self.yes,
            Outcome::No => &self.no,
        }
    }

    pub fn level(&self, outcome: Outcome, price: Price) -> Option<&LevelSnapshot> {
        self.levels(outcome).iter().find(|l| l.price == price)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.yes.is_empty() && self.no.is_empty()
    }
}
