//! Outcome Exchange - binary prediction market engine
//!
//! Order matching and settlement for YES/NO markets where a YES share at
//! `p` and a NO share at `PAR - p` together always pay `PAR`.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (UserId, Price, Qty, etc.)
//! - [`error`] - Engine error type and classification
//! - [`models`] - Outcomes, order requests, fills and views
//! - [`balance`] - Enforced available/locked balance type
//! - [`user_account`] - Cash and share positions of one user
//! - [`ledger`] - Transactional cash and share ledger
//! - [`orderbook`] - BTreeMap-based two-sided book per market
//! - [`market_registry`] - Symbol to book mapping
//! - [`engine`] - Matching engine logic
//! - [`snapshot`] - Consistent engine snapshots and restore
//! - [`scenario`] - Command replay
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

// Core types - must be first!
pub mod core_types;
pub mod error;

// Trading components
pub mod balance;
pub mod engine;
pub mod ledger;
pub mod market_registry;
pub mod models;
pub mod orderbook;
pub mod snapshot;
pub mod user_account;

// Runtime
pub mod config;
pub mod logging;
pub mod scenario;

// Convenient re-exports at crate root
pub use balance::Balance;
pub use config::{AppConfig, EngineConfig};
pub use core_types::{Amount, DEFAULT_PAR, Price, Qty, Symbol, UserId};
pub use engine::MatchingEngine;
pub use error::{EngineError, ErrorClass};
pub use ledger::{Ledger, LedgerAudit};
pub use market_registry::MarketRegistry;
pub use models::{
    Action, CashView, Fill, FillKind, FillReport, OrderKind, OrderRequest, Outcome,
    PositionView, RestingPlacement,
};
pub use orderbook::{BookSnapshot, OrderBook};
pub use snapshot::EngineSnapshot;
pub use user_account::UserAccount;
