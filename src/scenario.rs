//! Scenario replay
//!
//! A scenario is a list of [`Command`]s, usually read from YAML:
//!
//! ```yaml
//! - op: create_market
//!   symbol: BTC-100K
//! - op: create_user
//!   user: 1
//! - op: deposit
//!   user: 1
//!   amount: 10000
//! - op: submit
//!   user: 1
//!   symbol: BTC-100K
//!   outcome: yes
//!   action: buy
//!   price: 600
//!   qty: 10
//! ```
//!
//! [`run`] applies every command in order. A rejected command is recorded
//! and the replay continues; only invariant violations stop it.

use crate::core_types::{Amount, Qty, Symbol, UserId};
use crate::engine::MatchingEngine;
use crate::error::EngineError;
use crate::models::{CashView, FillReport, OrderRequest, Outcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateUser {
        user: UserId,
    },
    Deposit {
        user: UserId,
        amount: Amount,
    },
    CreateMarket {
        symbol: Symbol,
    },
    CreditShares {
        user: UserId,
        symbol: Symbol,
        outcome: Outcome,
        qty: Qty,
    },
    Submit(OrderRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Ok,
    Cash(CashView),
    Filled(FillReport),
    Rejected { error: String },
}

impl CommandOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, CommandOutcome::Rejected { .. })
    }
}

pub fn parse_yaml(content: &str) -> Result<Vec<Command>, serde_yaml::Error> {
    serde_yaml::from_str(content)
}

fn apply(engine: &MatchingEngine, command: &Command) -> Result<CommandOutcome, EngineError> {
    match command {
        Command::CreateUser { user } => engine.create_user(*user).map(|_| CommandOutcome::Ok),
        Command::Deposit { user, amount } => {
            engine.deposit(*user, *amount).map(CommandOutcome::Cash)
        }
        Command::CreateMarket { symbol } => {
            engine.create_market(symbol).map(|_| CommandOutcome::Ok)
        }
        Command::CreditShares {
            user,
            symbol,
            outcome,
            qty,
        } => engine
            .credit_shares(*user, symbol, *outcome, *qty)
            .map(|_| CommandOutcome::Ok),
        Command::Submit(req) => engine.submit_order(req).map(CommandOutcome::Filled),
    }
}

/// Apply `commands` in order, one outcome per command.
///
/// Stops at the first invariant violation and returns it.
pub fn run(
    engine: &MatchingEngine,
    commands: &[Command],
) -> Result<Vec<CommandOutcome>, EngineError> {
    let mut outcomes = Vec::with_capacity(commands.len());
    for (step, command) in commands.iter().enumerate() {
        match apply(engine, command) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) if err.is_internal() => {
                tracing::error!(step, ?command, error = %err, "Scenario aborted");
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(step, ?command, error = %err, "Command rejected");
                outcomes.push(CommandOutcome::Rejected {
                    error: err.to_string(),
                });
            }
        }
    }
    tracing::info!(commands = commands.len(), "Scenario complete");
    Ok(outcomes)
}
