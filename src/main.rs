//! Outcome Exchange - scenario runner
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ Scenario │───▶│  Engine  │───▶│  Output  │
//! │  (YAML)  │    │  (YAML)  │    │ (Match)  │    │  (JSON)  │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Usage: `outcome_exchange [--env dev] [--scenario demos/basic.yaml]`

use anyhow::Context;
use outcome_exchange::config::AppConfig;
use outcome_exchange::logging::init_logging;
use outcome_exchange::scenario;
use outcome_exchange::MatchingEngine;
use serde_json::json;
use std::fs;

// ============================================================
// ARGUMENTS
// ============================================================

fn arg_value(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|pair| names.contains(&pair[0].as_str()))
        .map(|pair| pair[1].clone())
}

fn get_env() -> String {
    arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_scenario() -> Option<String> {
    arg_value(&["--scenario", "-s"])
}

// ============================================================
// MAIN
// ============================================================

fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config =
        AppConfig::load(&env).with_context(|| format!("loading config for env {}", env))?;
    let _log_guard = init_logging(&app_config);

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        par = app_config.engine.par,
        "Starting Outcome Exchange"
    );

    let engine = MatchingEngine::new(&app_config.engine)?;
    for symbol in &app_config.markets {
        engine
            .create_market(symbol)
            .with_context(|| format!("creating configured market {}", symbol))?;
    }

    let outcomes = match get_scenario() {
        Some(path) => {
            let content =
                fs::read_to_string(&path).with_context(|| format!("reading scenario {}", path))?;
            let commands = scenario::parse_yaml(&content)
                .with_context(|| format!("parsing scenario {}", path))?;
            tracing::info!(path = %path, commands = commands.len(), "Replaying scenario");
            scenario::run(&engine, &commands)?
        }
        None => Vec::new(),
    };

    engine.audit().context("post-run audit")?;
    let audit = engine.ledger().audit();
    let snapshot = engine.snapshot();

    let report = json!({
        "outcomes": outcomes,
        "snapshot": snapshot,
        "audit": {
            "cash_total": audit.cash_total.to_string(),
            "collateral_total": audit.collateral_total.to_string(),
            "deposited": audit.deposited.to_string(),
            "balanced": audit.is_balanced(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!(
        markets = snapshot.markets.len(),
        users = snapshot.ledger.accounts.len(),
        "Run complete"
    );
    Ok(())
}
