use anyhow::{Context, Result};
use chrono::Utc;
use std::io::ErrorKind;

use relaycast::config::Config;
use relaycast::scheduler::RateGate;
use relaycast::storage::{migrate as normalize, LoadOutcome, StateStore};

/// Print a summary of the persisted state without modifying it
pub fn status(config: &Config) -> Result<()> {
    let path = &config.store.path;
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            println!("No state document at {}", path.display());
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let normalized = normalize::decode(&bytes, config.control.bootstrap_admin)
        .with_context(|| format!("State document is unreadable: {}", path.display()))?;
    let state = normalized.state;
    let gate = RateGate::new(config.distribution.default_daily_cap);
    let now = Utc::now();

    println!("State document: {}", path.display());
    if normalized.upgraded {
        println!("  (legacy shape, run `relaycast migrate` to upgrade)");
    }
    println!("{:-<40}", "");
    println!("Selection mode:    {}", state.selection_mode);
    println!("Global cadence:    {} min", state.global_cadence_minutes);
    println!(
        "Broadcast to all:  {}",
        if state.broadcast_all { "on" } else { "off" }
    );
    println!("Sequential cursor: {}", state.sequential_cursor);
    println!("Admins:            {}", state.admins.len());
    println!("Log entries:       {}", state.activity_log.len());
    println!("Deliveries (24h):  {}", state.sends_last_day(now));
    println!();

    if state.destinations.is_empty() {
        println!("No destinations registered.");
        return Ok(());
    }

    println!("Destinations ({}):", state.destinations.len());
    for id in state.destinations.keys() {
        let last = state
            .last_sent(*id)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {id:>16}  every {:>4} min  last {last}  {}",
            state.effective_cadence(*id),
            gate.check(&state, *id, now)
        );
    }

    Ok(())
}

/// Load, normalize and rewrite the state document
pub fn migrate(config: &Config) -> Result<()> {
    let store = StateStore::new(&config.store.path, config.control.bootstrap_admin);
    let loaded = store
        .load()
        .with_context(|| format!("Failed to migrate {}", config.store.path.display()))?;

    let message = match loaded.outcome {
        LoadOutcome::Created => "No document found, created a fresh one",
        LoadOutcome::Loaded => "Document already current, nothing to do",
        LoadOutcome::Migrated => "Document upgraded to the current version",
        LoadOutcome::Reset => "Document was unreadable, a copy was kept and defaults written",
    };
    tracing::info!(path = %config.store.path.display(), outcome = ?loaded.outcome, "Migration finished");
    println!("{message}: {}", config.store.path.display());
    Ok(())
}
