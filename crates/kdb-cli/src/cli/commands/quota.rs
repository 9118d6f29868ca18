//! Quota command handlers.

use anyhow::Result;
use kdb_core::config::Config;
use kdb_core::rate_limit::RateLimitGate;
use kdb_core::session::SessionContext;
use kdb_core::store::FileStore;

fn open_gate(config: &Config) -> RateLimitGate<FileStore> {
    RateLimitGate::new(
        FileStore::open_default(),
        config.rate_limit.to_gate_config(),
    )
}

pub fn status(config: &Config, now_ms: i64) -> Result<()> {
    let gate = open_gate(config);
    let status = gate.describe_status(now_ms);

    println!("used today: {}/{}", status.count, gate.config().daily_limit);
    println!("next request: {}", status.countdown_text);
    Ok(())
}

pub fn check(config: &Config, now_ms: i64) -> Result<()> {
    let session = SessionContext::new(config.effective_api_key().map(str::to_string));
    if !session.requires_rate_limit() {
        println!("allowed (no api_key configured, rate limit not applied)");
        return Ok(());
    }

    let mut gate = open_gate(config);
    let decision = gate.check_allowed(now_ms);
    if decision.allowed {
        println!("allowed");
    } else {
        let reason = decision.reason.unwrap_or_default();
        tracing::info!(wait_seconds = ?decision.wait_seconds, "request blocked: {reason}");
        println!("{reason}");
    }
    Ok(())
}

pub fn record(config: &Config, now_ms: i64) -> Result<()> {
    let mut gate = open_gate(config);
    gate.record_usage(now_ms);

    let status = gate.describe_status(now_ms);
    println!(
        "Recorded request ({}/{} today)",
        status.count,
        gate.config().daily_limit
    );
    Ok(())
}

pub fn reset(config: &Config) -> Result<()> {
    let mut gate = open_gate(config);
    gate.reset();

    println!("Cleared quota state");
    Ok(())
}
