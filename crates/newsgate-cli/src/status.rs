//! Human-readable status output for operator commands.

use chrono::{DateTime, Utc};
use newsgate_coord::{CircuitBreaker, KeyPool};
use newsgate_core::Provider;
use newsgate_ingest::CycleReport;

/// Format an optional timestamp for display, returning `"—"` when `None`.
fn fmt_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(
        || "\u{2014}".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub(crate) fn print_cycle_report(report: &CycleReport) {
    println!(
        "cycle {} ({}/{}/{})",
        report.cycle, report.slot.region, report.slot.topic, report.slot.language
    );
    for outcome in &report.providers {
        let status = match &outcome.error {
            Some(e) => format!("failed: {e}"),
            None if outcome.used => format!("{} articles", outcome.fetched),
            None => format!("{} articles (discarded)", outcome.fetched),
        };
        println!("  {:<12} {status}", outcome.provider.as_str());
    }
    println!(
        "  fetched {} / claimed {} / fresh {} / rejected {} / enqueued {}",
        report.fetched, report.claimed, report.fresh, report.rejected, report.enqueued
    );
}

/// Prints key cooldowns for `provider`. Keys are shown by fingerprint only.
///
/// # Errors
///
/// Returns an error if the coordination store cannot be read.
pub(crate) async fn print_keys(pool: &KeyPool, provider: Provider) -> anyhow::Result<()> {
    let keys = pool.snapshot(provider).await?;
    println!("{provider}: {} key(s)", keys.len());
    let now = Utc::now();
    for key in keys {
        let state = if key.is_cooling(now) {
            "cooling"
        } else {
            "ready"
        };
        println!(
            "  #{:<2} {}  {:<7}  errors {:<2}  until {}",
            key.position,
            key.fingerprint,
            state,
            key.consecutive_errors,
            fmt_time(key.cooldown_until)
        );
    }
    Ok(())
}

/// Prints breaker state for every provider.
///
/// # Errors
///
/// Returns an error if the coordination store cannot be read.
pub(crate) async fn print_circuits(breaker: &CircuitBreaker) -> anyhow::Result<()> {
    let policy = breaker.policy();
    println!(
        "threshold {} failures / window {}s / cooldown {}s",
        policy.threshold,
        policy.window.as_secs(),
        policy.cooldown.as_secs()
    );
    for provider in [Provider::NewswireA, Provider::NewswireB, Provider::Analysis] {
        let circuit = breaker.state(provider).await?;
        println!(
            "  {:<12} {:<6}  failures {:<2}  open until {}",
            provider.as_str(),
            circuit.state.to_string(),
            circuit.failure_count,
            fmt_time(circuit.opened_until)
        );
    }
    Ok(())
}
