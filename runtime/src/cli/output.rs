//! Output helpers shared by the subcommands.
//!
//! Global flags are exported as environment variables by `main` so every
//! command reads them the same way.

use crate::assemble::CanonicalRecord;
use crate::orchestrator::RunSummary;
use serde::Serialize;

pub fn is_json() -> bool {
    flag("WAITLINE_JSON")
}

pub fn is_quiet() -> bool {
    flag("WAITLINE_QUIET")
}

pub fn is_verbose() -> bool {
    flag("WAITLINE_VERBOSE")
}

fn flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1")
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("  Error: failed to serialize output: {e}"),
    }
}

pub fn print_summary(summary: &RunSummary) {
    if is_json() {
        print_json(summary);
        return;
    }
    if is_quiet() {
        return;
    }
    println!(
        "Run {} finished: {} persisted, {} failed",
        summary.run_id, summary.succeeded, summary.failed
    );
    for report in &summary.outcomes {
        let kind = report.source_kind.map(|k| k.as_str()).unwrap_or("-");
        let detail = report.detail.as_deref().unwrap_or("");
        println!(
            "  {:<24} {:<9} {:<15} {:>7}ms  {detail}",
            report.facility_id,
            kind,
            report.outcome.as_str(),
            report.elapsed_ms
        );
    }
}

pub fn print_records(records: &[CanonicalRecord]) {
    if is_json() {
        print_json(records);
        return;
    }
    if records.is_empty() {
        if !is_quiet() {
            println!("No facility status stored yet.");
        }
        return;
    }
    println!(
        "  {:<24} {:<8} {:>6} {:>8} {:>10}  {:<20}  {:<20}",
        "FACILITY", "STATUS", "WAIT", "WAITING", "TREATMENT", "LAST UPDATED", "UPDATED AT"
    );
    for r in records {
        println!(
            "  {:<24} {:<8} {:>6} {:>8} {:>10}  {:<20}  {:<20}",
            r.facility_id,
            r.status.as_str(),
            cell(r.estimated_wait_minutes),
            cell(r.patients_waiting),
            cell(r.patients_in_treatment),
            r.last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into()),
            r.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}

fn cell(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}
