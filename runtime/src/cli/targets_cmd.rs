//! `waitline targets`: inspect and move target definitions.

use crate::cli::{output, with_store};
use crate::rules::{RawTarget, TargetSpec};
use crate::store::{TargetFile, TargetStore};
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetCheck<'a> {
    id: &'a str,
    source_kind: Option<&'a str>,
    source_url: Option<&'a str>,
    fields: usize,
    error: Option<String>,
}

fn check(raw: &RawTarget) -> TargetCheck<'_> {
    let (fields, error) = match TargetSpec::try_from(raw) {
        Ok(spec) => (spec.field_rules.len(), None),
        Err(e) => (0, Some(e.to_string())),
    };
    TargetCheck {
        id: raw.display_id(),
        source_kind: raw.source_kind.as_deref(),
        source_url: raw.source_url.as_deref(),
        fields,
        error,
    }
}

/// List stored targets with their validation result.
pub fn list(db_path: &Path, targets_file: Option<&Path>) -> Result<()> {
    let targets = match targets_file {
        Some(path) => TargetFile::new(path).list_targets()?,
        None => with_store(db_path, |store| Ok(store.list_targets()?))?,
    };
    let checks: Vec<TargetCheck<'_>> = targets.iter().map(check).collect();

    if output::is_json() {
        output::print_json(&checks);
        return Ok(());
    }
    if checks.is_empty() {
        if !output::is_quiet() {
            println!("No targets configured.");
        }
        return Ok(());
    }
    for c in &checks {
        let status = match &c.error {
            None => format!("[OK] {} fields", c.fields),
            Some(e) => format!("[!!] {e}"),
        };
        println!(
            "  {:<24} {:<9} {}",
            c.id,
            c.source_kind.unwrap_or("-"),
            c.source_url.unwrap_or("-")
        );
        println!("  {:<24} {status}", "");
    }
    Ok(())
}

/// Write every stored target to a JSON file.
pub fn export(db_path: &Path, file: &Path) -> Result<()> {
    let mut targets = with_store(db_path, |store| Ok(store.list_targets()?))?;
    targets.retain(|t| match &t.malformed {
        Some(reason) => {
            warn!(facility_id = t.display_id(), "not exported, malformed row: {reason}");
            false
        }
        None => true,
    });
    TargetFile::new(file).write(&targets)?;
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "exported": targets.len(),
            "file": file.display().to_string(),
        }));
    } else if !output::is_quiet() {
        println!("Exported {} targets to {}", targets.len(), file.display());
    }
    Ok(())
}

/// Load targets from a JSON file into the database.
///
/// Invalid targets are reported and skipped; valid ones replace any stored
/// target with the same id.
pub fn import(db_path: &Path, file: &Path) -> Result<()> {
    let targets = TargetFile::new(file).read()?;
    let (imported, skipped) = with_store(db_path, |store| {
        let mut imported = 0usize;
        let mut skipped = Vec::new();
        for raw in &targets {
            match TargetSpec::try_from(raw) {
                Ok(_) => {
                    store.put_target(raw)?;
                    imported += 1;
                }
                Err(e) => skipped.push((raw.display_id().to_string(), e.to_string())),
            }
        }
        Ok((imported, skipped))
    })?;

    if output::is_json() {
        let skipped: Vec<_> = skipped
            .iter()
            .map(|(id, reason)| serde_json::json!({ "id": id, "reason": reason }))
            .collect();
        output::print_json(&serde_json::json!({
            "imported": imported,
            "skipped": skipped,
        }));
    } else if !output::is_quiet() {
        println!("Imported {imported} targets from {}", file.display());
        for (id, reason) in &skipped {
            println!("  [!!] skipped {id}: {reason}");
        }
    }
    Ok(())
}
