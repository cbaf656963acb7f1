//! Environment readiness check.

use crate::cli::{output, with_store};
use crate::config::RunConfig;
use crate::renderer::chromium::find_chromium;
use crate::rules::{SourceKind, TargetSpec};
use crate::store::{TargetFile, TargetStore};
use anyhow::Result;
use serde_json::json;

/// Check the browser, the database and the configured targets.
pub fn run(config: &RunConfig) -> Result<()> {
    let chromium = find_chromium(config.chromium_path.as_deref());

    let db = with_store(&config.db_path, |store| Ok(store.list_targets()?));
    let targets = match &config.targets_file {
        Some(path) => TargetFile::new(path).list_targets().map_err(anyhow::Error::from),
        None => db.as_ref().cloned().map_err(|e| anyhow::anyhow!("{e:#}")),
    };

    let (valid, invalid, rendered) = match &targets {
        Ok(list) => {
            let specs: Vec<_> = list.iter().map(TargetSpec::try_from).collect();
            let valid = specs.iter().filter(|s| s.is_ok()).count();
            let rendered = specs
                .iter()
                .flatten()
                .filter(|s| s.source_kind == SourceKind::Rendered)
                .count();
            (valid, specs.len() - valid, rendered)
        }
        Err(_) => (0, 0, 0),
    };
    let ready = db.is_ok() && targets.is_ok() && (rendered == 0 || chromium.is_some());

    if output::is_json() {
        output::print_json(&json!({
            "ready": ready,
            "chromium": chromium.as_ref().map(|p| p.display().to_string()),
            "database": config.db_path.display().to_string(),
            "databaseOk": db.is_ok(),
            "targets": { "valid": valid, "invalid": invalid, "rendered": rendered },
            "notify": config.notify.as_ref().map(|n| n.url.clone()),
        }));
        return Ok(());
    }

    println!("Waitline Doctor");
    println!("===============");
    println!();
    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None if rendered > 0 => println!(
            "[!!] Chromium NOT found; {rendered} rendered targets will fail. Set WAITLINE_CHROMIUM_PATH."
        ),
        None => println!("[--] Chromium not found (no rendered targets)"),
    }

    match &db {
        Ok(_) => println!("[OK] Database: {}", config.db_path.display()),
        Err(e) => println!("[!!] Database {}: {e:#}", config.db_path.display()),
    }

    match &targets {
        Ok(_) if invalid == 0 => println!("[OK] Targets: {valid} valid"),
        Ok(_) => println!(
            "[!!] Targets: {valid} valid, {invalid} invalid (see `waitline targets list`)"
        ),
        Err(e) => println!("[!!] Targets unreadable: {e:#}"),
    }

    match &config.notify {
        Some(n) => println!("[OK] Notify endpoint: {}", n.url),
        None => println!("[--] Notify endpoint not configured"),
    }

    println!();
    println!("Status: {}", if ready { "READY" } else { "NOT READY" });
    Ok(())
}
