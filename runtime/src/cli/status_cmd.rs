//! `waitline status`: show stored facility status.

use crate::cli::{output, with_store};
use anyhow::{bail, Result};
use std::path::Path;

pub fn run(db_path: &Path, facility_id: Option<&str>) -> Result<()> {
    let records = with_store(db_path, |store| match facility_id {
        Some(id) => Ok(store.get_status(id)?.into_iter().collect()),
        None => Ok(store.list_statuses()?),
    })?;
    if let (Some(id), true) = (facility_id, records.is_empty()) {
        bail!("no status stored for facility {id}");
    }
    output::print_records(&records);
    Ok(())
}
