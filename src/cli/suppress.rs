//! studysync suppress command implementations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::Context;
use crate::config::parse_duration;
use crate::error::{Error, Result};
use crate::output::{emit_success, Report};
use crate::suppression::{FileSuppressionStore, SuppressionStore};

#[derive(Serialize)]
struct CompactReport {
    max_age: String,
    removed: usize,
    remaining: usize,
}

pub fn run_compact(ctx: &Context, max_age: Option<String>) -> Result<()> {
    let storage = ctx.storage();
    storage.ensure_initialized()?;
    let max_age = match max_age {
        Some(raw) => raw,
        None => ctx.config().suppression.max_age,
    };
    let age = parse_duration(&max_age)?;

    let cutoff = Utc::now().checked_sub_signed(age).ok_or_else(|| {
        Error::InvalidArgument(format!("max age '{max_age}' reaches past the earliest date"))
    })?;

    let store = FileSuppressionStore::new(storage);
    let removed = store.compact(cutoff)?;
    let remaining = store.len()?;

    let mut report = Report::new(format!("studysync suppress compact: removed {removed}"));
    report.field("max age", max_age.clone());
    report.field("remaining", remaining.to_string());

    emit_success(
        ctx.output,
        "suppress compact",
        &CompactReport {
            max_age,
            removed,
            remaining,
        },
        Some(&report),
    )
}

#[derive(Serialize)]
struct SuppressionEntry {
    key: String,
    last_fired: DateTime<Utc>,
}

#[derive(Serialize)]
struct SuppressionList {
    entries: Vec<SuppressionEntry>,
}

pub fn run_list(ctx: &Context) -> Result<()> {
    let storage = ctx.storage();
    storage.ensure_initialized()?;
    let entries: Vec<SuppressionEntry> = FileSuppressionStore::new(storage)
        .entries()?
        .into_iter()
        .map(|(key, last_fired)| SuppressionEntry { key, last_fired })
        .collect();

    let mut report = Report::new(format!(
        "studysync suppress list: {} key(s)",
        entries.len()
    ));
    for entry in &entries {
        report.item(format!("{}  {}", entry.key, entry.last_fired.to_rfc3339()));
    }

    emit_success(ctx.output, "suppress list", &SuppressionList { entries }, Some(&report))
}
