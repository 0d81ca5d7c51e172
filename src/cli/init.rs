//! studysync init command implementation
//!
//! Creates the shared state directory and a default config file.

use std::path::{Path, PathBuf};

use crate::cli::Context;
use crate::config::{Config, CONFIG_FILE};
use crate::error::Result;
use crate::output::{emit_success, Report};
use crate::storage::STATE_DIR;

#[derive(serde::Serialize)]
struct InitReport {
    root: PathBuf,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    state_dir: bool,
}

pub fn run(ctx: &Context) -> Result<()> {
    let storage = ctx.storage();
    let created_state_dir = storage.init()?;
    let created_config = ensure_config(&storage.config_file(), ctx.viewer.as_deref())?;

    let data = InitReport {
        root: ctx.root.clone(),
        created: InitCreated {
            config: created_config,
            state_dir: created_state_dir,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(CONFIG_FILE.to_string());
    }
    if created_state_dir {
        created_items.push(format!("{STATE_DIR}/"));
    }

    let header = if created_items.is_empty() {
        "studysync init: nothing to do".to_string()
    } else {
        "studysync init: initialized".to_string()
    };

    let mut report = Report::new(header);
    report.field("root", ctx.root.display().to_string());
    report.field(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    report.hint("studysync course add <name>");
    report.hint("studysync watch");

    emit_success(ctx.output, "init", &data, Some(&report))
}

fn ensure_config(path: &Path, viewer: Option<&str>) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let mut config = Config::default();
    config.viewer.id = viewer
        .map(str::trim)
        .filter(|viewer| !viewer.is_empty())
        .map(str::to_string);
    config.save(path)?;
    Ok(true)
}
