//! studysync user command implementation.

use crate::cli::Context;
use crate::directory::UserProfile;
use crate::error::{Error, Result};
use crate::output::{emit_success, Report};

pub fn run_set(ctx: &Context, name: Option<String>, email: Option<String>) -> Result<()> {
    if name.is_none() && email.is_none() {
        return Err(Error::InvalidArgument(
            "nothing to set (pass --name and/or --email)".to_string(),
        ));
    }
    let viewer = ctx.viewer()?;
    let store = ctx.store();

    let existing = store
        .load()?
        .users
        .into_iter()
        .find(|user| user.id == viewer);
    let profile = UserProfile {
        id: viewer.clone(),
        display_name: name.or_else(|| existing.as_ref().and_then(|user| user.display_name.clone())),
        email: email.or_else(|| existing.and_then(|user| user.email)),
    };
    store.upsert_user(profile.clone())?;

    let mut report = Report::new(format!("studysync user set: updated {viewer}"));
    report.field("shown as", profile.label().unwrap_or(viewer.as_str()).to_string());

    emit_success(ctx.output, "user set", &profile, Some(&report))
}
