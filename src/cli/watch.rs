//! studysync watch command implementation.
//!
//! Attaches a reconciler to the on-disk store and prints every in-app toast
//! as it arrives. Platform notifications go to the `--events` destination.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::channels::{Permission, Toast, ToastBus};
use crate::cli::Context;
use crate::config::parse_duration;
use crate::dispatch::NotificationDispatcher;
use crate::engine::Reconciler;
use crate::error::{Error, Result};
use crate::feed::{Scope, StoreFeed};
use crate::output::{emit_success, render_toast, Report};
use crate::suppression::{Deduplicator, FileSuppressionStore};

#[derive(Serialize)]
struct WatchReport {
    viewer: String,
    scope: Scope,
    permission: Permission,
    toasts: Vec<Toast>,
}

pub fn run(ctx: &Context, course: Option<String>, duration: Option<String>) -> Result<()> {
    let viewer = ctx.viewer()?;
    let storage = ctx.storage();
    storage.ensure_initialized()?;
    let config = ctx.config();
    let settings = config.settings()?;
    let limit = duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|limit| {
            limit
                .to_std()
                .map_err(|_| Error::InvalidArgument("--for cannot be negative".to_string()))
        })
        .transpose()?;

    // `--events -` owns stdout; Context already turned output off for it.
    let output = ctx.output;
    let live = !output.json && !output.quiet;

    let bus = ToastBus::new(settings.toast_capacity);
    let dispatcher = NotificationDispatcher::new(bus.clone(), ctx.platform(&config, &settings)?);
    let permission = dispatcher.prepare();

    let store = ctx.store();
    let reconciler = Arc::new(Reconciler::new(
        viewer.clone(),
        settings,
        Deduplicator::new(Arc::new(FileSuppressionStore::new(storage))),
        dispatcher,
        Arc::new(store.clone()),
    ));
    let scope = match course {
        Some(course_id) => Scope::Course(course_id),
        None => Scope::Member(viewer.clone()),
    };
    let feed = StoreFeed::new(store);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let toasts = runtime.block_on(async {
        let mut received = bus.subscribe();
        let handle = reconciler.attach(&feed, scope.clone())?;
        if live {
            println!("studysync watch: {scope} as {viewer} (platform {permission}), Ctrl-C to stop");
        }

        let stop = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %err, "ctrl-c handler unavailable");
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(stop);

        let mut toasts = Vec::new();
        loop {
            tokio::select! {
                _ = &mut stop => break,
                next = received.recv() => match next {
                    Ok(toast) => {
                        if live {
                            println!("{}", render_toast(&toast));
                        }
                        toasts.push(toast);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "toast output fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        handle.unsubscribe();
        Ok::<_, Error>(toasts)
    })?;

    let mut report = Report::new("studysync watch: stopped");
    report.field("scope", scope.to_string());
    report.field("notifications", toasts.len().to_string());
    for toast in &toasts {
        report.item(render_toast(toast));
    }

    emit_success(
        output,
        "watch",
        &WatchReport {
            viewer,
            scope,
            permission,
            toasts,
        },
        Some(&report),
    )
}
