//! Sync command - materialize every descriptor under a set of roots

use crate::cli::args::SyncArgs;
use crate::config::{CacheOverrides, Config};
use crate::descriptor::{discover, ExtDepDescriptor};
use crate::error::{DepcacheError, DepcacheResult};
use crate::sync::{sync_all, SyncStatus};
use crate::ui::{self, SyncProgress, UiContext};
use std::env;
use tracing::debug;

/// Execute the sync command
pub async fn execute(args: SyncArgs, config: &Config, overrides: &CacheOverrides) -> DepcacheResult<()> {
    let ctx = UiContext::detect();

    let roots = if args.roots.is_empty() {
        vec![env::current_dir().map_err(|e| DepcacheError::io("getting current directory", e))?]
    } else {
        args.roots
    };

    let paths = discover(&roots)?;
    if paths.is_empty() {
        ui::step_info(&ctx, "No *_ext_dep.json descriptors found");
        return Ok(());
    }
    debug!(count = paths.len(), "Discovered descriptors");

    // A descriptor that fails to load is reported but does not stop the others
    let mut failures = 0usize;
    let mut descriptors = Vec::with_capacity(paths.len());
    for path in &paths {
        match ExtDepDescriptor::load(path) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => {
                failures += 1;
                ui::step_error_detail(&ctx, &path.display().to_string(), &e.to_string());
            }
        }
    }

    let fetcher = super::build_fetcher(config, overrides);
    let jobs = args.jobs.unwrap_or(config.fetch.jobs);

    let progress = SyncProgress::new(&ctx, descriptors.len());
    let results = sync_all(&fetcher, &descriptors, jobs, args.force, |descriptor, _| {
        progress.finished(&descriptor.name)
    })
    .await;
    progress.finish();

    let mut updated = 0usize;
    for (descriptor, result) in descriptors.iter().zip(results) {
        match result {
            Ok(outcome) => {
                let detail = outcome.dest.display().to_string();
                match outcome.status {
                    SyncStatus::Updated => {
                        updated += 1;
                        ui::step_ok_detail(&ctx, &format!("{} updated", outcome.name), &detail);
                    }
                    SyncStatus::UpToDate => {
                        ui::step_ok_detail(&ctx, &format!("{} up to date", outcome.name), &detail)
                    }
                }
            }
            Err(e) => {
                failures += 1;
                ui::step_error_detail(&ctx, &descriptor.name, &e.to_string());
                if let Some(hint) = e.hint() {
                    ui::remark(&ctx, hint);
                }
            }
        }
    }

    if failures > 0 {
        return Err(DepcacheError::User(format!(
            "{} of {} dependencies failed to sync",
            failures,
            paths.len()
        )));
    }

    ui::outro_success(
        &ctx,
        &format!("{} dependencies synced ({} updated)", descriptors.len(), updated),
    );
    Ok(())
}
