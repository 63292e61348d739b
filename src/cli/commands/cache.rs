//! Cache command - inspect and maintain the caches

use crate::backend::GitCli;
use crate::cache::gc::{collect, collect_omnicache, GcReport};
use crate::cache::{
    format_bytes, gb_to_bytes, AnyOf, CacheEntry, CacheStore, EquivalenceGuard, EvictionPolicy,
    GcOptions, MaxAge, MaxTotalSize, Omnicache,
};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat, StoreSelector};
use crate::config::{resolve_cache_settings, CacheOverrides, Config};
use crate::error::{DepcacheError, DepcacheResult};
use crate::fetcher::CacheSettings;
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Stores selected for one command
struct Stores {
    omnicache: Option<Omnicache>,
    extdep: Option<CacheStore>,
}

impl Stores {
    /// `(label, store, repository)` for each open store
    fn each(&self) -> Vec<(&'static str, &CacheStore, Option<&Path>)> {
        let mut stores = Vec::new();
        if let Some(omnicache) = &self.omnicache {
            stores.push(("omnicache", omnicache.store(), Some(omnicache.root())));
        }
        if let Some(extdep) = &self.extdep {
            stores.push(("extdep", extdep, None));
        }
        stores
    }
}

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config, overrides: &CacheOverrides) -> DepcacheResult<()> {
    let ctx = UiContext::detect();
    let settings = resolve_cache_settings(config, overrides);
    let git = GitCli::with_program(&config.fetch.git);
    let stores = open_stores(&ctx, &settings, &git, args.store).await?;

    match args.action {
        CacheAction::List { format } => list_entries(&stores, format),
        CacheAction::Info { fingerprint } => show_entry(&ctx, &stores, &fingerprint),
        CacheAction::Gc {
            days,
            max_gb,
            dry_run,
        } => gc_stores(&ctx, &stores, config, days, max_gb, dry_run).await,
        CacheAction::Verify { fix } => verify_stores(&ctx, &stores, &settings, git, fix).await,
        CacheAction::Clear { yes } => clear_stores(&ctx, &stores, yes).await,
    }
}

async fn open_stores(
    ctx: &UiContext,
    settings: &CacheSettings,
    git: &GitCli,
    selector: StoreSelector,
) -> DepcacheResult<Stores> {
    let mut stores = Stores {
        omnicache: None,
        extdep: None,
    };

    if selector.includes_omnicache() {
        match &settings.omnicache {
            Some(root) => stores.omnicache = Some(Omnicache::open(root, git.clone()).await?),
            None => ui::step_warn_hint(
                ctx,
                "Omnicache is not configured",
                "Set OMNICACHE_PATH, --omnicache or [omnicache] path",
            ),
        }
    }

    if selector.includes_extdep() {
        match &settings.extdep {
            Some(root) => stores.extdep = Some(CacheStore::open(root)?),
            None => ui::step_warn_hint(
                ctx,
                "Extdep cache is not configured",
                "Set EXTDEP_CACHE_PATH, --extdep-cache or [extdep] path",
            ),
        }
    }

    Ok(stores)
}

/// List entries of every selected store
fn list_entries(stores: &Stores, format: OutputFormat) -> DepcacheResult<()> {
    let mut rows = Vec::new();
    for (label, store, _) in stores.each() {
        rows.extend(store.list()?.into_iter().map(|entry| (label, entry)));
    }

    match format {
        OutputFormat::Table => print_entry_table(&rows),
        OutputFormat::Json => print_entry_json(&rows)?,
        OutputFormat::Plain => {
            for (_, entry) in &rows {
                println!("{}", entry.fingerprint());
            }
        }
    }
    Ok(())
}

fn print_entry_table(rows: &[(&str, CacheEntry)]) {
    if rows.is_empty() {
        println!("No cache entries found.");
        return;
    }

    println!(
        "{:<10} {:<12} {:<6} {:>10} {:<17} {}",
        "STORE", "ENTRY", "KIND", "SIZE", "LAST USED", "IDENTIFIER"
    );
    println!("{}", "-".repeat(90));

    for (label, entry) in rows {
        let size = if entry.metadata.size_bytes == 0 {
            "-".to_string()
        } else {
            format_bytes(entry.metadata.size_bytes)
        };
        println!(
            "{:<10} {:<12} {:<6} {:>10} {:<17} {}",
            label,
            entry.fingerprint().short(),
            entry.metadata.identifier.kind(),
            size,
            entry.last_activity().format("%Y-%m-%d %H:%M"),
            entry.metadata.identifier
        );
    }

    let total: u64 = rows.iter().map(|(_, e)| e.metadata.size_bytes).sum();
    println!();
    println!("Total: {} entries, {}", rows.len(), format_bytes(total));
}

#[derive(Serialize)]
struct EntryJson<'a> {
    store: &'a str,
    fingerprint: &'a str,
    identifier: &'a crate::identifier::ArtifactIdentifier,
    digest: &'a str,
    size_bytes: u64,
    created_at: String,
    last_used: Option<String>,
}

fn print_entry_json(rows: &[(&str, CacheEntry)]) -> DepcacheResult<()> {
    let entries: Vec<EntryJson> = rows
        .iter()
        .map(|(label, entry)| EntryJson {
            store: label,
            fingerprint: entry.fingerprint().as_str(),
            identifier: &entry.metadata.identifier,
            digest: entry.metadata.integrity.digest(),
            size_bytes: entry.metadata.size_bytes,
            created_at: entry.metadata.created_at.to_rfc3339(),
            last_used: entry.last_used.map(|t| t.to_rfc3339()),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

/// Show one entry, addressed by fingerprint or unique prefix
fn show_entry(ctx: &UiContext, stores: &Stores, query: &str) -> DepcacheResult<()> {
    let query = query.to_ascii_lowercase();
    let mut matches = Vec::new();
    for (label, store, _) in stores.each() {
        for entry in store.list()? {
            if entry.fingerprint().as_str().starts_with(&query) {
                matches.push((label, entry));
            }
        }
    }

    let (label, entry) = match matches.len() {
        0 => return Err(DepcacheError::User(format!("No cache entry matches '{}'", query))),
        1 => matches.remove(0),
        n => {
            return Err(DepcacheError::User(format!(
                "'{}' matches {} entries, use a longer prefix",
                query, n
            )))
        }
    };

    let meta = &entry.metadata;
    ui::section(ctx, &meta.identifier.to_string());
    ui::key_value(ctx, "Store", label);
    ui::key_value(ctx, "Fingerprint", meta.fingerprint.as_str());
    ui::key_value(ctx, "Kind", meta.identifier.kind());
    ui::key_value(ctx, "Digest", meta.integrity.digest());
    if meta.size_bytes > 0 {
        ui::key_value(ctx, "Size", &format_bytes(meta.size_bytes));
    }
    ui::key_value(ctx, "Created", &meta.created_at.to_rfc3339());
    ui::key_value(ctx, "Validated", &meta.validated_at.to_rfc3339());
    ui::key_value(
        ctx,
        "Last used",
        &entry
            .last_used
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string()),
    );
    ui::key_value(ctx, "Path", &entry.dir.display().to_string());
    Ok(())
}

/// Build the eviction policy from flags and config; zero disables a rule
fn eviction_policy(config: &Config, days: Option<u32>, max_gb: Option<u32>) -> AnyOf {
    let mut rules: Vec<Box<dyn EvictionPolicy>> = Vec::new();

    let days = days.unwrap_or(config.gc.max_age_days);
    if days > 0 {
        rules.push(Box::new(MaxAge { days }));
    }

    let max_gb = max_gb.unwrap_or(config.gc.max_total_gb);
    if max_gb > 0 {
        rules.push(Box::new(MaxTotalSize {
            bytes: gb_to_bytes(max_gb),
        }));
    }

    AnyOf(rules)
}

async fn gc_stores(
    ctx: &UiContext,
    stores: &Stores,
    config: &Config,
    days: Option<u32>,
    max_gb: Option<u32>,
    dry_run: bool,
) -> DepcacheResult<()> {
    let policy = eviction_policy(config, days, max_gb);
    let options = GcOptions {
        stale_staging: Duration::from_secs(u64::from(config.gc.stale_tmp_hours) * 3600),
        dry_run,
    };
    debug!(policy = %policy.describe(), "Collecting caches");

    if let Some(omnicache) = &stores.omnicache {
        let report = collect_omnicache(omnicache, &policy, options).await?;
        print_gc_report(ctx, "omnicache", &report, dry_run);
    }
    if let Some(extdep) = &stores.extdep {
        let report = collect(extdep, &policy, options)?;
        print_gc_report(ctx, "extdep", &report, dry_run);
    }

    if dry_run {
        ui::remark(ctx, "Dry run - nothing removed.");
    }
    Ok(())
}

fn print_gc_report(ctx: &UiContext, label: &str, report: &GcReport, dry_run: bool) {
    let verb = if dry_run { "would evict" } else { "evicted" };
    let mut summary = format!("{}: {} {} entries", label, verb, report.evicted.len());
    if report.freed_bytes > 0 {
        summary.push_str(&format!(" ({})", format_bytes(report.freed_bytes)));
    }
    ui::step_ok(ctx, &summary);

    for fingerprint in &report.evicted {
        println!("  {} {}", style("•").red(), fingerprint.short());
    }
    if report.stale_staging > 0 || report.quarantined > 0 {
        ui::step_info(
            ctx,
            &format!(
                "{}: {} stale staging dirs, {} quarantined entries",
                label, report.stale_staging, report.quarantined
            ),
        );
    }
    if report.pins_pruned > 0 || report.holds_released > 0 {
        ui::step_info(
            ctx,
            &format!(
                "{}: pruned {} pins, released {} stale holds",
                label, report.pins_pruned, report.holds_released
            ),
        );
    }
}

/// Check every entry; with `fix`, quarantine the ones that fail
async fn verify_stores(
    ctx: &UiContext,
    stores: &Stores,
    settings: &CacheSettings,
    git: GitCli,
    fix: bool,
) -> DepcacheResult<()> {
    let guard = EquivalenceGuard::new(git, settings.verify);
    let mut checked = 0usize;
    let mut invalid = 0usize;

    for (label, store, repository) in stores.each() {
        for entry in store.list()? {
            checked += 1;
            let verdict = guard.verify(&entry, repository).await;
            if verdict.is_valid() {
                continue;
            }

            invalid += 1;
            ui::step_error_detail(
                ctx,
                &format!("{} {}", label, entry.fingerprint().short()),
                &verdict.to_string(),
            );
            if fix {
                store.quarantine(entry.fingerprint())?;
            }
        }
    }

    if invalid == 0 {
        ui::step_ok(ctx, &format!("{} entries verified", checked));
        return Ok(());
    }
    if fix {
        ui::step_warn_hint(
            ctx,
            &format!("Quarantined {} of {} entries", invalid, checked),
            "They are refetched on next use and removed by: depcache cache gc",
        );
        return Ok(());
    }

    Err(DepcacheError::User(format!(
        "{} of {} entries failed verification (rerun with --fix to quarantine them)",
        invalid, checked
    )))
}

/// Remove every entry of the selected stores
async fn clear_stores(ctx: &UiContext, stores: &Stores, yes: bool) -> DepcacheResult<()> {
    let mut total = 0usize;
    for (_, store, _) in stores.each() {
        total += store.stats()?.entries;
    }

    if total == 0 {
        println!("No cache entries to clear.");
        return Ok(());
    }

    let ctx = ctx.clone().with_auto_yes(yes);
    let prompt = format!("Remove {} cache entries?", total);
    if !ui::confirm(&ctx, &prompt, false).await? {
        println!("Aborted.");
        return Ok(());
    }

    let mut removed = 0usize;
    if let Some(omnicache) = &stores.omnicache {
        for entry in omnicache.store().list()? {
            if omnicache.evict(entry.fingerprint()).await? {
                removed += 1;
            }
        }
        omnicache.prune_pins().await?;
    }
    if let Some(extdep) = &stores.extdep {
        for entry in extdep.list()? {
            if extdep.remove(entry.fingerprint())? {
                removed += 1;
            }
        }
    }

    ui::step_ok(&ctx, &format!("Cleared {} cache entries", removed));
    Ok(())
}
