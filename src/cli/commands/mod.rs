//! CLI command implementations

pub mod cache;
pub mod config;
pub mod fetch;
pub mod sync;

pub use cache::execute as cache;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use sync::execute as sync;

use crate::backend::{Backends, GitCli, UreqTransport};
use crate::config::{resolve_cache_settings, CacheOverrides, Config};
use crate::fetcher::CachedFetcher;
use std::sync::Arc;
use std::time::Duration;

/// Build the fetcher for this run from the loaded config and overrides
pub fn build_fetcher(config: &Config, overrides: &CacheOverrides) -> CachedFetcher {
    let http = Arc::new(UreqTransport::new(Duration::from_secs(
        config.fetch.timeout_secs,
    )));
    let backends = Backends::with_git(GitCli::with_program(&config.fetch.git), http);
    CachedFetcher::new(resolve_cache_settings(config, overrides), backends)
}
