//! depcache - transparent local caches for build dependencies
//!
//! Fetches git revisions, NuGet packages and web downloads through a shared
//! git object cache (the Omnicache) and a content-addressed artifact store.
//! A fetch produces the same files whether the cache is enabled, disabled,
//! cold or warm.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fetcher;
pub mod identifier;
pub mod materialize;
pub mod sync;
pub mod ui;

pub use error::{DepcacheError, DepcacheResult};
pub use fetcher::{CacheSettings, CachedFetcher};
pub use identifier::ArtifactIdentifier;
pub use materialize::MaterializedArtifact;
