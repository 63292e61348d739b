//! Cache layer
//!
//! Identity-addressed storage for fetched artifacts, the Omnicache for git
//! objects, the equivalence guard, and out-of-band eviction.

pub mod entry;
pub mod fingerprint;
pub mod gc;
pub mod guard;
pub mod omnicache;
pub mod store;

pub use entry::{format_bytes, gb_to_bytes, CacheEntry, EntryMetadata, Integrity};
pub use fingerprint::{Fingerprint, Fingerprinter, Sha256Fingerprinter};
pub use gc::{AnyOf, EvictionPolicy, GcOptions, GcReport, MaxAge, MaxTotalSize};
pub use guard::{EquivalenceGuard, Verdict, VerifyDepth};
pub use omnicache::Omnicache;
pub use store::{CacheStore, StagingDir, StoreStats};
