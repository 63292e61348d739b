//! CLI argument definitions using clap derive

use crate::identifier::ArchiveKind;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// depcache - transparent local caches for build dependencies
///
/// Fetches git revisions, NuGet packages and web downloads through a local
/// cache. The output of a fetch is identical with or without a cache.
#[derive(Parser, Debug)]
#[command(name = "depcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DEPCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bare repository used as the git object cache
    #[arg(long, global = true, env = "OMNICACHE_PATH", value_name = "PATH")]
    pub omnicache: Option<PathBuf>,

    /// Root of the external dependency cache
    #[arg(long, global = true, env = "EXTDEP_CACHE_PATH", value_name = "PATH")]
    pub extdep_cache: Option<PathBuf>,

    /// Disable both caches for this run
    #[arg(long, global = true)]
    pub no_cache: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one artifact into a directory
    Fetch(FetchArgs),

    /// Materialize every *_ext_dep.json descriptor under the given roots
    Sync(SyncArgs),

    /// Inspect and maintain the caches
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    #[command(subcommand)]
    pub source: FetchSource,
}

/// What to fetch
#[derive(Subcommand, Debug)]
pub enum FetchSource {
    /// A revision of a git repository
    Git {
        /// Remote URL
        url: String,
        /// Branch, tag, full ref name or commit id
        reference: String,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// A NuGet package, extracted
    Nuget {
        /// Package id
        name: String,
        /// Package version
        version: String,
        /// Service index or flat-container URL (default: from config)
        #[arg(long)]
        feed: Option<String>,
        /// Expected SHA-256 of the .nupkg
        #[arg(long)]
        sha256: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// A file downloaded over HTTP(S) or file://
    Web {
        /// Download URL
        url: String,
        /// Artifact name (default: last URL segment)
        #[arg(long)]
        name: Option<String>,
        /// Artifact version label
        #[arg(long, default_value = "0")]
        version: String,
        /// Expected SHA-256 of the download
        #[arg(long)]
        sha256: Option<String>,
        /// How to lay the download out at the destination
        #[arg(long, value_enum, default_value = "none")]
        archive: ArchiveArg,
        /// Archive subtree to place at the destination root
        #[arg(long)]
        internal_path: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
}

impl FetchSource {
    pub fn output(&self) -> &OutputArgs {
        match self {
            Self::Git { output, .. } | Self::Nuget { output, .. } | Self::Web { output, .. } => {
                output
            }
        }
    }
}

/// Destination options shared by every fetch
#[derive(Parser, Debug)]
pub struct OutputArgs {
    /// Directory to materialize into
    #[arg(short, long)]
    pub dest: PathBuf,

    /// Replace a non-empty destination
    #[arg(short, long)]
    pub force: bool,

    /// Output format for the result line
    #[arg(long, default_value = "plain")]
    pub format: OutputFormat,
}

/// Archive layout accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArchiveArg {
    None,
    TarGz,
    Zip,
}

impl From<ArchiveArg> for ArchiveKind {
    fn from(arg: ArchiveArg) -> Self {
        match arg {
            ArchiveArg::None => ArchiveKind::None,
            ArchiveArg::TarGz => ArchiveKind::TarGz,
            ArchiveArg::Zip => ArchiveKind::Zip,
        }
    }
}

/// Arguments for the sync command
#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// Directories (or descriptor files) to scan; defaults to the current directory
    pub roots: Vec<PathBuf>,

    /// Refetch even when the output directory is already current
    #[arg(short, long)]
    pub force: bool,

    /// Concurrent fetches (default: from config)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Which store a cache command applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreSelector {
    Omnicache,
    Extdep,
    All,
}

impl StoreSelector {
    pub fn includes_omnicache(self) -> bool {
        matches!(self, Self::Omnicache | Self::All)
    }

    pub fn includes_extdep(self) -> bool {
        matches!(self, Self::Extdep | Self::All)
    }
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Store to operate on
    #[arg(long, global = true, value_enum, default_value = "all")]
    pub store: StoreSelector,

    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one entry (full fingerprint or unique prefix)
    Info {
        fingerprint: String,
    },

    /// Evict entries and sweep leftovers of aborted runs
    Gc {
        /// Evict entries unused for N days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Evict least-recently-used entries beyond N GB (default: from config)
        #[arg(long)]
        max_gb: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Check every entry against its recorded integrity
    Verify {
        /// Quarantine entries that fail
        #[arg(long)]
        fix: bool,
    },

    /// Remove every entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
