//! Fetch command - fetch one artifact into a directory

use crate::cli::args::{FetchArgs, FetchSource, OutputFormat};
use crate::config::{CacheOverrides, Config};
use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::{ArtifactIdentifier, GitSpec, NugetSpec, WebSpec};
use crate::ui::{TaskSpinner, UiContext};
use serde::Serialize;
use std::path::Path;

/// Result printed on stdout; never includes provenance
#[derive(Debug, Serialize)]
struct FetchResult<'a> {
    identifier: &'a ArtifactIdentifier,
    path: &'a Path,
    digest: &'a str,
}

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config, overrides: &CacheOverrides) -> DepcacheResult<()> {
    let identifier = identifier_from(&args.source, config);
    identifier.validate()?;

    let output = args.source.output();
    if !output.force && !is_empty_dir(&output.dest)? {
        return Err(DepcacheError::DestinationNotEmpty(output.dest.clone()));
    }

    let fetcher = super::build_fetcher(config, overrides);
    let ctx = UiContext::detect();
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Fetching {}", identifier));

    let artifact = match fetcher.fetch(&identifier, &output.dest).await {
        Ok(artifact) => {
            spinner.clear();
            artifact
        }
        Err(e) => {
            spinner.stop_error(&format!("Failed to fetch {}", identifier));
            return Err(e);
        }
    };

    let result = FetchResult {
        identifier: &identifier,
        path: &artifact.path,
        digest: &artifact.digest,
    };
    match output.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table | OutputFormat::Plain => {
            println!("{}  {}", result.digest, result.path.display())
        }
    }
    Ok(())
}

fn identifier_from(source: &FetchSource, config: &Config) -> ArtifactIdentifier {
    match source {
        FetchSource::Git { url, reference, .. } => ArtifactIdentifier::Git(GitSpec {
            url: url.clone(),
            reference: reference.clone(),
        }),
        FetchSource::Nuget {
            name,
            version,
            feed,
            sha256,
            ..
        } => ArtifactIdentifier::Nuget(NugetSpec {
            name: name.clone(),
            version: version.clone(),
            feed: Some(
                feed.clone()
                    .unwrap_or_else(|| config.fetch.nuget_feed.clone()),
            ),
            sha256: sha256.as_deref().map(str::to_ascii_lowercase),
        }),
        FetchSource::Web {
            url,
            name,
            version,
            sha256,
            archive,
            internal_path,
            ..
        } => ArtifactIdentifier::Web(WebSpec {
            url: url.clone(),
            name: name.clone().unwrap_or_else(|| name_from_url(url)),
            version: version.clone(),
            sha256: sha256.as_deref().map(str::to_ascii_lowercase),
            archive: (*archive).into(),
            internal_path: internal_path.clone(),
        }),
    }
}

/// Last path segment of a URL without query or fragment; never the host
fn name_from_url(url: &str) -> String {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => url,
    };
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

fn is_empty_dir(path: &Path) -> DepcacheResult<bool> {
    if path.is_file() {
        return Ok(false);
    }
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(DepcacheError::io(format!("reading {}", path.display()), e)),
    }
}
