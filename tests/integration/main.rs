//! Integration tests for depcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Command isolated from the caller's config and cache environment
    fn depcache(home: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("depcache");
        cmd.env("DEPCACHE_CONFIG", home.join("config.toml"))
            .env_remove("OMNICACHE_PATH")
            .env_remove("EXTDEP_CACHE_PATH")
            .env_remove("RUST_LOG")
            .env("CI", "true");
        cmd
    }

    fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    fn tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_path_buf();
                    out.insert(rel, fs::read(&path).unwrap());
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(root, root, &mut out);
        out
    }

    fn find_object(root: &Path) -> Option<PathBuf> {
        for entry in fs::read_dir(root).ok()? {
            let path = entry.ok()?.path();
            if path.is_dir() {
                if let Some(found) = find_object(&path) {
                    return Some(found);
                }
            } else if path.file_name().is_some_and(|n| n == "object") {
                return Some(path);
            }
        }
        None
    }

    fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *body).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn help_displays() {
        let home = TempDir::new().unwrap();
        depcache(home.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build dependencies"));
    }

    #[test]
    fn version_displays() {
        let home = TempDir::new().unwrap();
        depcache(home.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("depcache"));
    }

    #[test]
    fn config_path_follows_env() {
        let home = TempDir::new().unwrap();
        depcache(home.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_init_then_show() {
        let home = TempDir::new().unwrap();
        depcache(home.path())
            .args(["config", "init"])
            .assert()
            .success();
        assert!(home.path().join("config.toml").exists());

        depcache(home.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[fetch]").and(predicate::str::contains("nuget_feed")));
    }

    #[test]
    fn invalid_config_is_reported() {
        let home = TempDir::new().unwrap();
        fs::write(home.path().join("config.toml"), "[gc]\nmax_age_days = \"never\"\n").unwrap();
        depcache(home.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn cache_list_empty_store() {
        let home = TempDir::new().unwrap();
        depcache(home.path())
            .args(["cache", "list", "--store", "extdep"])
            .env("EXTDEP_CACHE_PATH", home.path().join("extdep"))
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries found."));
    }

    #[test]
    fn cache_list_without_configured_store_warns() {
        let home = TempDir::new().unwrap();
        depcache(home.path())
            .args(["cache", "list", "--store", "extdep"])
            .assert()
            .success()
            .stderr(predicate::str::contains("not configured"));
    }

    #[test]
    fn fetch_web_is_identical_with_and_without_cache() {
        let home = TempDir::new().unwrap();
        let source = home.path().join("tool-1.0.bin");
        fs::write(&source, b"tool payload").unwrap();
        let url = file_url(&source);
        let cached = home.path().join("cached");
        let plain = home.path().join("plain");
        let cache_root = home.path().join("extdep");

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let out = depcache(home.path())
                .args(["--extdep-cache"])
                .arg(&cache_root)
                .args(["fetch", "web", url.as_str(), "--force", "--dest"])
                .arg(&cached)
                .assert()
                .success()
                .get_output()
                .stdout
                .clone();
            outputs.push(out);
        }
        assert_eq!(outputs[0], outputs[1], "stdout must not depend on hit or miss");

        depcache(home.path())
            .args(["--no-cache", "fetch", "web", url.as_str(), "--dest"])
            .arg(&plain)
            .assert()
            .success();

        assert_eq!(tree(&cached), tree(&plain));
        assert_eq!(fs::read(cached.join("tool-1.0.bin")).unwrap(), b"tool payload");
        assert!(find_object(&cache_root).is_some());
    }

    #[test]
    fn fetch_web_archive_with_internal_path() {
        let home = TempDir::new().unwrap();
        let archive = home.path().join("tool.tar.gz");
        fs::write(
            &archive,
            tar_gz(&[("tool-1.0/bin/tool", b"#!/bin/sh\n"), ("tool-1.0/README", b"hi")]),
        )
        .unwrap();
        let dest = home.path().join("out");

        depcache(home.path())
            .args(["fetch", "web", file_url(&archive).as_str(), "--archive", "tar-gz"])
            .args(["--internal-path", "tool-1.0", "--dest"])
            .arg(&dest)
            .assert()
            .success();

        assert_eq!(fs::read(dest.join("bin/tool")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(fs::read(dest.join("README")).unwrap(), b"hi");
    }

    #[test]
    fn fetch_refuses_non_empty_destination() {
        let home = TempDir::new().unwrap();
        let source = home.path().join("a.bin");
        fs::write(&source, b"a").unwrap();
        let dest = home.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep"), b"mine").unwrap();

        depcache(home.path())
            .args(["fetch", "web", file_url(&source).as_str(), "--dest"])
            .arg(&dest)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Destination is not empty"))
            .stderr(predicate::str::contains("--force"));
        assert_eq!(fs::read(dest.join("keep")).unwrap(), b"mine");
    }

    #[test]
    fn fetch_rejects_mismatched_sha256() {
        let home = TempDir::new().unwrap();
        let source = home.path().join("a.bin");
        fs::write(&source, b"a").unwrap();

        depcache(home.path())
            .args(["fetch", "web", file_url(&source).as_str(), "--sha256", "0".repeat(64).as_str(), "--dest"])
            .arg(home.path().join("dest"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Integrity check failed"));
    }

    #[test]
    fn fetch_missing_file_is_not_found() {
        let home = TempDir::new().unwrap();
        depcache(home.path())
            .args(["--extdep-cache"])
            .arg(home.path().join("extdep"))
            .args(["fetch", "web", file_url(&home.path().join("missing.bin")).as_str(), "--dest"])
            .arg(home.path().join("dest"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Not found upstream"));
    }

    #[test]
    fn sync_materializes_descriptors() {
        let home = TempDir::new().unwrap();
        let source = home.path().join("tool-1.0.bin");
        fs::write(&source, b"tool").unwrap();

        let project = home.path().join("project");
        fs::create_dir_all(project.join("deps")).unwrap();
        let descriptor = serde_json::json!({
            "scope": "global",
            "type": "web",
            "name": "tool",
            "source": file_url(&source),
            "version": "1.0",
        });
        fs::write(
            project.join("deps/tool_ext_dep.json"),
            descriptor.to_string(),
        )
        .unwrap();

        depcache(home.path())
            .arg("sync")
            .arg(&project)
            .assert()
            .success()
            .stdout(predicate::str::contains("tool updated"));

        let out = project.join("deps/tool_extdep");
        assert_eq!(fs::read(out.join("tool-1.0.bin")).unwrap(), b"tool");
        assert!(out.join("extdep_state.json").exists());

        depcache(home.path())
            .arg("sync")
            .arg(&project)
            .assert()
            .success()
            .stdout(predicate::str::contains("tool up to date"));
    }

    #[test]
    fn sync_reports_broken_descriptor() {
        let home = TempDir::new().unwrap();
        fs::write(home.path().join("bad_ext_dep.json"), "{").unwrap();

        depcache(home.path())
            .arg("sync")
            .arg(home.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to sync"));
    }

    #[test]
    fn cache_maintenance_round_trip() {
        let home = TempDir::new().unwrap();
        let source = home.path().join("tool-1.0.bin");
        fs::write(&source, b"tool payload").unwrap();
        let cache_root = home.path().join("extdep");
        let cache = |args: &[&str]| {
            let mut cmd = depcache(home.path());
            cmd.env("EXTDEP_CACHE_PATH", &cache_root)
                .arg("cache")
                .args(args)
                .args(["--store", "extdep"]);
            cmd
        };

        depcache(home.path())
            .env("EXTDEP_CACHE_PATH", &cache_root)
            .args(["fetch", "web", file_url(&source).as_str(), "--dest"])
            .arg(home.path().join("out"))
            .assert()
            .success();

        let listed = cache(&["list", "--format", "plain"]).assert().success().get_output().stdout.clone();
        let fingerprint = String::from_utf8(listed).unwrap().trim().to_string();
        assert_eq!(fingerprint.len(), 64);

        cache(&["info", &fingerprint[..10]])
            .assert()
            .success()
            .stdout(predicate::str::contains("tool-1.0.bin"));
        cache(&["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"store\": \"extdep\""));
        cache(&["verify"]).assert().success();

        fs::write(find_object(&cache_root).unwrap(), b"tampered!!!!").unwrap();
        cache(&["verify"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed verification"));
        cache(&["verify", "--fix"]).assert().success();
        assert!(find_object(&cache_root.join("entries")).is_none());

        cache(&["gc", "--days", "0", "--max-gb", "0"]).assert().success();
        assert!(find_object(&cache_root).is_none());
    }

    #[test]
    fn cache_clear_requires_confirmation() {
        let home = TempDir::new().unwrap();
        let source = home.path().join("a.bin");
        fs::write(&source, b"a").unwrap();
        let cache_root = home.path().join("extdep");

        depcache(home.path())
            .env("EXTDEP_CACHE_PATH", &cache_root)
            .args(["fetch", "web", file_url(&source).as_str(), "--dest"])
            .arg(home.path().join("out"))
            .assert()
            .success();

        depcache(home.path())
            .env("EXTDEP_CACHE_PATH", &cache_root)
            .args(["cache", "clear", "--store", "extdep"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Aborted."));
        assert!(find_object(&cache_root).is_some());

        depcache(home.path())
            .env("EXTDEP_CACHE_PATH", &cache_root)
            .args(["cache", "clear", "--yes", "--store", "extdep"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cleared 1 cache entries"));
        assert!(find_object(&cache_root.join("entries")).is_none());
    }
}
