#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests.
//!
//! These verify that Cargo.toml keeps the panic-free lint set and the package
//! layout the crate relies on. If any test fails, the manifest has drifted
//! from project policy.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn manifest() -> toml::Table {
    let path = project_root().join("Cargo.toml");
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {e}", path.display()));
    text.parse::<toml::Table>()
        .unwrap_or_else(|e| panic!("Cargo.toml is not valid TOML: {e}"))
}

mod panic_policy {
    use super::*;

    const PANIC_FREE_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_denies_all_panic_prone_lints() {
        let manifest = manifest();
        let clippy = manifest["lints"]["clippy"]
            .as_table()
            .expect("Cargo.toml is missing [lints.clippy]");
        for lint in PANIC_FREE_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(toml::Value::as_str),
                Some("deny"),
                "`{lint}` must be set to deny in [lints.clippy]"
            );
        }
    }
}

mod package_policy {
    use super::*;

    #[test]
    fn rust_version_is_declared() {
        let manifest = manifest();
        let version = manifest["package"]["rust-version"]
            .as_str()
            .expect("Cargo.toml must declare a rust-version");
        assert!(
            version.split('.').count() == 3,
            "rust-version '{version}' must be a full x.y.z version"
        );
    }

    #[test]
    fn demo_example_points_at_existing_file() {
        let manifest = manifest();
        let examples = manifest["example"]
            .as_array()
            .expect("Cargo.toml must declare [[example]] targets");
        for example in examples {
            let path = example["path"].as_str().expect("example needs a path");
            assert!(
                project_root().join(path).is_file(),
                "example path '{path}' does not exist"
            );
        }
    }

    #[test]
    fn runtime_features_stay_minimal() {
        let manifest = manifest();
        let features: Vec<&str> = manifest["dependencies"]["tokio"]["features"]
            .as_array()
            .expect("tokio must list its features")
            .iter()
            .filter_map(toml::Value::as_str)
            .collect();
        assert!(
            !features.contains(&"full"),
            "the library must not enable tokio's `full` feature"
        );
        assert!(features.contains(&"time"), "deadlines need tokio's `time` feature");
    }
}
