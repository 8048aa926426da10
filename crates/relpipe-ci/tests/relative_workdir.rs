//! A pipeline bound to a relative working tree.
//!
//! Changes the process's current directory, so it lives in its own test
//! binary with a single test.

#![cfg(unix)]

use std::path::Path;

use relpipe_ci::{PipelineOptions, ReleasePipeline, Target};
use relpipe_core::{PipelineState, ReleaseConfig};

/// Bundler honouring `-o <path>`, writing a script that reports a version.
const PACKAGER_OK: &str = r#"out=""
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then out="$2"; fi
    shift
done
printf '#!/bin/sh\necho "prm 1.0.0"\n' > "$out"
chmod +x "$out""#;

/// Test: dist from a relative working tree verifies the artifact it built
#[tokio::test]
async fn test_dist_from_relative_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let tree = dir.path().join("sub");
    std::fs::create_dir_all(tree.join("prm")).unwrap();
    std::fs::write(tree.join("prm/__init__.py"), "").unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    let mut config = ReleaseConfig::default();
    config.tools.packager = vec![
        "sh".to_string(),
        "-c".to_string(),
        PACKAGER_OK.to_string(),
        "pex".to_string(),
    ];

    let result = ReleasePipeline::new(Path::new("sub"), config, PipelineOptions::default())
        .unwrap()
        .run(Target::Dist)
        .await
        .unwrap();

    assert_eq!(result.exit_code(), 0, "{:?}", result.stages);
    assert_eq!(result.final_state, PipelineState::Verified);
    assert!(tree.join("dist/prm.pex").is_file());
    assert!(result.artifact.unwrap().is_absolute());
}
