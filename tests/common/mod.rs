#![allow(dead_code)]

use std::io::Write;

use tempfile::TempDir;

/// Definition file with a container step followed by a transformation.
pub const SUCCESSFUL_DEFINITION: &str = r#"
[pipeline.build-and-run]
description = "Build and run container, then run transformations."
tags = ["AI-Pipeline"]

[[pipeline.build-and-run.unit]]
id = "build_container"
cmd = "true"

[[pipeline.build-and-run.unit]]
id = "run_transform"
cmd = "true"
after = ["build_container"]
"#;

/// Create a throwaway local "repository" holding `pipelines.toml`.
pub fn write_source_repo(definition: &str) -> std::io::Result<TempDir> {
    let dir = tempfile::tempdir()?;
    let mut file = std::fs::File::create(dir.path().join("pipelines.toml"))?;
    file.write_all(definition.as_bytes())?;
    Ok(dir)
}
