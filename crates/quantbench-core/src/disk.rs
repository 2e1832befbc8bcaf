//! Free-space queries via `df`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::collaborators::DiskQuery;

const KIB_PER_GIB: f64 = 1024.0 * 1024.0;

/// Production `DiskQuery` that asks the OS on every call.
///
/// Runs `df -Pk` against the nearest existing ancestor of the requested
/// path, so a storage directory that has not been created yet still
/// reports its volume.
#[derive(Debug, Default, Clone)]
pub struct DfDiskQuery;

impl DfDiskQuery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DiskQuery for DfDiskQuery {
    async fn free_space_gb(&self, path: &Path) -> Result<f64> {
        let target = nearest_existing(path);
        let output = Command::new("df")
            .arg("-Pk")
            .arg(&target)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to spawn df")?;

        if !output.status.success() {
            bail!(
                "df {} exited with {}: {}",
                target.display(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_df_available_gb(&String::from_utf8_lossy(&output.stdout))
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    loop {
        if candidate.exists() {
            return candidate;
        }
        if !candidate.pop() || candidate.as_os_str().is_empty() {
            return PathBuf::from(".");
        }
    }
}

/// Parse POSIX `df -Pk` output into available GiB.
///
/// The data row may wrap when the filesystem name is long, so the
/// available column is taken as the third field from the end.
pub fn parse_df_available_gb(stdout: &str) -> Result<f64> {
    let row: Vec<&str> = stdout
        .lines()
        .skip(1)
        .flat_map(str::split_whitespace)
        .collect();
    if row.len() < 4 {
        bail!("unexpected df output: {stdout:?}");
    }
    let available = row[row.len() - 3];
    let kib: f64 = available
        .parse()
        .with_context(|| format!("unparseable available column {available:?}"))?;
    Ok(kib / KIB_PER_GIB)
}
