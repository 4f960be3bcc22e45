//! Triggers the statement export and captures the downloaded artifact.
//!
//! The export control hands the file to the browser's download machinery,
//! so the only way to identify the artifact is to diff the watched
//! directory around the click. The new file is renamed to a stable,
//! contributor-keyed name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::timing::Pause;

use super::PortalCtx;

const DOWNLOAD_POLL: Duration = Duration::from_millis(500);

/// Click the export control and wait for the artifact to land in
/// `download_dir`, then rename it to `{contributor_id}_{suffix}`.
///
/// Failure here is non-fatal to the account: the caller proceeds to
/// teardown regardless.
pub async fn export_statement(
    ctx: &PortalCtx<'_>,
    contributor_id: &str,
    download_dir: &Path,
) -> Result<PathBuf> {
    info!(contributor = contributor_id, "exporting statement");

    std::fs::create_dir_all(download_dir).with_context(|| {
        format!("Failed to create download dir: {}", download_dir.display())
    })?;
    let before = snapshot(download_dir)?;

    ctx.driver
        .wait_for(&ctx.portal().export_button, ctx.waits().element())
        .await
        .context("export control did not appear")?;
    ctx.pacer.pause(Pause::Action).await;
    ctx.driver.click(&ctx.portal().export_button).await?;

    let downloaded = wait_for_download(download_dir, &before, ctx.waits().download()).await?;
    debug!(file = %downloaded.display(), "download detected");

    let name = downloaded
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !name.ends_with(&ctx.config.export_extension) {
        anyhow::bail!(
            "downloaded file {name} does not have the expected {} extension",
            ctx.config.export_extension
        );
    }

    let target = download_dir.join(format!("{contributor_id}_{}", ctx.config.export_suffix));
    if target.exists() {
        std::fs::remove_file(&target)
            .with_context(|| format!("Failed to replace {}", target.display()))?;
    }
    std::fs::rename(&downloaded, &target)
        .with_context(|| format!("Failed to rename export to {}", target.display()))?;

    info!(file = %target.display(), "statement saved");
    Ok(target)
}

fn snapshot(dir: &Path) -> Result<HashSet<PathBuf>> {
    Ok(std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read download dir: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect())
}

/// Poll for a new, fully written file in the watched directory.
async fn wait_for_download(
    dir: &Path,
    before: &HashSet<PathBuf>,
    timeout: Duration,
) -> Result<PathBuf> {
    let start = Instant::now();

    loop {
        for file in snapshot(dir)? {
            if before.contains(&file) {
                continue;
            }
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            // In-progress Chrome downloads; the final file appears when
            // the rename lands.
            if name.ends_with(".crdownload") {
                continue;
            }
            return Ok(file);
        }

        if start.elapsed() >= timeout {
            anyhow::bail!("no download detected within {timeout:?}");
        }
        tokio::time::sleep(DOWNLOAD_POLL).await;
    }
}
