//! Contributor selection from the post-login dropdown.
//!
//! Selecting an option triggers an implicit form submission in the
//! portal page, so the flow settles after every selection and accepts
//! the browser's form-resubmission warning when it appears. Matching
//! runs twice with different text extraction strategies because the
//! dropdown's rendered text does not always equal its markup text.

use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::timing::Pause;

use super::{popup, PortalCtx};

/// Select the dropdown option for `contributor_id`.
///
/// Returns `false` only when no option matches by either strategy; the
/// caller reports that upward as a data mismatch rather than retrying.
/// Repeated calls with the same id are idempotent: an already-selected
/// contributor is never re-submitted.
pub async fn select_contributor(ctx: &PortalCtx<'_>, contributor_id: &str) -> Result<bool> {
    let selector = &ctx.portal().contributor_select;
    info!(contributor = contributor_id, "selecting contributor");

    ctx.driver
        .wait_for(selector, ctx.waits().element())
        .await?;

    if let Some(current) = ctx.driver.selected_option(selector).await? {
        if current.contains(contributor_id) {
            info!(contributor = contributor_id, "contributor already selected");
            popup::dismiss_notice(ctx).await?;
            return Ok(true);
        }
    }

    if ctx.driver.select_by_text(selector, contributor_id).await? {
        info!("contributor selected by option text");
        finish_selection(ctx).await?;
        return Ok(true);
    }

    debug!("text match failed; scanning options by position");
    let options = ctx.driver.option_texts(selector).await?;
    for (index, text) in options.iter().enumerate() {
        if text.contains(contributor_id) {
            ctx.driver.select_by_index(selector, index).await?;
            info!(index, option = %text, "contributor selected by position");
            finish_selection(ctx).await?;
            return Ok(true);
        }
    }

    warn!(
        contributor = contributor_id,
        "no dropdown option matches contributor"
    );
    Ok(false)
}

/// Settle the implicit submission, accept the resubmission dialog if it
/// shows up, and clear any popup the contributor switch produced.
async fn finish_selection(ctx: &PortalCtx<'_>) -> Result<()> {
    ctx.pacer.pause(Pause::Settle).await;
    confirm_resubmission(ctx).await;
    popup::dismiss_notice(ctx).await?;
    Ok(())
}

/// Accept the form-resubmission warning within a short bounded wait.
/// Its absence is the normal case.
async fn confirm_resubmission(ctx: &PortalCtx<'_>) {
    let portal = ctx.portal();
    let deadline = Instant::now() + ctx.waits().resubmit();

    loop {
        for label in &portal.resubmit_labels {
            match ctx
                .driver
                .click_matching(&portal.resubmit_button, label)
                .await
            {
                Ok(true) => {
                    info!(label = %label, "accepted form resubmission dialog");
                    ctx.pacer.pause(Pause::Settle).await;
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(error = %err, "resubmission probe failed; assuming no dialog");
                    return;
                }
            }
        }
        if Instant::now() >= deadline {
            debug!("no resubmission dialog");
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
