//! Best-effort dismissal of the portal's interstitial notice popup.
//!
//! The popup can appear after opening the statement application and
//! again after switching contributor context, so callers invoke this
//! opportunistically. It is idempotent and never fails the surrounding
//! flow: a popup that refuses to close is logged and left alone.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::driver::{Driver, DriverError};
use crate::timing::Pause;

use super::PortalCtx;

const ABSENCE_POLL: Duration = Duration::from_millis(200);

/// Try to close the notice popup if one is present.
///
/// Returns `true` once the popup is confirmed closed. Returns `false`
/// when no popup is present (the common case, not an error) or when the
/// popup is still visible after the configured number of attempts.
pub async fn dismiss_notice(ctx: &PortalCtx<'_>) -> Result<bool> {
    let selector = &ctx.portal().popup_close;
    let attempts = ctx.retry().popup_attempts;

    for attempt in 1..=attempts {
        match ctx.driver.wait_for(selector, ctx.waits().popup()).await {
            Ok(()) => {}
            Err(DriverError::Timeout { .. }) => {
                debug!("no notice popup present");
                return Ok(false);
            }
            Err(err) => {
                debug!(error = %err, "popup probe failed; treating as not present");
                return Ok(false);
            }
        }

        ctx.pacer.pause(Pause::Action).await;
        if let Err(err) = ctx.driver.click(selector).await {
            debug!(error = %err, "popup close control vanished before click");
            return Ok(false);
        }
        ctx.pacer.pause(Pause::Action).await;

        if confirmed_gone(ctx.driver, selector, ctx.waits().popup_confirm()).await {
            info!("notice popup dismissed");
            return Ok(true);
        }

        warn!(attempt, attempts, "notice popup still visible after close click");
    }

    warn!("giving up on notice popup after {} attempts", attempts);
    Ok(false)
}

/// Poll for the popup close control to disappear.
async fn confirmed_gone(driver: &dyn Driver, selector: &str, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        match driver.exists(selector).await {
            Ok(false) => return true,
            Ok(true) => {}
            // Probe failures don't prove the popup closed.
            Err(_) => return false,
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(ABSENCE_POLL).await;
    }
}
