//! Opens the statement application in a secondary tab and recovers from
//! the portal's authentication races.
//!
//! This is the part of the system that has to tolerate the portal
//! fighting back. A freshly opened tab can land on a hard authentication
//! collision (the second tab lost the session race) or on a transient
//! localized error, and each needs a different recovery: the collision
//! tab is worthless and must be closed before retrying, while the
//! transient page usually survives a refresh. Every attempt starts and
//! ends with a known tab count, so the loop can be retried safely.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::classify::AuthFailure;
use crate::driver::{close_secondary_tabs, focus_primary, DriverError};
use crate::timing::Pause;

use super::{popup, PortalCtx};

enum Attempt {
    /// The statement tab is open, clean, active, and focused.
    Opened,
    /// Recoverable failure; tab state is back to primary-only.
    Retry,
}

/// Open the statement application from the portal's global search.
///
/// Makes at most `navigation_attempts` attempts. On `Ok(true)` the
/// secondary tab is active and focused; on `Ok(false)` the account is
/// unprocessable this run and only the primary tab remains.
pub async fn open_statement_app(ctx: &PortalCtx<'_>, login_id: &str) -> Result<bool> {
    let attempts = ctx.retry().navigation_attempts;

    for attempt in 1..=attempts {
        info!(
            login = login_id,
            attempt, attempts, "opening statement application"
        );

        match run_attempt(ctx).await {
            Ok(Attempt::Opened) => return Ok(true),
            Ok(Attempt::Retry) => {
                debug!(attempt, "attempt failed; retrying from search");
            }
            Err(err) => {
                // Whatever went wrong mid-attempt, the next attempt must
                // start from a single focused primary tab.
                warn!(error = %err, attempt, "navigation attempt errored; resetting tab state");
                if let Err(reset) = close_secondary_tabs(ctx.driver).await {
                    warn!(error = %reset, "failed to reset tab state");
                }
                ctx.pacer.pause(Pause::Settle).await;
            }
        }
    }

    close_secondary_tabs(ctx.driver).await?;
    warn!(
        login = login_id,
        "could not open the statement application after {attempts} attempts"
    );
    Ok(false)
}

async fn run_attempt(ctx: &PortalCtx<'_>) -> Result<Attempt> {
    let portal = ctx.portal();
    let driver = ctx.driver;

    ctx.pacer.pause(Pause::Action).await;

    // SEARCHING: type the application label into the global search.
    driver
        .wait_for(&portal.search_input, ctx.waits().element())
        .await?;
    driver.click(&portal.search_input).await?;
    ctx.pacer.pause(Pause::Action).await;
    driver.clear(&portal.search_input).await?;
    ctx.pacer
        .type_human(driver, &portal.search_input, &portal.app_label)
        .await?;
    ctx.pacer.pause(Pause::Settle).await;

    // RESULT_FOUND: the first result must actually be the application.
    // Search ranking varies, so a mismatch is a retry, not a hard error.
    match driver
        .wait_for(&portal.search_result, ctx.waits().element())
        .await
    {
        Ok(()) => {}
        Err(DriverError::Timeout { .. }) => {
            debug!("search produced no result");
            return Ok(Attempt::Retry);
        }
        Err(err) => return Err(err.into()),
    }
    let result_text = driver.read_text(&portal.search_result).await?;
    if !result_text.contains(&portal.app_result_text) {
        warn!(result = %result_text, "first search result is not the statement application");
        return Ok(Attempt::Retry);
    }

    // TAB_OPENED: clicking the result must open exactly one new tab.
    let tabs_before = driver.list_tabs().await?.len();
    ctx.pacer.pause(Pause::Action).await;
    driver.click(&portal.search_result).await?;
    ctx.pacer.pause(Pause::Settle).await;

    let tabs = driver.list_tabs().await?;
    if tabs.len() <= tabs_before {
        warn!("no new tab opened for the statement application");
        return Ok(Attempt::Retry);
    }
    let Some(newest) = tabs.last() else {
        return Ok(Attempt::Retry);
    };
    driver.switch_to(newest).await?;
    ctx.pacer.pause(Pause::Settle).await;

    // Classify what the new tab landed on.
    match ctx.markers().classify(&driver.body_text().await?) {
        Some(AuthFailure::HardCollision) => {
            // The secondary tab lost the session race; a fresh open
            // usually wins once the race clears.
            warn!("authentication collision in the new tab; closing it and retrying");
            driver.close_active().await?;
            focus_primary(driver).await?;
            ctx.pacer.pause(Pause::Recovery).await;
            return Ok(Attempt::Retry);
        }
        Some(AuthFailure::LocalizedTransient) => {
            warn!("transient authentication error; refreshing the tab");
            refresh_tab(ctx).await?;
            ctx.pacer.pause(Pause::Recovery).await;

            if ctx.markers().classify(&driver.body_text().await?).is_some() {
                warn!("error persists after refresh; closing the tab and retrying");
                driver.close_active().await?;
                focus_primary(driver).await?;
                ctx.pacer.pause(Pause::Recovery).await;
                return Ok(Attempt::Retry);
            }
        }
        None => {}
    }

    popup::dismiss_notice(ctx).await?;
    Ok(Attempt::Opened)
}

/// Refresh the active tab, preferring the in-page refresh control. A
/// driver-level reload can re-trigger the authentication race, so it is
/// only the fallback.
async fn refresh_tab(ctx: &PortalCtx<'_>) -> Result<()> {
    if let Some(control) = &ctx.portal().refresh_control {
        match ctx.driver.click(control).await {
            Ok(()) => {
                debug!("clicked in-page refresh control");
                return Ok(());
            }
            Err(err) => {
                debug!(error = %err, "refresh control unavailable; falling back to reload");
            }
        }
    }
    ctx.driver.refresh().await?;
    Ok(())
}
