//! Two-step portal login and logout.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::timing::Pause;

use super::PortalCtx;

/// Authenticate `login_id` on the portal's login page.
///
/// The login form asks for the identity first and reveals the password
/// field after a confirmation click. Both fields are typed with the
/// human-pacing policy.
pub async fn login(ctx: &PortalCtx<'_>, login_id: &str, secret: &SecretString) -> Result<()> {
    let portal = ctx.portal();
    let driver = ctx.driver;
    info!(login = login_id, "logging in");

    driver
        .wait_for(&portal.username_input, ctx.waits().element())
        .await
        .context("login form did not appear")?;
    driver.clear(&portal.username_input).await?;
    ctx.pacer
        .type_human(driver, &portal.username_input, login_id)
        .await?;
    ctx.pacer.pause(Pause::Action).await;

    driver
        .wait_for(&portal.next_button, ctx.waits().element())
        .await?;
    driver.click(&portal.next_button).await?;
    ctx.pacer.pause(Pause::Settle).await;

    driver
        .wait_for(&portal.password_input, ctx.waits().element())
        .await
        .context("password field did not appear")?;
    driver.clear(&portal.password_input).await?;
    ctx.pacer
        .type_human(driver, &portal.password_input, secret.expose_secret())
        .await?;
    ctx.pacer.pause(Pause::Action).await;

    driver
        .wait_for(&portal.login_button, ctx.waits().element())
        .await?;
    driver.click(&portal.login_button).await?;
    ctx.pacer.pause(Pause::PageLoad).await;

    Ok(())
}

/// End the authenticated session through the portal's user menu.
pub async fn logout(ctx: &PortalCtx<'_>) -> Result<()> {
    let portal = ctx.portal();
    let driver = ctx.driver;
    info!("logging out");

    driver
        .wait_for(&portal.user_menu, ctx.waits().element())
        .await
        .context("user menu did not appear")?;
    driver.click(&portal.user_menu).await?;
    ctx.pacer.pause(Pause::Settle).await;

    driver
        .wait_for(&portal.logout_button, ctx.waits().element())
        .await
        .context("logout control did not appear")?;
    driver.click(&portal.logout_button).await?;
    ctx.pacer.pause(Pause::PageLoad).await;

    Ok(())
}
