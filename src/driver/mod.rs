//! The browser capability surface the portal flows are written against.
//!
//! Flows only ever see this trait; the chromiumoxide implementation lives
//! in [`cdp`] and the test suite substitutes a scripted mock. The trait is
//! deliberately mechanical: open/switch/close tabs, locate elements, read
//! text, click, type, and wait with a timeout.

mod cdp;

pub use cdp::CdpDriver;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Opaque handle for an open tab. Index 0 of [`Driver::list_tabs`] is the
/// primary tab; higher indices are secondary tabs in opening order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabHandle(String);

impl TabHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("timed out after {timeout:?} waiting for `{selector}`")]
    Timeout { selector: String, timeout: Duration },

    #[error("element not found: `{0}`")]
    NotFound(String),

    #[error("unknown tab handle: {0}")]
    UnknownTab(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Primitive tab and element operations against one browser session.
///
/// All element addressing is by CSS selector; selectors are configuration
/// data supplied by the caller. Implementations must keep
/// [`list_tabs`](Driver::list_tabs) ordered with the primary tab first.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate the active tab.
    async fn open(&self, url: &str) -> DriverResult<()>;

    /// Reload the active tab at the driver level.
    async fn refresh(&self) -> DriverResult<()>;

    /// All open tabs, primary first, most recently opened last.
    async fn list_tabs(&self) -> DriverResult<Vec<TabHandle>>;

    /// Make `tab` the active tab.
    async fn switch_to(&self, tab: &TabHandle) -> DriverResult<()>;

    /// Close the active tab. The implementation re-points the active tab
    /// at the primary; callers still switch explicitly.
    async fn close_active(&self) -> DriverResult<()>;

    /// Whether an element currently exists in the active tab.
    async fn exists(&self, selector: &str) -> DriverResult<bool>;

    /// Poll until `selector` exists or `timeout` elapses.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> DriverResult<()>;

    async fn click(&self, selector: &str) -> DriverResult<()>;

    /// Click the first element matching `selector` whose visible text
    /// contains `needle`. `Ok(false)` when nothing matches.
    async fn click_matching(&self, selector: &str, needle: &str) -> DriverResult<bool>;

    /// Clear an input's value.
    async fn clear(&self, selector: &str) -> DriverResult<()>;

    /// Type raw text into an element. Pacing is the caller's concern.
    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()>;

    async fn read_text(&self, selector: &str) -> DriverResult<String>;

    /// Full body text of the active tab.
    async fn body_text(&self) -> DriverResult<String>;

    /// Visible texts of a select element's options, in DOM order.
    async fn option_texts(&self, selector: &str) -> DriverResult<Vec<String>>;

    /// Visible text of the currently selected option, if any.
    async fn selected_option(&self, selector: &str) -> DriverResult<Option<String>>;

    /// Select the first option whose markup text contains `needle`,
    /// firing the element's change event. `Ok(false)` when no option
    /// matches.
    async fn select_by_text(&self, selector: &str, needle: &str) -> DriverResult<bool>;

    /// Select an option by position, firing the element's change event.
    async fn select_by_index(&self, selector: &str, index: usize) -> DriverResult<()>;
}

/// Re-focus the primary tab without closing anything.
pub async fn focus_primary(driver: &dyn Driver) -> DriverResult<()> {
    let tabs = driver.list_tabs().await?;
    if let Some(primary) = tabs.first() {
        driver.switch_to(primary).await?;
    }
    Ok(())
}

/// Close every tab beyond the primary and re-focus the primary.
///
/// This is the invariant-restoring operation shared by the navigation
/// exception path, teardown fallback, and the outer catch-all: control
/// never returns upward with unexplained tabs open.
pub async fn close_secondary_tabs(driver: &dyn Driver) -> DriverResult<()> {
    loop {
        let tabs = driver.list_tabs().await?;
        let Some(last) = tabs.last() else { break };
        if tabs.len() <= 1 {
            break;
        }
        driver.switch_to(last).await?;
        driver.close_active().await?;
    }
    focus_primary(driver).await
}
