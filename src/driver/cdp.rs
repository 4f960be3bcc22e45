//! Chrome DevTools Protocol driver over chromiumoxide.
//!
//! One launched browser, one ordered tab list. The first tab created at
//! launch is the primary tab; tabs the portal opens afterwards are
//! appended in discovery order, which matches the single-tab-at-a-time
//! flows this crate runs.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, ReloadParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ChromeConfig;

use super::{Driver, DriverError, DriverResult, TabHandle};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Hides the automation flag the portal's scripts look for.
const STEALTH_JS: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

struct TabState {
    /// Target ids in tab order, primary first.
    order: Vec<String>,
    pages: HashMap<String, Page>,
    active: String,
}

/// [`Driver`] backed by a launched Chrome/Chromium instance.
pub struct CdpDriver {
    browser: Browser,
    tabs: Mutex<TabState>,
    handler_task: JoinHandle<()>,
}

impl CdpDriver {
    /// Launch the browser and open the primary tab.
    ///
    /// Failure here is fatal to the run: no accounts are processed
    /// without a working browser.
    pub async fn launch(chrome: &ChromeConfig, download_dir: &Path) -> Result<Self> {
        let executable = match &chrome.executable {
            Some(path) => path.clone(),
            None => find_chrome().context(
                "Chrome/Chromium not found. Install Chrome or set chrome.executable in the config.",
            )?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(executable)
            .viewport(None)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if !chrome.headless {
            builder = builder.with_head();
        }
        if let Some(profile) = &chrome.profile_dir {
            std::fs::create_dir_all(profile).with_context(|| {
                format!("Failed to create profile dir: {}", profile.display())
            })?;
            builder = builder.user_data_dir(profile);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open the primary tab")?;

        let stealth = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(STEALTH_JS)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build stealth script params: {e}"))?;
        page.execute(stealth)
            .await
            .context("Failed to install stealth script")?;

        std::fs::create_dir_all(download_dir).with_context(|| {
            format!("Failed to create download dir: {}", download_dir.display())
        })?;
        let downloads = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.display().to_string())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build download params: {e}"))?;
        page.execute(downloads)
            .await
            .context("Failed to set download behavior")?;

        let id = page.target_id().inner().clone();
        let tabs = TabState {
            order: vec![id.clone()],
            pages: HashMap::from([(id.clone(), page)]),
            active: id,
        };

        Ok(Self {
            browser,
            tabs: Mutex::new(tabs),
            handler_task,
        })
    }

    /// Close the browser and stop the CDP handler task.
    pub async fn shutdown(mut self) {
        let _ = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }

    async fn active_page(&self) -> DriverResult<Page> {
        let state = self.tabs.lock().await;
        state
            .pages
            .get(&state.active)
            .cloned()
            .ok_or_else(|| DriverError::Browser("active tab no longer exists".to_string()))
    }

    /// Reconcile the tab list with the browser's current targets. Known
    /// tabs keep their position; new targets are appended.
    async fn sync_tabs(&self) -> DriverResult<Vec<TabHandle>> {
        let pages = self.browser.pages().await.map_err(to_driver_err)?;

        let mut current: HashMap<String, Page> = HashMap::new();
        let mut discovered: Vec<String> = Vec::with_capacity(pages.len());
        for page in pages {
            let id = page.target_id().inner().clone();
            discovered.push(id.clone());
            current.insert(id, page);
        }

        let mut state = self.tabs.lock().await;
        let mut order: Vec<String> = state
            .order
            .iter()
            .filter(|id| current.contains_key(*id))
            .cloned()
            .collect();
        for id in discovered {
            if !order.contains(&id) {
                order.push(id);
            }
        }

        state.order = order;
        state.pages = current;
        if !state.pages.contains_key(&state.active) {
            if let Some(first) = state.order.first() {
                state.active = first.clone();
            }
        }

        Ok(state.order.iter().map(TabHandle::new).collect())
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, js: String) -> DriverResult<T> {
        let page = self.active_page().await?;
        let result = page.evaluate(js).await.map_err(to_driver_err)?;
        result
            .into_value::<T>()
            .map_err(|e| DriverError::Browser(format!("unexpected evaluation result: {e}")))
    }
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

fn to_driver_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Browser(e.to_string())
}

/// Encode a selector as a JS string literal.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl Driver for CdpDriver {
    async fn open(&self, url: &str) -> DriverResult<()> {
        let page = self.active_page().await?;
        page.goto(url).await.map_err(to_driver_err)?;
        Ok(())
    }

    async fn refresh(&self) -> DriverResult<()> {
        let page = self.active_page().await?;
        page.execute(ReloadParams::default())
            .await
            .map_err(to_driver_err)?;
        Ok(())
    }

    async fn list_tabs(&self) -> DriverResult<Vec<TabHandle>> {
        self.sync_tabs().await
    }

    async fn switch_to(&self, tab: &TabHandle) -> DriverResult<()> {
        self.sync_tabs().await?;
        let page = {
            let mut state = self.tabs.lock().await;
            let page = state
                .pages
                .get(tab.id())
                .cloned()
                .ok_or_else(|| DriverError::UnknownTab(tab.id().to_string()))?;
            state.active = tab.id().to_string();
            page
        };
        page.bring_to_front().await.map_err(to_driver_err)?;
        Ok(())
    }

    async fn close_active(&self) -> DriverResult<()> {
        let page = {
            let mut state = self.tabs.lock().await;
            let active = state.active.clone();
            let page = state
                .pages
                .remove(&active)
                .ok_or_else(|| DriverError::Browser("active tab no longer exists".to_string()))?;
            state.order.retain(|id| id != &active);
            if let Some(first) = state.order.first() {
                state.active = first.clone();
            }
            page
        };
        page.close().await.map_err(to_driver_err)?;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> DriverResult<bool> {
        let page = self.active_page().await?;
        Ok(page.find_element(selector).await.is_ok())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let start = Instant::now();
        loop {
            if self.exists(selector).await? {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(DriverError::Timeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let page = self.active_page().await?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        element.click().await.map_err(to_driver_err)?;
        Ok(())
    }

    async fn click_matching(&self, selector: &str, needle: &str) -> DriverResult<bool> {
        let js = format!(
            r#"(function() {{
                const needle = {needle};
                for (const el of document.querySelectorAll({selector})) {{
                    const text = el.innerText || el.textContent || '';
                    if (text.includes(needle)) {{ el.click(); return true; }}
                }}
                return false;
            }})()"#,
            needle = js_str(needle),
            selector = js_str(selector),
        );
        self.evaluate::<bool>(js).await
    }

    async fn clear(&self, selector: &str) -> DriverResult<()> {
        let js = format!(
            r#"(function() {{
                const el = document.querySelector({selector});
                if (!el) return false;
                el.value = '';
                return true;
            }})()"#,
            selector = js_str(selector),
        );
        if self.evaluate::<bool>(js).await? {
            Ok(())
        } else {
            Err(DriverError::NotFound(selector.to_string()))
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()> {
        let page = self.active_page().await?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        element.focus().await.map_err(to_driver_err)?;
        element.type_str(text).await.map_err(to_driver_err)?;
        Ok(())
    }

    async fn read_text(&self, selector: &str) -> DriverResult<String> {
        let page = self.active_page().await?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        let text = element.inner_text().await.map_err(to_driver_err)?;
        Ok(text.unwrap_or_default())
    }

    async fn body_text(&self) -> DriverResult<String> {
        self.evaluate::<String>(
            "(function() { return document.body ? document.body.innerText : ''; })()".to_string(),
        )
        .await
    }

    async fn option_texts(&self, selector: &str) -> DriverResult<Vec<String>> {
        let js = format!(
            r#"(function() {{
                const sel = document.querySelector({selector});
                if (!sel) return [];
                return Array.from(sel.options).map(o => (o.textContent || '').trim());
            }})()"#,
            selector = js_str(selector),
        );
        self.evaluate::<Vec<String>>(js).await
    }

    async fn selected_option(&self, selector: &str) -> DriverResult<Option<String>> {
        let js = format!(
            r#"(function() {{
                const sel = document.querySelector({selector});
                if (!sel || sel.selectedIndex < 0) return null;
                const option = sel.options[sel.selectedIndex];
                return option ? (option.textContent || '').trim() : null;
            }})()"#,
            selector = js_str(selector),
        );
        self.evaluate::<Option<String>>(js).await
    }

    async fn select_by_text(&self, selector: &str, needle: &str) -> DriverResult<bool> {
        // Matches on option markup, which can differ from the rendered
        // text the positional fallback scans.
        let js = format!(
            r#"(function() {{
                const sel = document.querySelector({selector});
                if (!sel) return false;
                const needle = {needle};
                for (let i = 0; i < sel.options.length; i++) {{
                    const option = sel.options[i];
                    const markup = option.innerHTML || option.textContent || '';
                    if (markup.includes(needle)) {{
                        sel.selectedIndex = i;
                        sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            selector = js_str(selector),
            needle = js_str(needle),
        );
        self.evaluate::<bool>(js).await
    }

    async fn select_by_index(&self, selector: &str, index: usize) -> DriverResult<()> {
        let js = format!(
            r#"(function() {{
                const sel = document.querySelector({selector});
                if (!sel || {index} >= sel.options.length) return false;
                sel.selectedIndex = {index};
                sel.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            selector = js_str(selector),
            index = index,
        );
        if self.evaluate::<bool>(js).await? {
            Ok(())
        } else {
            Err(DriverError::NotFound(format!(
                "option {index} of `{selector}`"
            )))
        }
    }
}

/// Find a Chrome/Chromium executable.
fn find_chrome() -> Option<String> {
    for name in ["google-chrome", "chromium"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
    }
    None
}
