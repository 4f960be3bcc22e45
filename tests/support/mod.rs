#![allow(dead_code)]

//! Scripted driver double for exercising portal flows without a browser.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sct_export::config::{Config, ResolvedConfig, WaitConfig};
use sct_export::driver::{Driver, DriverError, DriverResult, TabHandle};
use sct_export::timing::TimingPolicy;

/// Body text a cleanly opened statement tab shows.
pub const CLEAN_BODY: &str = "Sistema de Cuentas Tributarias - Estado de cuenta";

/// Body text for the hard authentication collision.
pub const COLLISION_BODY: &str = "HTTP Status 401 - AUTHENTICATION_ALREADY_PRESENT";

/// Body text for the localized transient error.
pub const TRANSIENT_BODY: &str = "Ha ocurrido un error al autenticar, intente nuevamente.";

/// Default config with instant pacing and zeroed waits.
pub fn test_config(dir: &Path) -> ResolvedConfig {
    let defaults = Config::default();
    ResolvedConfig {
        accounts_file: dir.join("accounts.toml"),
        download_dir: dir.join("downloads"),
        export_suffix: defaults.export_suffix,
        export_extension: defaults.export_extension,
        chrome: defaults.chrome,
        portal: defaults.portal,
        markers: defaults.markers,
        timing: TimingPolicy::instant(),
        retry: defaults.retry,
        waits: WaitConfig {
            element_secs: 0,
            popup_secs: 0,
            popup_confirm_secs: 0,
            resubmit_secs: 0,
            download_secs: 0,
        },
    }
}

struct Tab {
    id: String,
    body: String,
}

struct State {
    config: ResolvedConfig,
    tabs: Vec<Tab>,
    active: usize,
    next_tab_id: usize,
    opened: usize,
    log: Vec<String>,
    typed: HashMap<String, String>,
    missing: HashSet<String>,

    popup_clicks_left: u32,
    popup_visible: bool,

    result_text: String,
    open_tab_on_result: bool,
    new_tab_bodies: VecDeque<String>,
    refresh_body: Option<String>,
    fail_body_text: bool,

    options: Vec<String>,
    selected: Option<usize>,
    text_match_works: bool,

    resubmit_enabled: bool,
    resubmit_pending: bool,

    blocked_passwords: HashSet<String>,
    export_write: Option<(PathBuf, String)>,
}

/// A scripted [`Driver`] that simulates the portal's tab and element
/// behavior and records every interaction.
pub struct MockDriver {
    state: Mutex<State>,
}

impl MockDriver {
    pub fn new(config: &ResolvedConfig) -> Self {
        let state = State {
            config: config.clone(),
            tabs: vec![Tab {
                id: "tab-0".to_string(),
                body: "Portal principal".to_string(),
            }],
            active: 0,
            next_tab_id: 1,
            opened: 0,
            log: Vec::new(),
            typed: HashMap::new(),
            missing: HashSet::new(),
            popup_clicks_left: 0,
            popup_visible: false,
            result_text: config.portal.app_result_text.clone(),
            open_tab_on_result: true,
            new_tab_bodies: VecDeque::new(),
            refresh_body: None,
            fail_body_text: false,
            options: Vec::new(),
            selected: None,
            text_match_works: true,
            resubmit_enabled: false,
            resubmit_pending: false,
            blocked_passwords: HashSet::new(),
            export_write: None,
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Bodies for tabs opened from the search result, in order. Once the
    /// queue is exhausted, new tabs open clean.
    pub fn with_new_tab_bodies(self, bodies: &[&str]) -> Self {
        self.state.lock().unwrap().new_tab_bodies =
            bodies.iter().map(|b| b.to_string()).collect();
        self
    }

    /// Body the active tab shows after any refresh.
    pub fn with_refresh_body(self, body: &str) -> Self {
        self.state.lock().unwrap().refresh_body = Some(body.to_string());
        self
    }

    /// Show the notice popup; it closes after `clicks` close clicks.
    pub fn with_popup(self, clicks: u32) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.popup_visible = true;
            state.popup_clicks_left = clicks;
        }
        self
    }

    /// Show a notice popup that never closes.
    pub fn with_stubborn_popup(self) -> Self {
        self.with_popup(u32::MAX)
    }

    pub fn with_options(self, options: &[&str]) -> Self {
        self.state.lock().unwrap().options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn with_selected(self, index: usize) -> Self {
        self.state.lock().unwrap().selected = Some(index);
        self
    }

    /// Make markup-based text matching fail, forcing the positional
    /// fallback.
    pub fn without_text_match(self) -> Self {
        self.state.lock().unwrap().text_match_works = false;
        self
    }

    /// Show the form-resubmission dialog after every selection.
    pub fn with_resubmit_dialog(self) -> Self {
        self.state.lock().unwrap().resubmit_enabled = true;
        self
    }

    /// Clicking the search result no longer opens a tab.
    pub fn without_new_tabs(self) -> Self {
        self.state.lock().unwrap().open_tab_on_result = false;
        self
    }

    pub fn with_result_text(self, text: &str) -> Self {
        self.state.lock().unwrap().result_text = text.to_string();
        self
    }

    /// The password field never appears after typing this login id.
    pub fn with_blocked_password(self, login_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .blocked_passwords
            .insert(login_id.to_string());
        self
    }

    pub fn with_missing(self, selector: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .missing
            .insert(selector.to_string());
        self
    }

    /// Clicking the export control writes `name` into `dir`.
    pub fn with_export_file(self, dir: &Path, name: &str) -> Self {
        self.state.lock().unwrap().export_write = Some((dir.to_path_buf(), name.to_string()));
        self
    }

    /// Reading body text always fails.
    pub fn with_body_text_failure(self) -> Self {
        self.state.lock().unwrap().fail_body_text = true;
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|l| l.as_str() == entry)
            .count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|l| l.starts_with(prefix))
            .count()
    }

    pub fn tab_count(&self) -> usize {
        self.state.lock().unwrap().tabs.len()
    }

    pub fn active_index(&self) -> usize {
        self.state.lock().unwrap().active
    }

    /// How many secondary tabs were opened over the whole run.
    pub fn opened_tabs(&self) -> usize {
        self.state.lock().unwrap().opened
    }
}

/// Map a selector to a short label for the interaction log.
fn label(state: &State, selector: &str) -> String {
    let portal = &state.config.portal;
    let known = [
        (&portal.username_input, "username"),
        (&portal.next_button, "next"),
        (&portal.password_input, "password"),
        (&portal.login_button, "login"),
        (&portal.search_input, "search"),
        (&portal.search_result, "result"),
        (&portal.popup_close, "popup_close"),
        (&portal.contributor_select, "contributor"),
        (&portal.export_button, "export"),
        (&portal.user_menu, "user_menu"),
        (&portal.logout_button, "logout"),
    ];
    for (sel, name) in known {
        if selector == sel.as_str() {
            return name.to_string();
        }
    }
    if let Some(refresh) = &portal.refresh_control {
        if selector == refresh.as_str() {
            return "refresh_control".to_string();
        }
    }
    selector.to_string()
}

fn element_present(state: &State, selector: &str) -> bool {
    let portal = &state.config.portal;
    if state.missing.contains(selector) {
        return false;
    }
    if selector == portal.popup_close {
        return state.popup_visible;
    }
    if selector == portal.contributor_select {
        return !state.options.is_empty();
    }
    if selector == portal.password_input {
        let username = state
            .typed
            .get(portal.username_input.as_str())
            .cloned()
            .unwrap_or_default();
        return !state.blocked_passwords.contains(username.trim());
    }
    true
}

fn apply_refresh(state: &mut State) {
    if let Some(body) = state.refresh_body.clone() {
        let active = state.active;
        if let Some(tab) = state.tabs.get_mut(active) {
            tab.body = body;
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn open(&self, url: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("open:{url}"));
        Ok(())
    }

    async fn refresh(&self) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push("refresh".to_string());
        apply_refresh(&mut state);
        Ok(())
    }

    async fn list_tabs(&self) -> DriverResult<Vec<TabHandle>> {
        let state = self.state.lock().unwrap();
        Ok(state.tabs.iter().map(|t| TabHandle::new(&t.id)).collect())
    }

    async fn switch_to(&self, tab: &TabHandle) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.tabs.iter().position(|t| t.id == tab.id()) else {
            return Err(DriverError::UnknownTab(tab.id().to_string()));
        };
        state.active = index;
        state.log.push(format!("switch:{index}"));
        Ok(())
    }

    async fn close_active(&self) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.active == 0 {
            // Flows must never close the primary tab.
            state.log.push("close:primary".to_string());
            return Err(DriverError::Browser(
                "attempted to close the primary tab".to_string(),
            ));
        }
        let active = state.active;
        state.tabs.remove(active);
        state.active = 0;
        state.log.push("close_tab".to_string());
        Ok(())
    }

    async fn exists(&self, selector: &str) -> DriverResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(element_present(&state, selector))
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let state = self.state.lock().unwrap();
        if element_present(&state, selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let name = label(&state, selector);
        state.log.push(format!("click:{name}"));

        let portal = state.config.portal.clone();
        if selector == portal.popup_close && state.popup_visible {
            state.popup_clicks_left = state.popup_clicks_left.saturating_sub(1);
            if state.popup_clicks_left == 0 {
                state.popup_visible = false;
            }
        } else if selector == portal.search_result {
            if state.open_tab_on_result {
                let body = state
                    .new_tab_bodies
                    .pop_front()
                    .unwrap_or_else(|| CLEAN_BODY.to_string());
                let id = format!("tab-{}", state.next_tab_id);
                state.next_tab_id += 1;
                state.opened += 1;
                state.tabs.push(Tab { id, body });
            }
        } else if selector == portal.export_button {
            if let Some((dir, file)) = state.export_write.clone() {
                std::fs::create_dir_all(&dir).map_err(|e| DriverError::Browser(e.to_string()))?;
                std::fs::write(dir.join(file), b"xlsx")
                    .map_err(|e| DriverError::Browser(e.to_string()))?;
            }
        } else if portal.refresh_control.as_deref() == Some(selector) {
            apply_refresh(&mut state);
        }
        Ok(())
    }

    async fn click_matching(&self, _selector: &str, needle: &str) -> DriverResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.resubmit_pending {
            state.resubmit_pending = false;
            state.log.push(format!("resubmit:{needle}"));
            return Ok(true);
        }
        Ok(false)
    }

    async fn clear(&self, selector: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let name = label(&state, selector);
        state.typed.remove(selector);
        state.log.push(format!("clear:{name}"));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .typed
            .entry(selector.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn read_text(&self, selector: &str) -> DriverResult<String> {
        let state = self.state.lock().unwrap();
        if selector == state.config.portal.search_result {
            Ok(state.result_text.clone())
        } else {
            Ok(String::new())
        }
    }

    async fn body_text(&self) -> DriverResult<String> {
        let state = self.state.lock().unwrap();
        if state.fail_body_text {
            return Err(DriverError::Browser("body text unavailable".to_string()));
        }
        Ok(state
            .tabs
            .get(state.active)
            .map(|t| t.body.clone())
            .unwrap_or_default())
    }

    async fn option_texts(&self, _selector: &str) -> DriverResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.options.clone())
    }

    async fn selected_option(&self, _selector: &str) -> DriverResult<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.selected.and_then(|i| state.options.get(i).cloned()))
    }

    async fn select_by_text(&self, _selector: &str, needle: &str) -> DriverResult<bool> {
        let mut state = self.state.lock().unwrap();
        if !state.text_match_works {
            return Ok(false);
        }
        let Some(index) = state.options.iter().position(|o| o.contains(needle)) else {
            return Ok(false);
        };
        state.selected = Some(index);
        state.resubmit_pending = state.resubmit_enabled;
        state.log.push(format!("select_text:{index}"));
        Ok(true)
    }

    async fn select_by_index(&self, _selector: &str, index: usize) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        if index >= state.options.len() {
            return Err(DriverError::NotFound(format!("option {index}")));
        }
        state.selected = Some(index);
        state.resubmit_pending = state.resubmit_enabled;
        state.log.push(format!("select_index:{index}"));
        Ok(())
    }
}
