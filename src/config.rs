use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classify::FailureMarkers;
use crate::timing::TimingPolicy;

fn default_export_suffix() -> String {
    "pantalla inicial sct.xlsx".to_string()
}

fn default_export_extension() -> String {
    ".xlsx".to_string()
}

/// Browser launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromeConfig {
    /// Explicit Chrome/Chromium executable. Probed from well-known
    /// locations when unset.
    pub executable: Option<String>,

    /// Run without a visible window. The portal is more suspicious of
    /// headless sessions, so this defaults to off.
    pub headless: bool,

    /// Persistent profile directory. A fresh temporary profile is used
    /// when unset.
    pub profile_dir: Option<PathBuf>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: false,
            profile_dir: None,
        }
    }
}

/// Portal URLs, element selectors, and the sub-application identity.
///
/// Everything the flows match against the live page lives here, so a
/// portal markup change is a config edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,

    /// Label typed into the portal's global search control.
    pub app_label: String,
    /// Text the first search result must contain.
    pub app_result_text: String,

    pub username_input: String,
    pub next_button: String,
    pub password_input: String,
    pub login_button: String,

    pub search_input: String,
    pub search_result: String,

    pub popup_close: String,

    pub contributor_select: String,
    /// Selector scanned for the form-resubmission confirmation control.
    pub resubmit_button: String,
    /// Visible labels accepted as the confirmation control.
    pub resubmit_labels: Vec<String>,

    /// Optional in-page refresh control, preferred over a driver-level
    /// reload because the latter can re-trigger the authentication race.
    pub refresh_control: Option<String>,

    pub export_button: String,

    pub user_menu: String,
    pub logout_button: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://auth.afip.gob.ar/contribuyente_/login.xhtml".to_string(),
            app_label: "SISTEMA DE CUENTAS TRIBUTARIAS".to_string(),
            app_result_text: "Sistema de Cuentas Tributarias".to_string(),
            username_input: "[id='F1:username']".to_string(),
            next_button: "[id='F1:btnSiguiente']".to_string(),
            password_input: "[id='F1:password']".to_string(),
            login_button: "[id='F1:btnIngresar']".to_string(),
            search_input: "#buscadorInput".to_string(),
            search_result: "#rbt-menu-item-0".to_string(),
            popup_close: "#noticias > div > a".to_string(),
            contributor_select: "#cuitForm select[name='$PropertySelection']".to_string(),
            resubmit_button: "button".to_string(),
            resubmit_labels: vec!["Continuar".to_string(), "Continue".to_string()],
            refresh_control: Some("button[title='Actualizar']".to_string()),
            export_button: "#DataTables_Table_0_wrapper > div:nth-of-type(1) > a:nth-of-type(2)"
                .to_string(),
            user_menu: "#userIconoChico".to_string(),
            logout_button: "#contBtnContribuyente > div:nth-of-type(6) button".to_string(),
        }
    }
}

/// Per-operation attempt bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Top-level attempts to open the statement application.
    pub navigation_attempts: u32,
    /// Attempts to close the notice popup.
    pub popup_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            navigation_attempts: 3,
            popup_attempts: 3,
        }
    }
}

/// Explicit wait timeouts, in seconds, by operation criticality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Elements the flow cannot proceed without.
    pub element_secs: u64,
    /// The notice popup's close control.
    pub popup_secs: u64,
    /// Confirming the popup actually closed.
    pub popup_confirm_secs: u64,
    /// The form-resubmission confirmation dialog.
    pub resubmit_secs: u64,
    /// A triggered download appearing in the watched directory.
    pub download_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            element_secs: 20,
            popup_secs: 5,
            popup_confirm_secs: 2,
            resubmit_secs: 3,
            download_secs: 60,
        }
    }
}

impl WaitConfig {
    pub fn element(&self) -> Duration {
        Duration::from_secs(self.element_secs)
    }

    pub fn popup(&self) -> Duration {
        Duration::from_secs(self.popup_secs)
    }

    pub fn popup_confirm(&self) -> Duration {
        Duration::from_secs(self.popup_confirm_secs)
    }

    pub fn resubmit(&self) -> Duration {
        Duration::from_secs(self.resubmit_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the account roster. If relative, resolved from the config
    /// file location. Defaults to `accounts.toml` next to the config.
    pub accounts_file: Option<PathBuf>,

    /// Directory watched for exported files. Defaults to the user's
    /// download directory.
    pub download_dir: Option<PathBuf>,

    /// Suffix appended to `{contributor_id}_` when renaming an export.
    #[serde(default = "default_export_suffix")]
    pub export_suffix: String,

    /// Extension a downloaded artifact must carry.
    #[serde(default = "default_export_extension")]
    pub export_extension: String,

    #[serde(default)]
    pub chrome: ChromeConfig,

    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub markers: FailureMarkers,

    #[serde(default)]
    pub timing: TimingPolicy,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub waits: WaitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts_file: None,
            download_dir: None,
            export_suffix: default_export_suffix(),
            export_extension: default_export_extension(),
            chrome: ChromeConfig::default(),
            portal: PortalConfig::default(),
            markers: FailureMarkers::default(),
            timing: TimingPolicy::default(),
            retry: RetryConfig::default(),
            waits: WaitConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn resolve_path(base: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub accounts_file: PathBuf,
    pub download_dir: PathBuf,
    pub export_suffix: String,
    pub export_extension: String,
    pub chrome: ChromeConfig,
    pub portal: PortalConfig,
    pub markers: FailureMarkers,
    pub timing: TimingPolicy,
    pub retry: RetryConfig,
    pub waits: WaitConfig,
}

/// Default download root when the config does not name one.
fn default_download_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::download_dir() {
        return Ok(dir);
    }
    let base = dirs::data_dir().context("Could not find a data directory")?;
    Ok(base.join("sct-export").join("downloads"))
}

impl ResolvedConfig {
    /// Load and resolve config from a file path. Relative paths are
    /// resolved against the config file's parent directory.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Self::resolve(config, config_dir)
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            let config_dir = if config_path.is_relative() {
                std::env::current_dir().context("Failed to get current directory")?
            } else {
                config_path
                    .parent()
                    .context("Config path has no parent directory")?
                    .to_path_buf()
            };
            Self::resolve(Config::default(), &config_dir)
        }
    }

    fn resolve(config: Config, config_dir: &Path) -> Result<Self> {
        let accounts_file = config
            .accounts_file
            .as_deref()
            .map(|p| Config::resolve_path(config_dir, p))
            .unwrap_or_else(|| config_dir.join("accounts.toml"));

        let download_dir = match config.download_dir.as_deref() {
            Some(p) => Config::resolve_path(config_dir, p),
            None => default_download_dir()?,
        };

        let mut chrome = config.chrome;
        chrome.profile_dir = chrome
            .profile_dir
            .as_deref()
            .map(|p| Config::resolve_path(config_dir, p));

        Ok(Self {
            accounts_file,
            download_dir,
            export_suffix: config.export_suffix,
            export_extension: config.export_extension,
            chrome,
            portal: config.portal,
            markers: config.markers,
            timing: config.timing,
            retry: config.retry,
            waits: config.waits,
        })
    }
}
