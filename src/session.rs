//! The outer loop over the account roster.
//!
//! One account at a time: login, open the statement application, select
//! the contributor, trigger the export, tear the secondary tab down, and
//! log out before the next login. Every failure class maps to a
//! per-account outcome; one bad account never stops the batch. A
//! catch-all recovery normalizes browser state (single focused primary
//! tab, back on the login page) after anything unexpected.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::accounts::AccountRecord;
use crate::config::ResolvedConfig;
use crate::driver::{close_secondary_tabs, focus_primary, Driver};
use crate::portal::{contributor, export, login, navigate, PortalCtx};
use crate::timing::{Pacer, Pause};

/// What happened to one account.
#[derive(Debug)]
pub enum AccountOutcome {
    /// Fully processed; the export landed at `file`.
    Exported { file: PathBuf },
    /// Processed, but the export did not complete.
    ExportFailed { error: String },
    /// Login failed; the account was skipped.
    SkippedLogin { error: String },
    /// The statement application could not be opened.
    SkippedNavigation,
    /// No dropdown option matched the contributor id.
    SkippedContributor,
    /// An unexpected failure; the session was reset afterwards.
    Failed { error: String },
}

impl AccountOutcome {
    pub fn describe(&self) -> String {
        match self {
            Self::Exported { file } => format!("exported {}", file.display()),
            Self::ExportFailed { error } => format!("export failed: {error}"),
            Self::SkippedLogin { error } => format!("login failed: {error}"),
            Self::SkippedNavigation => "could not open the statement application".to_string(),
            Self::SkippedContributor => "no matching contributor option".to_string(),
            Self::Failed { error } => format!("failed: {error}"),
        }
    }
}

#[derive(Debug)]
pub struct AccountReport {
    pub login_id: String,
    pub outcome: AccountOutcome,
}

/// Summary of a whole batch run.
#[derive(Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reports: Vec<AccountReport>,
}

impl RunSummary {
    pub fn exported(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, AccountOutcome::Exported { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    AccountOutcome::SkippedLogin { .. }
                        | AccountOutcome::SkippedNavigation
                        | AccountOutcome::SkippedContributor
                )
            })
            .count()
    }

    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    AccountOutcome::Failed { .. } | AccountOutcome::ExportFailed { .. }
                )
            })
            .count()
    }
}

/// Drives the batch against one browser session.
pub struct SessionRunner<'a> {
    driver: &'a dyn Driver,
    config: &'a ResolvedConfig,
    pacer: Pacer,
}

impl<'a> SessionRunner<'a> {
    pub fn new(driver: &'a dyn Driver, config: &'a ResolvedConfig) -> Self {
        let pacer = Pacer::new(config.timing.clone());
        Self {
            driver,
            config,
            pacer,
        }
    }

    fn ctx(&self) -> PortalCtx<'_> {
        PortalCtx {
            driver: self.driver,
            config: self.config,
            pacer: &self.pacer,
        }
    }

    /// Process every account in order. Only a failure to reach the login
    /// page at all aborts the run.
    pub async fn run(&self, accounts: &[AccountRecord]) -> Result<RunSummary> {
        let started_at = Utc::now();
        info!(total = accounts.len(), "starting batch");

        self.driver.open(&self.config.portal.login_url).await?;
        self.pacer.pause(Pause::PageLoad).await;

        let mut reports = Vec::with_capacity(accounts.len());
        for (index, account) in accounts.iter().enumerate() {
            info!(
                login = %account.login_id,
                position = index + 1,
                total = accounts.len(),
                "processing account"
            );

            // End the previous session before the next login. A failed
            // logout means the session state is untrustworthy, so fall
            // back to a hard reset instead.
            if index > 0 {
                if let Err(err) = login::logout(&self.ctx()).await {
                    warn!(error = %err, "logout failed; resetting to the login page");
                    self.hard_reset().await;
                }
            }

            let outcome = match self.process_account(account).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(
                        login = %account.login_id,
                        error = %err,
                        "unexpected failure; recovering session state"
                    );
                    self.recover().await;
                    AccountOutcome::Failed {
                        error: format!("{err:#}"),
                    }
                }
            };

            info!(login = %account.login_id, outcome = %outcome.describe(), "account done");
            reports.push(AccountReport {
                login_id: account.login_id.clone(),
                outcome,
            });
        }

        if !accounts.is_empty() {
            if let Err(err) = login::logout(&self.ctx()).await {
                warn!(error = %err, "final logout failed; resetting to the login page");
                self.hard_reset().await;
            }
        }

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            reports,
        };
        info!(
            exported = summary.exported(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "batch finished"
        );
        Ok(summary)
    }

    async fn process_account(&self, account: &AccountRecord) -> Result<AccountOutcome> {
        let ctx = self.ctx();

        if let Err(err) = login::login(&ctx, &account.login_id, &account.secret).await {
            warn!(login = %account.login_id, error = %err, "login failed; skipping account");
            return Ok(AccountOutcome::SkippedLogin {
                error: format!("{err:#}"),
            });
        }

        if !navigate::open_statement_app(&ctx, &account.login_id).await? {
            return Ok(AccountOutcome::SkippedNavigation);
        }

        if !contributor::select_contributor(&ctx, &account.contributor_id).await? {
            self.teardown().await;
            return Ok(AccountOutcome::SkippedContributor);
        }

        // Export failure is non-fatal: teardown still runs and the
        // account still counts as processed.
        let export =
            export::export_statement(&ctx, &account.contributor_id, &self.config.download_dir)
                .await;
        self.teardown().await;

        match export {
            Ok(file) => Ok(AccountOutcome::Exported { file }),
            Err(err) => {
                warn!(error = %err, "export failed");
                Ok(AccountOutcome::ExportFailed {
                    error: format!("{err:#}"),
                })
            }
        }
    }

    /// Close the statement tab and return to the primary tab. On any
    /// trouble, force-close everything beyond the primary so the
    /// single-tab invariant holds at this scope too.
    async fn teardown(&self) {
        let result = async {
            let tabs = self.driver.list_tabs().await?;
            if tabs.len() > 1 {
                self.driver.close_active().await?;
            }
            focus_primary(self.driver).await
        }
        .await;

        if let Err(err) = result {
            warn!(error = %err, "teardown failed; force-closing secondary tabs");
            if let Err(err) = close_secondary_tabs(self.driver).await {
                warn!(error = %err, "could not restore single-tab state");
            }
        }
        self.pacer.pause(Pause::Settle).await;
    }

    /// Catch-all recovery: drop every secondary tab and start over from
    /// the login page.
    async fn recover(&self) {
        if let Err(err) = close_secondary_tabs(self.driver).await {
            warn!(error = %err, "could not close secondary tabs during recovery");
        }
        self.hard_reset().await;
    }

    async fn hard_reset(&self) {
        if let Err(err) = self.driver.open(&self.config.portal.login_url).await {
            warn!(error = %err, "failed to reopen the login page");
        }
        self.pacer.pause(Pause::Recovery).await;
    }
}
