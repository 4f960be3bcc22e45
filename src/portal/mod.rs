//! Portal flows: login, navigation, contributor selection, export.
//!
//! Each flow borrows a [`PortalCtx`] for the duration of one call; no
//! component retains browser state across calls. Flows report success or
//! failure by value and leave tab bookkeeping in a known state before
//! returning.

pub mod contributor;
pub mod export;
pub mod login;
pub mod navigate;
pub mod popup;

use crate::classify::FailureMarkers;
use crate::config::{PortalConfig, ResolvedConfig, RetryConfig, WaitConfig};
use crate::driver::Driver;
use crate::timing::Pacer;

/// Session context lent to portal flows for one call.
pub struct PortalCtx<'a> {
    pub driver: &'a dyn Driver,
    pub config: &'a ResolvedConfig,
    pub pacer: &'a Pacer,
}

impl PortalCtx<'_> {
    pub fn portal(&self) -> &PortalConfig {
        &self.config.portal
    }

    pub fn markers(&self) -> &FailureMarkers {
        &self.config.markers
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.config.retry
    }

    pub fn waits(&self) -> &WaitConfig {
        &self.config.waits
    }
}
