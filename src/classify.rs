//! Classifies authentication failures surfaced in a freshly opened tab.
//!
//! The portal loses an authentication race in two observably different
//! ways, and each one needs a different recovery. The marker strings are
//! configuration data, not control flow, so a portal-side wording change
//! is a config edit rather than a code change.

use serde::{Deserialize, Serialize};

/// The two classes of authentication failure a new tab can land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The tab's session token collided with an already-present
    /// authentication. The tab is unusable; close it and reopen.
    HardCollision,
    /// A retryable server-side hiccup rendered as a human-readable
    /// message. A refresh of the same tab usually clears it.
    LocalizedTransient,
}

/// Substring markers that identify each failure class in page body text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureMarkers {
    /// All of these must be present for a hard collision.
    pub hard_collision: Vec<String>,
    /// Any one of these identifies a localized transient error.
    pub localized_transient: Vec<String>,
}

impl Default for FailureMarkers {
    fn default() -> Self {
        Self {
            hard_collision: vec![
                "HTTP Status 401".to_string(),
                "AUTHENTICATION_ALREADY_PRESENT".to_string(),
            ],
            localized_transient: vec![
                "Ha ocurrido un error al autenticar".to_string(),
                "intente nuevamente".to_string(),
            ],
        }
    }
}

impl FailureMarkers {
    /// Classify a page body. Hard collision wins when both classes match.
    pub fn classify(&self, body: &str) -> Option<AuthFailure> {
        if !self.hard_collision.is_empty()
            && self.hard_collision.iter().all(|m| body.contains(m))
        {
            return Some(AuthFailure::HardCollision);
        }
        if self.localized_transient.iter().any(|m| body.contains(m)) {
            return Some(AuthFailure::LocalizedTransient);
        }
        None
    }
}
