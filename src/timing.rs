//! Randomized pacing for portal interaction.
//!
//! The portal watches for mechanical input, so every keystroke and state
//! transition is spaced with a randomized delay. The ranges are a
//! configurable policy rather than inline constants; tests swap in
//! [`TimingPolicy::instant`] to run without sleeping.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::driver::{Driver, DriverResult};

/// An inclusive millisecond range a delay is sampled from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Sample a duration from the range. The RNG is used synchronously and
    /// never held across an await point.
    pub fn sample(&self) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// Delay classes for non-keystroke pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    /// Before interacting with an element.
    Action,
    /// After a state transition, while the page settles.
    Settle,
    /// After an action that triggers a full page load.
    PageLoad,
    /// After a recovery step, giving the portal time to clear.
    Recovery,
}

/// Per-class delay ranges applied to all portal interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingPolicy {
    /// Delay before each keystroke.
    pub keystroke: DelayRange,
    /// Occasional longer pause while typing.
    pub keystroke_pause: DelayRange,
    /// Probability of the longer pause after a keystroke.
    pub keystroke_pause_chance: f64,
    pub action: DelayRange,
    pub settle: DelayRange,
    pub page_load: DelayRange,
    pub recovery: DelayRange,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self::human()
    }
}

impl TimingPolicy {
    /// Human-looking defaults.
    pub fn human() -> Self {
        Self {
            keystroke: DelayRange::new(50, 150),
            keystroke_pause: DelayRange::new(100, 300),
            keystroke_pause_chance: 0.2,
            action: DelayRange::new(300, 600),
            settle: DelayRange::new(1_500, 3_000),
            page_load: DelayRange::new(2_000, 4_000),
            recovery: DelayRange::new(3_000, 5_000),
        }
    }

    /// Zero every range. Used by tests.
    pub fn instant() -> Self {
        Self {
            keystroke: DelayRange::new(0, 0),
            keystroke_pause: DelayRange::new(0, 0),
            keystroke_pause_chance: 0.0,
            action: DelayRange::new(0, 0),
            settle: DelayRange::new(0, 0),
            page_load: DelayRange::new(0, 0),
            recovery: DelayRange::new(0, 0),
        }
    }

    fn range_for(&self, pause: Pause) -> DelayRange {
        match pause {
            Pause::Action => self.action,
            Pause::Settle => self.settle,
            Pause::PageLoad => self.page_load,
            Pause::Recovery => self.recovery,
        }
    }
}

/// Applies a [`TimingPolicy`] to driver interaction.
#[derive(Debug, Clone)]
pub struct Pacer {
    policy: TimingPolicy,
}

impl Pacer {
    pub fn new(policy: TimingPolicy) -> Self {
        Self { policy }
    }

    pub async fn pause(&self, pause: Pause) {
        tokio::time::sleep(self.policy.range_for(pause).sample()).await;
    }

    /// Type `text` into `selector` one character at a time, with a
    /// randomized delay per keystroke and occasional longer pauses.
    pub async fn type_human(
        &self,
        driver: &dyn Driver,
        selector: &str,
        text: &str,
    ) -> DriverResult<()> {
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            tokio::time::sleep(self.policy.keystroke.sample()).await;
            driver.type_text(selector, ch.encode_utf8(&mut buf)).await?;
            if self.thinking_pause() {
                tokio::time::sleep(self.policy.keystroke_pause.sample()).await;
            }
        }
        Ok(())
    }

    fn thinking_pause(&self) -> bool {
        self.policy.keystroke_pause_chance > 0.0
            && rand::thread_rng().gen_bool(self.policy.keystroke_pause_chance.clamp(0.0, 1.0))
    }
}
