//! [`CooldownController`] – per-label repetition suppression.
//!
//! Keeps the narrator from repeating the same object name forever. Each label
//! carries a spoken `count` and the time it was `last_spoken`. Once a label
//! has been spoken `max_repeat` times it is silenced until `cooldown` has
//! elapsed since its last narration. The count is never reset; after the
//! window passes the label may be spoken once more, which opens a new window.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeSet;
//!
//! use chrono::{DateTime, TimeDelta, Utc};
//! use sightline_runtime::cooldown::{CooldownController, CooldownPolicy};
//!
//! let policy = CooldownPolicy::new(2, 600).unwrap();
//! let mut cooldown = CooldownController::new(policy);
//! let t0 = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000);
//! let labels = BTreeSet::from(["person".to_string()]);
//!
//! assert!(cooldown.should_speak_at("person", &labels, t0));
//! cooldown.mark_spoken_at("person", t0);
//! cooldown.mark_spoken_at("person", t0 + TimeDelta::seconds(5));
//! assert!(!cooldown.should_speak_at("person", &labels, t0 + TimeDelta::seconds(10)));
//! assert!(cooldown.should_speak_at("person", &labels, t0 + TimeDelta::seconds(610)));
//! ```

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use sightline_types::SightError;
use tracing::debug;

/// Tunables for a [`CooldownController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    /// Narrations allowed before the cooldown window applies.
    pub max_repeat: u32,
    /// Minimum quiet time after the last narration once `max_repeat` is hit.
    pub cooldown: TimeDelta,
}

impl CooldownPolicy {
    pub fn new(max_repeat: u32, cooldown_seconds: u64) -> Result<Self, SightError> {
        let cooldown = i64::try_from(cooldown_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| SightError::Config(format!("cooldown of {cooldown_seconds}s is out of range")))?;
        Ok(Self { max_repeat, cooldown })
    }
}

/// Narration history of one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelState {
    pub count: u32,
    pub last_spoken: DateTime<Utc>,
}

impl Default for LabelState {
    /// A label never spoken: zero count, last spoken at the Unix epoch.
    fn default() -> Self {
        Self {
            count: 0,
            last_spoken: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Decides whether a detected label may be narrated now.
pub struct CooldownController {
    policy: CooldownPolicy,
    labels: HashMap<String, LabelState>,
}

impl CooldownController {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            labels: HashMap::new(),
        }
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    /// [`should_speak_at`](Self::should_speak_at) against the wall clock.
    pub fn should_speak(&self, label: &str, current_labels: &BTreeSet<String>) -> bool {
        self.should_speak_at(label, current_labels, Utc::now())
    }

    /// `false` only when `label` has reached `max_repeat` and its last
    /// narration is less than `cooldown` before `now`.
    ///
    /// `current_labels` is the distinct label set of the frame being
    /// narrated. Suppression applies whether the label is seen alone or
    /// alongside others.
    pub fn should_speak_at(&self, label: &str, current_labels: &BTreeSet<String>, now: DateTime<Utc>) -> bool {
        let state = self.state(label);
        let elapsed = now - state.last_spoken;
        let suppressed = state.count >= self.policy.max_repeat && elapsed < self.policy.cooldown;
        if suppressed {
            debug!(
                label,
                count = state.count,
                elapsed_s = elapsed.num_seconds(),
                in_frame = current_labels.len(),
                "label in cooldown"
            );
        }
        !suppressed
    }

    /// [`mark_spoken_at`](Self::mark_spoken_at) against the wall clock.
    pub fn mark_spoken(&mut self, label: &str) {
        self.mark_spoken_at(label, Utc::now());
    }

    /// Record a successful narration of `label` at `now`.
    pub fn mark_spoken_at(&mut self, label: &str, now: DateTime<Utc>) {
        let state = self.labels.entry(label.to_string()).or_default();
        state.count = state.count.saturating_add(1);
        state.last_spoken = now;
    }

    /// Current record for `label` (the default for labels never spoken).
    pub fn state(&self, label: &str) -> LabelState {
        self.labels.get(label).copied().unwrap_or_default()
    }
}
