// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed settings for the ad cache (attachment policy + diagnostics sizing).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persisted settings for one cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheSettings {
    /// Reparenting policy.
    pub attachment: AttachmentSettings,
    /// Diagnostic log sizing.
    pub diagnostics: DiagnosticSettings,
}

/// How hard the controller tries before reporting an attachment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentMode {
    /// Retry detachment, force-detach, then fall back to a wrapper.
    #[default]
    BestEffort,
    /// One detach request, no forced detach, no wrapper: the first failure is terminal.
    FailFast,
}

/// Reparenting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentSettings {
    /// Best-effort or fail-fast.
    pub mode: AttachmentMode,
    /// Detach requests before giving up (best-effort only; fail-fast makes one).
    pub max_detach_attempts: u32,
    /// Pause between detach attempts; 0 means a bare cooperative yield.
    pub detach_retry_delay_ms: u64,
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            mode: AttachmentMode::BestEffort,
            max_detach_attempts: 3,
            detach_retry_delay_ms: 0,
        }
    }
}

impl AttachmentSettings {
    /// Pause between detach attempts.
    pub fn detach_retry_delay(&self) -> Duration {
        Duration::from_millis(self.detach_retry_delay_ms)
    }

    /// Detach attempts actually allowed under the current mode.
    pub fn effective_detach_attempts(&self) -> u32 {
        match self.mode {
            AttachmentMode::BestEffort => self.max_detach_attempts,
            AttachmentMode::FailFast => 1,
        }
    }
}

/// Diagnostic log sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticSettings {
    /// Maximum retained entries.
    pub capacity: usize,
    /// Identical entries within this window are merged.
    pub dedupe_window_ms: u64,
}

impl Default for DiagnosticSettings {
    fn default() -> Self {
        Self {
            capacity: 64,
            dedupe_window_ms: 500,
        }
    }
}
