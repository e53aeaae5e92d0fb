// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded diagnostic log with a dedupe window.
//!
//! The attachment controller records degraded reparenting here (detach
//! give-ups, forced detaches, wrapper fallbacks) so hosts can surface them
//! without scraping logs.

use crate::settings::DiagnosticSettings;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// Informational note.
    Info,
    /// Degraded but recovered.
    Warn,
    /// Operation failed.
    Error,
}

/// Identifier for a diagnostic entry.
pub type DiagnosticId = u64;

/// One recorded incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable identifier.
    pub id: DiagnosticId,
    /// Severity.
    pub level: DiagnosticLevel,
    /// Container the incident concerns (host tag), if any.
    pub container: Option<u64>,
    /// Short title line.
    pub title: String,
    /// Optional details.
    pub body: Option<String>,
    /// How many times this entry was recorded inside the dedupe window.
    pub occurrences: u32,
    /// Last time it was recorded.
    pub at: Instant,
}

/// In-memory diagnostic queue.
#[derive(Debug)]
pub struct DiagnosticLog {
    queue: VecDeque<Diagnostic>,
    capacity: usize,
    dedupe_window: Duration,
    next_id: DiagnosticId,
}

impl DiagnosticLog {
    /// Create a log from settings.
    pub fn new(settings: DiagnosticSettings) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: settings.capacity.max(1),
            dedupe_window: Duration::from_millis(settings.dedupe_window_ms),
            next_id: 1,
        }
    }

    /// Record an incident, merging with an identical entry seen within the
    /// dedupe window. Evicts the oldest entry when full.
    pub fn record<T, B>(
        &mut self,
        level: DiagnosticLevel,
        container: Option<u64>,
        title: T,
        body: B,
        now: Instant,
    ) -> DiagnosticId
    where
        T: Into<String>,
        B: Into<Option<String>>,
    {
        let title = title.into();
        let body = body.into();

        if let Some(existing) = self.queue.iter_mut().find(|d| {
            d.level == level
                && d.container == container
                && d.title == title
                && d.body == body
                && now.saturating_duration_since(d.at) <= self.dedupe_window
        }) {
            existing.at = now;
            existing.occurrences += 1;
            return existing.id;
        }

        let id = self.next_id;
        self.next_id += 1;
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(Diagnostic {
            id,
            level,
            container,
            title,
            body,
            occurrences: 1,
            at: now,
        });
        id
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &Diagnostic> {
        self.queue.iter()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        self.queue.drain(..).collect()
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DiagnosticSettings::default())
    }
}
