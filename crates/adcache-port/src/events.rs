// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Raw callbacks a renderable delivers through its listener slots.

use std::sync::Arc;

/// Lifecycle callback delivered through the lifecycle slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The renderable (re)loaded content.
    Loaded,
    /// The renderable failed to load content.
    FailedToLoad {
        /// Numeric code reported by the ad network.
        code: i32,
        /// Network-supplied message.
        message: String,
    },
    /// The ad opened an overlay.
    Opened,
    /// The overlay closed and the user is returning to the app.
    Closed,
    /// An impression was recorded.
    Impression,
    /// A click was recorded.
    Clicked,
}

/// Monetization callback delivered through the paid slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaidEvent {
    /// Revenue in micro-units of `currency_code`.
    pub value_micros: i64,
    /// Precision type reported by the network (0 unknown .. 3 precise).
    pub precision: u8,
    /// ISO 4217 currency code.
    pub currency_code: String,
}

/// Application-defined named event (managed requests only).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppEvent {
    /// Event name.
    pub name: String,
    /// Optional event payload.
    pub data: Option<String>,
}

/// Listener installed in a renderable's lifecycle slot.
pub type LifecycleListener = Arc<dyn Fn(LifecycleEvent) + Send + Sync>;
/// Listener installed in a renderable's paid slot.
pub type PaidListener = Arc<dyn Fn(PaidEvent) + Send + Sync>;
/// Listener installed in a renderable's app-event slot.
pub type AppEventListener = Arc<dyn Fn(AppEvent) + Send + Sync>;
