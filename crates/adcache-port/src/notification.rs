// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalized per-container notification delivered to the host.

use crate::{AdSize, PaidEvent};
use serde::{Deserialize, Serialize};

/// Failure codes produced by the cache itself.
///
/// Fetch-collaborator codes pass through unchanged and are not listed here.
pub mod codes {
    /// The identifier was never issued or has been released.
    pub const AD_NOT_FOUND: &str = "ad_not_found";
    /// The identifier exists but its renderable is not loaded.
    pub const CACHED_AD_NOT_READY: &str = "cached-ad-not-ready";
    /// The registry backing the controller is gone.
    pub const MODULE_UNAVAILABLE: &str = "cached-banner-module-unavailable";
    /// Every attachment strategy failed.
    pub const VIEW_ATTACHMENT_FAILED: &str = "view-attachment-failed";
    /// A request was malformed (missing unit id, sizes, ...).
    pub const INVALID_CONFIG: &str = "invalid_config";
    /// Request options failed validation.
    pub const INVALID_REQUEST_OPTIONS: &str = "invalid_request_options";
}

/// One discriminated event record, tagged on `type` when serialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// The renderable is attached and measured.
    #[serde(rename = "onAdLoaded")]
    AdLoaded {
        /// Width in density-independent units.
        width: f64,
        /// Height in density-independent units.
        height: f64,
    },
    /// Loading or attaching failed.
    #[serde(rename = "onAdFailedToLoad")]
    AdFailedToLoad {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// The ad opened an overlay.
    #[serde(rename = "onAdOpened")]
    AdOpened,
    /// The overlay closed.
    #[serde(rename = "onAdClosed")]
    AdClosed,
    /// An impression was recorded.
    #[serde(rename = "onAdImpression")]
    AdImpression,
    /// A click was recorded.
    #[serde(rename = "onAdClicked")]
    AdClicked,
    /// The ad generated revenue.
    #[serde(rename = "onPaid")]
    Paid {
        /// Revenue in currency units.
        value: f64,
        /// Precision type.
        precision: u8,
        /// ISO 4217 currency code.
        currency: String,
    },
    /// Application-defined event (managed requests only).
    #[serde(rename = "onAppEvent")]
    AppEvent {
        /// Event name.
        name: String,
        /// Optional payload.
        data: Option<String>,
    },
}

impl Notification {
    /// `onAdLoaded` for a size.
    pub fn loaded(size: AdSize) -> Self {
        Self::AdLoaded {
            width: f64::from(size.width),
            height: f64::from(size.height),
        }
    }

    /// `onAdFailedToLoad` with a code and message.
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdFailedToLoad {
            code: code.into(),
            message: message.into(),
        }
    }

    /// `onPaid` from a raw monetization callback; micros are scaled by 1e-6.
    pub fn paid(event: PaidEvent) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let value = event.value_micros as f64 / 1_000_000.0;
        Self::Paid {
            value,
            precision: event.precision,
            currency: event.currency_code,
        }
    }

    /// Discriminator of this record.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::AdLoaded { .. } => NotificationKind::Loaded,
            Self::AdFailedToLoad { .. } => NotificationKind::FailedToLoad,
            Self::AdOpened => NotificationKind::Opened,
            Self::AdClosed => NotificationKind::Closed,
            Self::AdImpression => NotificationKind::Impression,
            Self::AdClicked => NotificationKind::Clicked,
            Self::Paid { .. } => NotificationKind::Paid,
            Self::AppEvent { .. } => NotificationKind::AppEvent,
        }
    }

    /// Failure code, for `onAdFailedToLoad` records.
    pub fn failure_code(&self) -> Option<&str> {
        match self {
            Self::AdFailedToLoad { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Event-kind discriminator, used to filter listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotificationKind {
    /// `onAdLoaded`.
    Loaded,
    /// `onAdFailedToLoad`.
    FailedToLoad,
    /// `onAdOpened`.
    Opened,
    /// `onAdClosed`.
    Closed,
    /// `onAdImpression`.
    Impression,
    /// `onAdClicked`.
    Clicked,
    /// `onPaid`.
    Paid,
    /// `onAppEvent`.
    AppEvent,
}

impl NotificationKind {
    /// Wire name carried in the `type` field.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Loaded => "onAdLoaded",
            Self::FailedToLoad => "onAdFailedToLoad",
            Self::Opened => "onAdOpened",
            Self::Closed => "onAdClosed",
            Self::Impression => "onAdImpression",
            Self::Clicked => "onAdClicked",
            Self::Paid => "onPaid",
            Self::AppEvent => "onAppEvent",
        }
    }
}
