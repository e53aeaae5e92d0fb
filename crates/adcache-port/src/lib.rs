// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port contract for the ad cache.
//!
//! This crate defines the domain contract between the cache core and the
//! host: the renderable ad surface, the display container it is attached to,
//! and the collaborator that fetches renderables. It contains NO caching or
//! reparenting logic; that lives in `adcache`.
//!
//! # Design Principles
//!
//! - **Adapters are dumb**: Containers attach, detach, measure and dispatch.
//!   No ownership decisions.
//! - **Single-slot listeners**: A renderable holds at most one listener per
//!   slot; registering replaces the previous one.
//! - **Notifications are data**: Every outcome reaching the host is a
//!   [`Notification`], never an error.

use thiserror::Error;

/// Error reported by the fetch collaborator. Surfaced verbatim to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct FetchError {
    /// Machine-readable code (e.g. "ad_load_failed").
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl FetchError {
    /// Build a fetch error from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Error returned by a container when it refuses a child.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    /// The renderable still reports another parent.
    #[error("the specified child already has a parent")]
    AlreadyParented,
    /// The container refused the child for another reason.
    #[error("attach rejected: {0}")]
    Rejected(String),
}

mod events;
mod notification;
mod port;
mod types;

pub use events::{
    AppEvent, AppEventListener, LifecycleEvent, LifecycleListener, PaidEvent, PaidListener,
};
pub use notification::{codes, Notification, NotificationKind};
pub use port::{AdFetcher, Container, Renderable};
pub use types::{
    AdSize, AdSizeSpec, ContainerId, FetchRequest, OptionsError, RequestId, RequestKind,
    RequestOptions, SizeSpecError,
};
