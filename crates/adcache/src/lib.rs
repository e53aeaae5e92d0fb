// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cached ad renderables and the protocol that moves them between containers.
//!
//! A host pre-fetches an ad, receives an opaque [`RequestId`], and later binds
//! that identifier to whichever display container is on screen. The single
//! cached renderable is detached from its previous container (with bounded
//! retries, a forced detach, and a wrapper fallback) and reattached to the new
//! one while its event stream keeps flowing.
//!
//! # Layout
//!
//! - [`registry`]: issues identifiers and owns renderables.
//! - [`controller`]: binds identifiers to containers; [`reparent`] holds the
//!   detach state machine it drives.
//! - [`bridge`]: turns renderable callbacks into per-container [`Notification`]s.
//! - [`listeners`]: per-request host listeners.
//! - [`binding`]: per-surface handle that unbinds on drop.
//! - [`cache`]: the [`AdCache`] facade wiring everything together.

use std::sync::{Mutex, MutexGuard};

pub mod binding;
pub mod bridge;
pub mod cache;
pub mod controller;
pub mod listeners;
pub mod registry;
pub mod reparent;

pub use adcache_port::{
    codes, AdFetcher, AdSize, AdSizeSpec, Container, ContainerId, FetchError, Notification,
    NotificationKind, Renderable, RequestId, RequestKind, RequestOptions,
};
pub use binding::ContainerBinding;
pub use cache::AdCache;
pub use controller::{AttachPath, AttachmentController, BindOutcome};
pub use listeners::{ListenerHandle, ListenerHub};
pub use registry::{AdRegistry, CachedAdInfo, LoadedAd, RequestError, RequestState};
pub use reparent::DetachState;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Address of a renderable allocation, used as its identity.
pub(crate) fn renderable_key(renderable: &std::sync::Arc<dyn Renderable>) -> usize {
    std::sync::Arc::as_ptr(renderable).cast::<()>() as usize
}
