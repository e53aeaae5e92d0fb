// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port traits defining the renderable, container and fetch contracts.

use crate::{
    AdSize, AppEventListener, AttachError, ContainerId, FetchError, FetchRequest,
    LifecycleListener, Notification, PaidListener,
};
use std::future::Future;
use std::sync::Arc;

/// A loaded ad surface.
///
/// Implementors wrap the platform object. Identity is the allocation: two
/// `Arc<dyn Renderable>` denote the same renderable iff they point to the
/// same object.
///
/// # Listener slots
///
/// Each slot holds at most one listener. Setting a slot replaces the previous
/// occupant silently; setting `None` clears it.
pub trait Renderable: Send + Sync {
    /// Authoritative size reported by the loaded ad.
    fn size(&self) -> AdSize;

    /// Container currently holding this renderable, if any.
    fn parent(&self) -> Option<Arc<dyn Container>>;

    /// Ask the current parent to let go of this renderable.
    ///
    /// The parent may acknowledge asynchronously; callers must re-check
    /// [`Renderable::parent`].
    fn detach_from_parent(&self) {
        if let Some(parent) = self.parent() {
            parent.remove_child();
        }
    }

    /// Replace the lifecycle listener slot.
    fn set_lifecycle_listener(&self, listener: Option<LifecycleListener>);

    /// Replace the monetization listener slot.
    fn set_paid_listener(&self, listener: Option<PaidListener>);

    /// Replace the app-event listener slot. Renderables without app events
    /// ignore this.
    fn set_app_event_listener(&self, _listener: Option<AppEventListener>) {}

    /// Record an impression manually. Returns false when the renderable does
    /// not do manual impression accounting.
    fn record_manual_impression(&self) -> bool {
        false
    }

    /// Sever the renderable from the ad network and free its resources.
    fn dispose(&self);
}

/// A display surface that holds at most one renderable child.
pub trait Container: Send + Sync {
    /// Host-assigned identifier.
    fn id(&self) -> ContainerId;

    /// False once the host has torn the container down.
    fn is_alive(&self) -> bool;

    /// Renderable currently displayed (directly or through a wrapper).
    fn child(&self) -> Option<Arc<dyn Renderable>>;

    /// Attach `renderable` as the child.
    ///
    /// Fails with [`AttachError::AlreadyParented`] while the renderable still
    /// reports another parent.
    fn attach(&self, renderable: &Arc<dyn Renderable>) -> Result<(), AttachError>;

    /// Attach `renderable` inside a neutral pass-through wrapper.
    ///
    /// Last-resort path used when direct attachment keeps failing.
    fn attach_wrapped(&self, renderable: &Arc<dyn Renderable>) -> Result<(), AttachError>;

    /// Request removal of the current child. May complete asynchronously.
    fn remove_child(&self);

    /// Remove the current child synchronously and unconditionally.
    ///
    /// On return [`Container::child`] is `None` and the former child's
    /// [`Renderable::parent`] is `None`.
    fn force_detach(&self);

    /// Ask the container to run a layout pass. Best-effort.
    fn request_layout(&self) {}

    /// Currently rendered size, if laid out.
    fn measure(&self) -> Option<AdSize>;

    /// Deliver a notification to the host-side listener of this container.
    fn dispatch(&self, notification: Notification);
}

/// The black-box collaborator that fetches renderables.
///
/// The core imposes no timeout; timeout policy, if any, belongs here.
pub trait AdFetcher: Send + Sync {
    /// Fetch a renderable for `request`.
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<Arc<dyn Renderable>, FetchError>> + Send;
}
