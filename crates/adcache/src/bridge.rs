// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event forwarding bridge.
//!
//! Installs listeners on a renderable for the lifetime of one attachment
//! session and turns each raw callback into exactly one [`Notification`] for
//! the session's container and the request's host listeners.

use crate::listeners::ListenerHub;
use crate::{lock, renderable_key};
use adcache_port::{
    AppEvent, Container, LifecycleEvent, Notification, PaidEvent, Renderable, RequestId,
    RequestKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::trace;

/// String code for a numeric load-failure code reported by the ad network.
pub fn failure_code(code: i32) -> &'static str {
    match code {
        0 => "internal-error",
        1 => "invalid-request",
        2 => "network-error",
        3 => "no-fill",
        8 => "app-id-missing",
        9 => "mediation-no-fill",
        10 => "request-id-mismatch",
        11 => "invalid-ad-string",
        _ => "unknown",
    }
}

/// Listener slots owned by one attachment session.
pub struct Subscription {
    token: u64,
    active: Arc<AtomicBool>,
    renderable: Arc<dyn Renderable>,
}

impl Subscription {
    /// Renderable the listeners are installed on.
    pub fn renderable(&self) -> &Arc<dyn Renderable> {
        &self.renderable
    }

    /// Token identifying this subscription within its bridge.
    pub fn token(&self) -> u64 {
        self.token
    }
}

#[derive(Clone)]
struct Forwarder {
    container: Weak<dyn Container>,
    renderable: Weak<dyn Renderable>,
    active: Arc<AtomicBool>,
    request_id: RequestId,
    hub: Arc<ListenerHub>,
}

impl Forwarder {
    fn forward(&self, notification: Notification) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if let Some(container) = self.container.upgrade() {
            deliver(&container, &self.hub, self.request_id, notification);
        } else {
            self.hub.publish(self.request_id, &notification);
        }
    }

    fn lifecycle(&self, event: LifecycleEvent) {
        let notification = match event {
            LifecycleEvent::Loaded => {
                let measured = self.container.upgrade().and_then(|c| c.measure());
                let size = measured.or_else(|| self.renderable.upgrade().map(|r| r.size()));
                match size {
                    Some(size) => Notification::loaded(size),
                    None => return,
                }
            }
            LifecycleEvent::FailedToLoad { code, message } => {
                Notification::failed(failure_code(code), message)
            }
            LifecycleEvent::Opened => Notification::AdOpened,
            LifecycleEvent::Closed => Notification::AdClosed,
            LifecycleEvent::Impression => Notification::AdImpression,
            LifecycleEvent::Clicked => Notification::AdClicked,
        };
        self.forward(notification);
    }

    fn paid(&self, event: PaidEvent) {
        self.forward(Notification::paid(event));
    }

    fn app_event(&self, event: AppEvent) {
        self.forward(Notification::AppEvent {
            name: event.name,
            data: event.data,
        });
    }
}

/// Dispatch to a live container and publish to the request's listeners.
pub(crate) fn deliver(
    container: &Arc<dyn Container>,
    hub: &ListenerHub,
    request_id: RequestId,
    notification: Notification,
) {
    hub.publish(request_id, &notification);
    if container.is_alive() {
        trace!(container = %container.id(), kind = notification.kind().wire_name(), "dispatch");
        container.dispatch(notification);
    }
}

/// Installs and revokes session listeners on renderables.
pub struct EventBridge {
    hub: Arc<ListenerHub>,
    next_token: AtomicU64,
    owners: Mutex<HashMap<usize, u64>>,
}

impl EventBridge {
    /// Bridge publishing to `hub`.
    pub fn new(hub: Arc<ListenerHub>) -> Self {
        Self {
            hub,
            next_token: AtomicU64::new(1),
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// Host listener hub.
    pub fn hub(&self) -> &Arc<ListenerHub> {
        &self.hub
    }

    /// Install listeners forwarding `renderable`'s callbacks to `container`.
    ///
    /// Replaces whatever occupied the slots; the previous subscription, if
    /// any, stops forwarding and its later revocation leaves these slots alone.
    pub fn subscribe(
        &self,
        renderable: &Arc<dyn Renderable>,
        container: &Arc<dyn Container>,
        request_id: RequestId,
        kind: RequestKind,
    ) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let forwarder = Forwarder {
            container: Arc::downgrade(container),
            renderable: Arc::downgrade(renderable),
            active: Arc::clone(&active),
            request_id,
            hub: Arc::clone(&self.hub),
        };

        lock(&self.owners).insert(renderable_key(renderable), token);

        let lifecycle = forwarder.clone();
        renderable.set_lifecycle_listener(Some(Arc::new(move |event| lifecycle.lifecycle(event))));
        let paid = forwarder.clone();
        renderable.set_paid_listener(Some(Arc::new(move |event| paid.paid(event))));
        if kind == RequestKind::Managed {
            renderable.set_app_event_listener(Some(Arc::new(move |event| {
                forwarder.app_event(event);
            })));
        }

        Subscription {
            token,
            active,
            renderable: Arc::clone(renderable),
        }
    }

    /// Stop forwarding and clear the slots if this subscription still owns them.
    pub fn revoke(&self, subscription: Subscription) {
        subscription.active.store(false, Ordering::Release);
        let key = renderable_key(&subscription.renderable);
        let owned = {
            let mut owners = lock(&self.owners);
            let owned = owners.get(&key) == Some(&subscription.token);
            if owned {
                owners.remove(&key);
            }
            owned
        };
        if owned {
            subscription.renderable.set_lifecycle_listener(None);
            subscription.renderable.set_paid_listener(None);
            subscription.renderable.set_app_event_listener(None);
        }
    }

    /// True if the subscription identified by `token` currently owns the slots
    /// of `renderable`.
    pub fn owns(&self, renderable: &Arc<dyn Renderable>, token: u64) -> bool {
        lock(&self.owners).get(&renderable_key(renderable)) == Some(&token)
    }
}
