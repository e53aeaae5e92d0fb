// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fake renderables and containers sharing one parent table.
//!
//! A [`Container`] only ever sees `Arc<dyn Renderable>`, so it cannot poke the
//! renderable's parent pointer directly. Both sides instead agree on a
//! [`Stage`] keyed by the renderable's allocation address.

use adcache_port::{
    AdSize, AppEvent, AppEventListener, AttachError, Container, ContainerId, LifecycleEvent,
    LifecycleListener, Notification, PaidEvent, PaidListener, Renderable,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn addr_of_dyn(renderable: &Arc<dyn Renderable>) -> usize {
    Arc::as_ptr(renderable).cast::<()>() as usize
}

/// Shared parent table.
#[derive(Default)]
pub struct Stage {
    parents: Mutex<HashMap<usize, Weak<dyn Container>>>,
}

impl Stage {
    /// Create an empty stage.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn parent_at(&self, key: usize) -> Option<Arc<dyn Container>> {
        lock(&self.parents).get(&key).and_then(Weak::upgrade)
    }

    fn set_parent(&self, key: usize, parent: Weak<dyn Container>) {
        lock(&self.parents).insert(key, parent);
    }

    fn clear_parent(&self, key: usize) {
        lock(&self.parents).remove(&key);
    }

    /// Container currently parenting `renderable`.
    pub fn parent_of(&self, renderable: &FakeRenderable) -> Option<Arc<dyn Container>> {
        self.parent_at(renderable.key())
    }

    /// Number of renderables that currently have a live parent.
    pub fn parented_count(&self) -> usize {
        lock(&self.parents)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

/// Hand-driven renderable with observable listener slots.
pub struct FakeRenderable {
    stage: Arc<Stage>,
    size: Mutex<AdSize>,
    lifecycle: Mutex<Option<LifecycleListener>>,
    paid: Mutex<Option<PaidListener>>,
    app: Mutex<Option<AppEventListener>>,
    installs: AtomicUsize,
    manual_impressions: AtomicUsize,
    disposed: AtomicBool,
    replay: Mutex<Option<LifecycleEvent>>,
}

impl FakeRenderable {
    /// Create a renderable of `size` living on `stage`.
    pub fn new(stage: Arc<Stage>, size: AdSize) -> Arc<Self> {
        Arc::new(Self {
            stage,
            size: Mutex::new(size),
            lifecycle: Mutex::new(None),
            paid: Mutex::new(None),
            app: Mutex::new(None),
            installs: AtomicUsize::new(0),
            manual_impressions: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            replay: Mutex::new(None),
        })
    }

    fn key(&self) -> usize {
        std::ptr::from_ref(self).cast::<()>() as usize
    }

    /// Change the size the renderable reports (e.g. after an adaptive reload).
    pub fn resize(&self, size: AdSize) {
        *lock(&self.size) = size;
    }

    /// Deliver `event` to the next lifecycle listener as soon as it is
    /// installed, like an SDK replaying a buffered callback.
    pub fn set_replay_on_install(&self, event: LifecycleEvent) {
        *lock(&self.replay) = Some(event);
    }

    /// Fire the lifecycle slot, if occupied.
    pub fn emit(&self, event: LifecycleEvent) {
        let listener = lock(&self.lifecycle).clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }

    /// Fire the paid slot, if occupied.
    pub fn emit_paid(&self, value_micros: i64, precision: u8, currency_code: &str) {
        let listener = lock(&self.paid).clone();
        if let Some(listener) = listener {
            listener(PaidEvent {
                value_micros,
                precision,
                currency_code: currency_code.to_owned(),
            });
        }
    }

    /// Fire the app-event slot, if occupied.
    pub fn emit_app_event(&self, name: &str, data: Option<&str>) {
        let listener = lock(&self.app).clone();
        if let Some(listener) = listener {
            listener(AppEvent {
                name: name.to_owned(),
                data: data.map(str::to_owned),
            });
        }
    }

    /// True while the lifecycle slot is occupied.
    pub fn has_lifecycle_listener(&self) -> bool {
        lock(&self.lifecycle).is_some()
    }

    /// True while the paid slot is occupied.
    pub fn has_paid_listener(&self) -> bool {
        lock(&self.paid).is_some()
    }

    /// True while the app-event slot is occupied.
    pub fn has_app_event_listener(&self) -> bool {
        lock(&self.app).is_some()
    }

    /// Number of non-empty lifecycle listeners ever installed.
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Manual impressions recorded so far.
    pub fn manual_impressions(&self) -> usize {
        self.manual_impressions.load(Ordering::SeqCst)
    }

    /// True once disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Container currently parenting this renderable.
    pub fn current_parent(&self) -> Option<Arc<dyn Container>> {
        self.stage.parent_at(self.key())
    }
}

impl Renderable for FakeRenderable {
    fn size(&self) -> AdSize {
        *lock(&self.size)
    }

    fn parent(&self) -> Option<Arc<dyn Container>> {
        self.current_parent()
    }

    fn set_lifecycle_listener(&self, listener: Option<LifecycleListener>) {
        if listener.is_some() {
            self.installs.fetch_add(1, Ordering::SeqCst);
        }
        *lock(&self.lifecycle) = listener.clone();
        if let Some(listener) = listener {
            let replay = lock(&self.replay).take();
            if let Some(event) = replay {
                listener(event);
            }
        }
    }

    fn set_paid_listener(&self, listener: Option<PaidListener>) {
        *lock(&self.paid) = listener;
    }

    fn set_app_event_listener(&self, listener: Option<AppEventListener>) {
        *lock(&self.app) = listener;
    }

    fn record_manual_impression(&self) -> bool {
        self.manual_impressions.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        *lock(&self.lifecycle) = None;
        *lock(&self.paid) = None;
        *lock(&self.app) = None;
    }
}

/// How a [`FakeContainer`] answers `remove_child`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    /// The child is gone as soon as removal is requested.
    Immediate,
    /// The child goes on the n-th request (counted per child).
    AfterRequests(u32),
    /// Requests are ignored; only `force_detach` works.
    Stuck,
}

/// How a [`FakeContainer`] answers direct `attach`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectAttach {
    /// Accept unless the renderable has another parent.
    Accept,
    /// Always claim the renderable is still parented (stale parent pointer).
    AlwaysParented,
    /// Refuse for a reason unrelated to parenting.
    Reject,
}

struct ContainerState {
    alive: bool,
    child: Option<Arc<dyn Renderable>>,
    wrapped: bool,
    removal: Removal,
    removal_requests_for_child: u32,
    direct: DirectAttach,
    accept_wrapped: bool,
    measured: Option<AdSize>,
    received: Vec<Notification>,
    remove_requests: usize,
    force_detaches: usize,
    layouts: usize,
}

/// Host reaction to a dispatched notification.
pub type DispatchHook = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Display container fake.
pub struct FakeContainer {
    id: ContainerId,
    stage: Arc<Stage>,
    me: Weak<Self>,
    state: Mutex<ContainerState>,
    on_dispatch: Mutex<Option<DispatchHook>>,
}

impl FakeContainer {
    /// Create a live, empty container with immediate removal.
    pub fn new(stage: Arc<Stage>, id: u64) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: ContainerId(id),
            stage,
            me: me.clone(),
            state: Mutex::new(ContainerState {
                alive: true,
                child: None,
                wrapped: false,
                removal: Removal::Immediate,
                removal_requests_for_child: 0,
                direct: DirectAttach::Accept,
                accept_wrapped: true,
                measured: None,
                received: Vec::new(),
                remove_requests: 0,
                force_detaches: 0,
                layouts: 0,
            }),
            on_dispatch: Mutex::new(None),
        })
    }

    /// Run `hook` after every recorded notification, outside the container's lock.
    pub fn set_on_dispatch(&self, hook: DispatchHook) {
        *lock(&self.on_dispatch) = Some(hook);
    }

    /// This container as the port trait object.
    pub fn as_container(self: &Arc<Self>) -> Arc<dyn Container> {
        Arc::clone(self) as Arc<dyn Container>
    }

    fn state(&self) -> MutexGuard<'_, ContainerState> {
        lock(&self.state)
    }

    fn is_me(&self, other: &Arc<dyn Container>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(other), std::ptr::from_ref(self))
    }

    fn clear_child(&self, st: &mut ContainerState) {
        if let Some(old) = st.child.take() {
            let key = addr_of_dyn(&old);
            if self
                .stage
                .parent_at(key)
                .is_some_and(|p| self.is_me(&p))
            {
                self.stage.clear_parent(key);
            }
        }
        st.wrapped = false;
        st.removal_requests_for_child = 0;
    }

    fn adopt(&self, st: &mut ContainerState, renderable: &Arc<dyn Renderable>, wrapped: bool) {
        let same = st
            .child
            .as_ref()
            .is_some_and(|c| addr_of_dyn(c) == addr_of_dyn(renderable));
        if !same {
            self.clear_child(st);
        }
        let me: Weak<dyn Container> = self.me.clone();
        self.stage.set_parent(addr_of_dyn(renderable), me);
        st.child = Some(Arc::clone(renderable));
        st.wrapped = wrapped;
        st.removal_requests_for_child = 0;
    }

    fn parented_elsewhere(&self, renderable: &Arc<dyn Renderable>) -> bool {
        self.stage
            .parent_at(addr_of_dyn(renderable))
            .is_some_and(|p| !self.is_me(&p))
    }

    /// Configure removal latency.
    pub fn set_removal(&self, removal: Removal) {
        self.state().removal = removal;
    }

    /// Configure direct attach behaviour.
    pub fn set_direct_attach(&self, direct: DirectAttach) {
        self.state().direct = direct;
    }

    /// Refuse or accept wrapped attachment.
    pub fn set_accept_wrapped(&self, accept: bool) {
        self.state().accept_wrapped = accept;
    }

    /// Pretend layout produced `size` (None: report the child's own size).
    pub fn set_measured(&self, size: Option<AdSize>) {
        self.state().measured = size;
    }

    /// Tear the container down.
    pub fn kill(&self) {
        self.state().alive = false;
    }

    /// True if `renderable` is the current child.
    pub fn holds(&self, renderable: &FakeRenderable) -> bool {
        self.state()
            .child
            .as_ref()
            .is_some_and(|c| addr_of_dyn(c) == renderable.key())
    }

    /// True when a child is present.
    pub fn has_child(&self) -> bool {
        self.state().child.is_some()
    }

    /// True if the current child sits in a pass-through wrapper.
    pub fn is_wrapped(&self) -> bool {
        self.state().wrapped
    }

    /// Every notification dispatched so far.
    pub fn received(&self) -> Vec<Notification> {
        self.state().received.clone()
    }

    /// Drain the notification log.
    pub fn take_received(&self) -> Vec<Notification> {
        std::mem::take(&mut self.state().received)
    }

    /// Failure codes received so far, in order.
    pub fn failure_codes(&self) -> Vec<String> {
        self.state()
            .received
            .iter()
            .filter_map(|n| n.failure_code().map(str::to_owned))
            .collect()
    }

    /// Number of `onAdLoaded` notifications received.
    pub fn loaded_count(&self) -> usize {
        self.state()
            .received
            .iter()
            .filter(|n| matches!(n, Notification::AdLoaded { .. }))
            .count()
    }

    /// `remove_child` calls so far.
    pub fn remove_requests(&self) -> usize {
        self.state().remove_requests
    }

    /// `force_detach` calls so far.
    pub fn force_detaches(&self) -> usize {
        self.state().force_detaches
    }

    /// `request_layout` calls so far.
    pub fn layouts(&self) -> usize {
        self.state().layouts
    }
}

impl Container for FakeContainer {
    fn id(&self) -> ContainerId {
        self.id
    }

    fn is_alive(&self) -> bool {
        self.state().alive
    }

    fn child(&self) -> Option<Arc<dyn Renderable>> {
        self.state().child.clone()
    }

    fn attach(&self, renderable: &Arc<dyn Renderable>) -> Result<(), AttachError> {
        let mut st = self.state();
        if !st.alive {
            return Err(AttachError::Rejected("container torn down".into()));
        }
        match st.direct {
            DirectAttach::Reject => return Err(AttachError::Rejected("refused".into())),
            DirectAttach::AlwaysParented => return Err(AttachError::AlreadyParented),
            DirectAttach::Accept => {}
        }
        if self.parented_elsewhere(renderable) {
            return Err(AttachError::AlreadyParented);
        }
        self.adopt(&mut st, renderable, false);
        Ok(())
    }

    fn attach_wrapped(&self, renderable: &Arc<dyn Renderable>) -> Result<(), AttachError> {
        let mut st = self.state();
        if !st.alive || !st.accept_wrapped {
            return Err(AttachError::Rejected("wrapper refused".into()));
        }
        if self.parented_elsewhere(renderable) {
            return Err(AttachError::AlreadyParented);
        }
        self.adopt(&mut st, renderable, true);
        Ok(())
    }

    fn remove_child(&self) {
        let mut st = self.state();
        st.remove_requests += 1;
        if st.child.is_none() {
            return;
        }
        st.removal_requests_for_child += 1;
        let done = match st.removal {
            Removal::Immediate => true,
            Removal::AfterRequests(n) => st.removal_requests_for_child >= n,
            Removal::Stuck => false,
        };
        if done {
            self.clear_child(&mut st);
        }
    }

    fn force_detach(&self) {
        let mut st = self.state();
        st.force_detaches += 1;
        self.clear_child(&mut st);
    }

    fn request_layout(&self) {
        self.state().layouts += 1;
    }

    fn measure(&self) -> Option<AdSize> {
        let st = self.state();
        st.measured.or_else(|| st.child.as_ref().map(|c| c.size()))
    }

    fn dispatch(&self, notification: Notification) {
        self.state().received.push(notification.clone());
        let hook = lock(&self.on_dispatch).clone();
        if let Some(hook) = hook {
            hook(&notification);
        }
    }
}
