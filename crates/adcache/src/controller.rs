// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Attachment controller: binds cached renderables to display containers.
//!
//! # Bind protocol
//!
//! 1. Resolve the identifier (registry gone, unknown, not ready: clear the
//!    container and report the matching failure code).
//! 2. Same renderable already shown by this container: re-report its size.
//! 3. Otherwise end this container's previous session and any other session
//!    holding the renderable, detach it from its parent with bounded retries,
//!    attach (forced detach, then wrapper, as fallbacks), subscribe, and
//!    confirm after one layout pass.
//!
//! Each bind takes a fresh generation for its container and claims the
//! renderable with it. A bind whose generation is no longer current for its
//! container, or whose claim a later bind elsewhere has taken over, returns
//! [`BindOutcome::Superseded`] without notifying and without touching the
//! renderable's parent again.

use crate::bridge::{deliver, EventBridge, Subscription};
use crate::listeners::ListenerHub;
use crate::registry::{AdSource, Resolution};
use crate::reparent::{detach_with_retry, pause, DetachState};
use crate::{lock, renderable_key};
use adcache_app_core::diagnostics::{Diagnostic, DiagnosticLevel, DiagnosticLog};
use adcache_app_core::settings::{AttachmentMode, AttachmentSettings, DiagnosticSettings};
use adcache_port::{
    codes, AdSize, AttachError, Container, ContainerId, Notification, Renderable, RequestId,
    RequestKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// How the renderable ended up in its container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachPath {
    /// Plain attach.
    Direct,
    /// Attached after force-detaching the previous parent.
    ForcedDetach,
    /// Attached inside a pass-through wrapper.
    Wrapped,
}

/// Result of one bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindOutcome {
    /// Attached and confirmed; `onAdLoaded` was emitted.
    Attached {
        /// Size reported in `onAdLoaded`: the container's measured layout,
        /// else the renderable's own size.
        size: AdSize,
        /// Attachment strategy that worked.
        path: AttachPath,
    },
    /// The container already showed this renderable; `onAdLoaded` was re-emitted.
    AlreadyAttached {
        /// The renderable's own size, never the measured layout.
        size: AdSize,
    },
    /// `onAdFailedToLoad` was emitted with `code`.
    Failed {
        /// Failure code.
        code: &'static str,
    },
    /// A later bind (or another container) took over; nothing was emitted.
    Superseded,
}

struct Session {
    request_id: RequestId,
    kind: RequestKind,
    subscription: Subscription,
}

impl Session {
    fn renderable(&self) -> &Arc<dyn Renderable> {
        self.subscription.renderable()
    }
}

struct Slot {
    generation: u64,
    session: Option<Session>,
}

/// Binds identifiers to containers and keeps at most one session per renderable.
pub struct AttachmentController {
    source: Weak<dyn AdSource>,
    bridge: EventBridge,
    settings: AttachmentSettings,
    generations: AtomicU64,
    slots: Mutex<HashMap<ContainerId, Slot>>,
    claims: Mutex<HashMap<usize, u64>>,
    diagnostics: Mutex<DiagnosticLog>,
}

/// A bind's hold on a renderable; released on drop unless a later bind took it.
struct Claim<'a> {
    claims: &'a Mutex<HashMap<usize, u64>>,
    key: usize,
    generation: u64,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut claims = lock(self.claims);
        if claims.get(&self.key) == Some(&self.generation) {
            claims.remove(&self.key);
        }
    }
}

fn same(a: &Arc<dyn Renderable>, b: &Arc<dyn Renderable>) -> bool {
    renderable_key(a) == renderable_key(b)
}

impl AttachmentController {
    /// Controller resolving identifiers through `source`.
    pub fn new(
        source: Weak<dyn AdSource>,
        hub: Arc<ListenerHub>,
        settings: AttachmentSettings,
        diagnostics: DiagnosticSettings,
    ) -> Self {
        Self {
            source,
            bridge: EventBridge::new(hub),
            settings,
            generations: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
            claims: Mutex::new(HashMap::new()),
            diagnostics: Mutex::new(DiagnosticLog::new(diagnostics)),
        }
    }

    /// Attachment policy in effect.
    pub fn settings(&self) -> &AttachmentSettings {
        &self.settings
    }

    fn begin(&self, container: ContainerId) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        lock(&self.slots)
            .entry(container)
            .or_insert(Slot {
                generation,
                session: None,
            })
            .generation = generation;
        generation
    }

    fn claim(&self, renderable: &Arc<dyn Renderable>, generation: u64) -> Claim<'_> {
        let key = renderable_key(renderable);
        lock(&self.claims).insert(key, generation);
        Claim {
            claims: &self.claims,
            key,
            generation,
        }
    }

    fn holds_claim(&self, renderable: &Arc<dyn Renderable>, generation: u64) -> bool {
        lock(&self.claims).get(&renderable_key(renderable)) == Some(&generation)
    }

    /// This bind still owns its container slot and its claim on `renderable`.
    fn is_current(
        &self,
        container: ContainerId,
        generation: u64,
        renderable: &Arc<dyn Renderable>,
    ) -> bool {
        let slot_current = lock(&self.slots)
            .get(&container)
            .is_some_and(|s| s.generation == generation);
        slot_current && self.holds_claim(renderable, generation)
    }

    fn note(
        &self,
        level: DiagnosticLevel,
        container: ContainerId,
        title: &str,
        body: Option<String>,
    ) {
        lock(&self.diagnostics).record(level, Some(container.0), title, body, Instant::now());
    }

    fn fail(
        &self,
        container: &Arc<dyn Container>,
        generation: u64,
        request_id: RequestId,
        code: &'static str,
        message: &str,
    ) -> BindOutcome {
        let cid = container.id();
        let previous = {
            let mut slots = lock(&self.slots);
            match slots.get_mut(&cid) {
                Some(slot) if slot.generation == generation => slot.session.take(),
                _ => return BindOutcome::Superseded,
            }
        };
        if let Some(session) = previous {
            self.bridge.revoke(session.subscription);
        }
        if container.child().is_some() {
            container.force_detach();
        }
        warn!(container = %cid, %request_id, code, message, "bind failed");
        if code == codes::VIEW_ATTACHMENT_FAILED {
            self.note(
                DiagnosticLevel::Error,
                cid,
                "attachment failed",
                Some(message.to_owned()),
            );
        }
        deliver(
            container,
            self.bridge.hub(),
            request_id,
            Notification::failed(code, message),
        );
        BindOutcome::Failed { code }
    }

    /// Bind `request_id` to `container`.
    ///
    /// Resolves after the post-attach layout pass. Outcomes are reported to
    /// the container as notifications; the return value mirrors them.
    #[instrument(skip(self, container), fields(container = %container.id()))]
    pub async fn bind(&self, request_id: RequestId, container: &Arc<dyn Container>) -> BindOutcome {
        let cid = container.id();
        let generation = self.begin(cid);

        let Some(source) = self.source.upgrade() else {
            return self.fail(
                container,
                generation,
                request_id,
                codes::MODULE_UNAVAILABLE,
                "the ad registry is no longer available",
            );
        };
        let resolution = source.resolve(request_id);
        drop(source);
        let (renderable, kind) = match resolution {
            Resolution::Loaded { renderable, kind } => (renderable, kind),
            Resolution::NotReady => {
                return self.fail(
                    container,
                    generation,
                    request_id,
                    codes::CACHED_AD_NOT_READY,
                    "the cached ad has not finished loading",
                );
            }
            Resolution::Unknown => {
                return self.fail(
                    container,
                    generation,
                    request_id,
                    codes::AD_NOT_FOUND,
                    "no cached ad for this request id",
                );
            }
        };

        let _claim = self.claim(&renderable, generation);

        if container.child().is_some_and(|c| same(&c, &renderable)) {
            return self.reconfirm(container, generation, request_id, kind, &renderable);
        }

        self.end_sessions_for(cid, &renderable);
        if container.child().is_some() {
            container.force_detach();
        }

        let detach = detach_with_retry(&renderable, &self.settings, || {
            self.is_current(cid, generation, &renderable)
        })
        .await;
        if matches!(detach, DetachState::Abandoned { .. })
            || !self.is_current(cid, generation, &renderable)
        {
            debug!("superseded while detaching");
            return BindOutcome::Superseded;
        }
        if let DetachState::GiveUp { attempts } = detach {
            warn!(attempts, "renderable still parented, proceeding");
            self.note(
                DiagnosticLevel::Warn,
                cid,
                "detach gave up",
                Some(format!("still parented after {attempts} request(s)")),
            );
            if self.settings.mode == AttachmentMode::FailFast {
                return self.fail(
                    container,
                    generation,
                    request_id,
                    codes::VIEW_ATTACHMENT_FAILED,
                    "renderable is still attached elsewhere",
                );
            }
        }

        let path = match self.attach(container, &renderable) {
            Ok(path) => path,
            Err(err) => {
                return self.fail(
                    container,
                    generation,
                    request_id,
                    codes::VIEW_ATTACHMENT_FAILED,
                    &err.to_string(),
                );
            }
        };

        if !self.install(container, generation, request_id, kind, &renderable) {
            if container.child().is_some_and(|c| same(&c, &renderable)) {
                container.force_detach();
            }
            debug!("superseded before subscribing");
            return BindOutcome::Superseded;
        }

        container.request_layout();
        pause(Duration::ZERO).await;

        if !self.still_holds(container, generation, &renderable) {
            debug!("superseded before confirmation");
            return BindOutcome::Superseded;
        }
        let size = container.measure().unwrap_or_else(|| renderable.size());
        info!(%request_id, %size, ?path, "attached");
        deliver(
            container,
            self.bridge.hub(),
            request_id,
            Notification::loaded(size),
        );
        BindOutcome::Attached { size, path }
    }

    fn reconfirm(
        &self,
        container: &Arc<dyn Container>,
        generation: u64,
        request_id: RequestId,
        kind: RequestKind,
        renderable: &Arc<dyn Renderable>,
    ) -> BindOutcome {
        if !self.install(container, generation, request_id, kind, renderable) {
            return BindOutcome::Superseded;
        }
        let size = renderable.size();
        debug!(%request_id, %size, "already attached");
        deliver(
            container,
            self.bridge.hub(),
            request_id,
            Notification::loaded(size),
        );
        BindOutcome::AlreadyAttached { size }
    }

    /// Revoke this container's session and any other session holding `renderable`.
    fn end_sessions_for(&self, cid: ContainerId, renderable: &Arc<dyn Renderable>) {
        let ended: Vec<Session> = {
            let mut slots = lock(&self.slots);
            slots
                .iter_mut()
                .filter_map(|(id, slot)| {
                    let holds = slot
                        .session
                        .as_ref()
                        .is_some_and(|s| same(s.renderable(), renderable));
                    if *id == cid || holds {
                        slot.session.take()
                    } else {
                        None
                    }
                })
                .collect()
        };
        for session in ended {
            debug!(request_id = %session.request_id, "ending session");
            self.bridge.revoke(session.subscription);
        }
    }

    fn attach(
        &self,
        container: &Arc<dyn Container>,
        renderable: &Arc<dyn Renderable>,
    ) -> Result<AttachPath, AttachError> {
        let cid = container.id();
        match container.attach(renderable) {
            Ok(()) => return Ok(AttachPath::Direct),
            Err(AttachError::AlreadyParented)
                if self.settings.mode == AttachmentMode::BestEffort => {}
            Err(err) => return Err(err),
        }

        if let Some(parent) = renderable.parent() {
            warn!(parent = %parent.id(), "force-detaching from previous parent");
            parent.force_detach();
        }
        self.note(DiagnosticLevel::Warn, cid, "forced detach", None);
        match container.attach(renderable) {
            Ok(()) => return Ok(AttachPath::ForcedDetach),
            Err(AttachError::AlreadyParented) => {}
            Err(err) => return Err(err),
        }

        warn!("direct attach still refused, using wrapper");
        container.attach_wrapped(renderable)?;
        self.note(DiagnosticLevel::Warn, cid, "attached through wrapper", None);
        Ok(AttachPath::Wrapped)
    }

    /// Install the session if this bind is still current.
    ///
    /// Slot decisions happen under the lock; listener calls on renderables
    /// happen outside it.
    fn install(
        &self,
        container: &Arc<dyn Container>,
        generation: u64,
        request_id: RequestId,
        kind: RequestKind,
        renderable: &Arc<dyn Renderable>,
    ) -> bool {
        let cid = container.id();
        let (stale, needs_subscription) = {
            let mut slots = lock(&self.slots);
            if slots.get(&cid).map(|s| s.generation) != Some(generation)
                || !self.holds_claim(renderable, generation)
            {
                return false;
            }

            let mut stale = Vec::new();
            for (id, slot) in slots.iter_mut() {
                let keep = match slot.session.as_ref() {
                    None => true,
                    Some(s) if *id == cid => {
                        same(s.renderable(), renderable) && s.request_id == request_id
                    }
                    Some(s) => !same(s.renderable(), renderable),
                };
                if !keep {
                    stale.extend(slot.session.take());
                }
            }
            let needs_subscription = slots.get(&cid).is_some_and(|s| s.session.is_none());
            (stale, needs_subscription)
        };
        for session in stale {
            self.bridge.revoke(session.subscription);
        }
        if !needs_subscription {
            return true;
        }

        let subscription = self.bridge.subscribe(renderable, container, request_id, kind);
        let rejected = {
            let mut slots = lock(&self.slots);
            match slots.get_mut(&cid) {
                Some(slot)
                    if slot.generation == generation
                        && slot.session.is_none()
                        && self.holds_claim(renderable, generation) =>
                {
                    slot.session = Some(Session {
                        request_id,
                        kind,
                        subscription,
                    });
                    None
                }
                _ => Some(subscription),
            }
        };
        match rejected {
            None => true,
            Some(subscription) => {
                self.bridge.revoke(subscription);
                false
            }
        }
    }

    fn still_holds(
        &self,
        container: &Arc<dyn Container>,
        generation: u64,
        renderable: &Arc<dyn Renderable>,
    ) -> bool {
        let owned = lock(&self.slots).get(&container.id()).is_some_and(|slot| {
            slot.generation == generation
                && slot.session.as_ref().is_some_and(|s| {
                    same(s.renderable(), renderable)
                        && self.bridge.owns(renderable, s.subscription.token())
                })
        });
        owned && container.child().is_some_and(|c| same(&c, renderable))
    }

    /// End the container's session and empty it. The renderable stays cached.
    pub fn unbind(&self, container: &Arc<dyn Container>) {
        let cid = container.id();
        let session = lock(&self.slots).remove(&cid).and_then(|s| s.session);
        if let Some(session) = session {
            debug!(container = %cid, request_id = %session.request_id, "unbinding");
            self.bridge.revoke(session.subscription);
        }
        if container.child().is_some() {
            container.force_detach();
        }
    }

    /// End every session showing `request_id`, emptying their containers.
    ///
    /// Used before the registry disposes the renderable.
    pub fn evict(&self, request_id: RequestId) {
        let ended: Vec<Session> = lock(&self.slots)
            .values_mut()
            .filter_map(|slot| {
                if slot.session.as_ref().is_some_and(|s| s.request_id == request_id) {
                    slot.session.take()
                } else {
                    None
                }
            })
            .collect();
        for session in ended {
            let renderable = Arc::clone(session.renderable());
            self.bridge.revoke(session.subscription);
            if let Some(parent) = renderable.parent() {
                parent.force_detach();
            }
        }
    }

    /// Record a manual impression on the container's renderable.
    ///
    /// Only managed sessions forward; returns false otherwise.
    pub fn record_manual_impression(&self, container: ContainerId) -> bool {
        let renderable = lock(&self.slots).get(&container).and_then(|slot| {
            slot.session
                .as_ref()
                .filter(|s| s.kind == RequestKind::Managed)
                .map(|s| Arc::clone(s.renderable()))
        });
        renderable.is_some_and(|r| r.record_manual_impression())
    }

    /// Identifier currently shown by `container`.
    pub fn bound_request(&self, container: ContainerId) -> Option<RequestId> {
        lock(&self.slots)
            .get(&container)
            .and_then(|s| s.session.as_ref())
            .map(|s| s.request_id)
    }

    /// Active sessions.
    pub fn session_count(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|s| s.session.is_some())
            .count()
    }

    /// Snapshot of recorded diagnostics, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).entries().cloned().collect()
    }

    /// Remove and return recorded diagnostics.
    pub fn drain_diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).drain()
    }
}
