// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-request host listeners.

use crate::lock;
use adcache_port::{Notification, NotificationKind, RequestId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Host callback receiving notifications for one request.
pub type NotificationListener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned when registering a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

struct Entry {
    handle: ListenerHandle,
    filter: Option<NotificationKind>,
    listener: NotificationListener,
}

/// Registry of host listeners keyed by request.
#[derive(Default)]
pub struct ListenerHub {
    next: AtomicU64,
    table: Mutex<HashMap<RequestId, Vec<Entry>>>,
}

impl ListenerHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        &self,
        id: RequestId,
        filter: Option<NotificationKind>,
        listener: NotificationListener,
    ) -> ListenerHandle {
        let handle = ListenerHandle(self.next.fetch_add(1, Ordering::Relaxed));
        lock(&self.table).entry(id).or_default().push(Entry {
            handle,
            filter,
            listener,
        });
        handle
    }

    /// Listen to every notification of `id`.
    pub fn add_events_listener<L>(&self, id: RequestId, listener: L) -> ListenerHandle
    where
        L: Fn(&Notification) + Send + Sync + 'static,
    {
        self.insert(id, None, Arc::new(listener))
    }

    /// Listen to one kind of notification of `id`.
    pub fn add_event_listener<L>(
        &self,
        id: RequestId,
        kind: NotificationKind,
        listener: L,
    ) -> ListenerHandle
    where
        L: Fn(&Notification) + Send + Sync + 'static,
    {
        self.insert(id, Some(kind), Arc::new(listener))
    }

    /// Remove one listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: RequestId, handle: ListenerHandle) -> bool {
        let mut table = lock(&self.table);
        let Some(entries) = table.get_mut(&id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.handle != handle);
        let removed = entries.len() != before;
        if entries.is_empty() {
            table.remove(&id);
        }
        removed
    }

    /// Remove every listener of `id`; returns how many were removed.
    pub fn remove_all(&self, id: RequestId) -> usize {
        lock(&self.table).remove(&id).map_or(0, |e| e.len())
    }

    /// Listeners registered for `id`.
    pub fn listener_count(&self, id: RequestId) -> usize {
        lock(&self.table).get(&id).map_or(0, Vec::len)
    }

    /// Invoke matching listeners of `id`; returns how many ran.
    ///
    /// Listeners run after the hub lock is released, so they may register or
    /// remove listeners themselves.
    pub fn publish(&self, id: RequestId, notification: &Notification) -> usize {
        let kind = notification.kind();
        let targets: Vec<NotificationListener> = lock(&self.table)
            .get(&id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.filter.is_none_or(|k| k == kind))
                    .map(|e| Arc::clone(&e.listener))
                    .collect()
            })
            .unwrap_or_default();
        for listener in &targets {
            listener(notification);
        }
        targets.len()
    }
}
