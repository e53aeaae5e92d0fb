// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host-facing facade.

use crate::binding::ContainerBinding;
use crate::controller::{AttachmentController, BindOutcome};
use crate::listeners::ListenerHub;
use crate::registry::{AdRegistry, AdSource, CachedAdInfo, LoadedAd, RequestError, RequestState};
use adcache_app_core::diagnostics::Diagnostic;
use adcache_app_core::settings::CacheSettings;
use adcache_app_core::settings_port::SettingsPort;
use adcache_port::{AdFetcher, AdSizeSpec, Container, RequestId, RequestOptions};
use std::sync::{Arc, Weak};
use tracing::debug;

/// One process-wide ad cache: registry, controller and host listeners.
///
/// Dropping the cache disposes every cached renderable. Bindings that
/// outlive it report `cached-banner-module-unavailable`.
pub struct AdCache<F: AdFetcher + 'static> {
    registry: Arc<AdRegistry<F>>,
    controller: Arc<AttachmentController>,
    hub: Arc<ListenerHub>,
    settings: CacheSettings,
}

impl<F: AdFetcher + 'static> AdCache<F> {
    /// Build a cache around `fetcher`.
    pub fn new(fetcher: F, settings: CacheSettings) -> Self {
        let registry = Arc::new(AdRegistry::new(fetcher));
        let source: Weak<dyn AdSource> = Arc::downgrade(&registry) as Weak<dyn AdSource>;
        let hub = Arc::new(ListenerHub::new());
        let controller = Arc::new(AttachmentController::new(
            source,
            Arc::clone(&hub),
            settings.attachment,
            settings.diagnostics,
        ));
        debug!(mode = ?settings.attachment.mode, "ad cache ready");
        Self {
            registry,
            controller,
            hub,
            settings,
        }
    }

    /// Build a cache with settings loaded through `port`.
    pub fn from_settings_port(fetcher: F, port: &impl SettingsPort) -> Self {
        Self::new(fetcher, port.load_settings())
    }

    /// Settings in effect.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// The underlying registry.
    pub fn registry(&self) -> &AdRegistry<F> {
        &self.registry
    }

    /// Request a single-size ad.
    pub async fn request_standard(
        &self,
        unit_id: &str,
        size: AdSizeSpec,
        options: RequestOptions,
    ) -> Result<LoadedAd, RequestError> {
        self.registry.request_standard(unit_id, size, options).await
    }

    /// Request a managed ad accepting any of `sizes`.
    pub async fn request_managed(
        &self,
        unit_id: &str,
        sizes: Vec<AdSizeSpec>,
        options: RequestOptions,
        manual_impressions: bool,
    ) -> Result<LoadedAd, RequestError> {
        self.registry
            .request_managed(unit_id, sizes, options, manual_impressions)
            .await
    }

    /// Release a loaded or failed request: end its sessions, drop its
    /// listeners and dispose its renderable.
    pub fn release(&self, id: RequestId) -> bool {
        if !matches!(
            self.registry.state(id),
            Some(RequestState::Loaded | RequestState::Failed)
        ) {
            return false;
        }
        self.controller.evict(id);
        self.hub.remove_all(id);
        self.registry.release(id)
    }

    /// True while `id` is pending or loaded.
    pub fn has_request(&self, id: RequestId) -> bool {
        self.registry.has_request(id)
    }

    /// Snapshot of a pending or loaded request.
    pub fn info(&self, id: RequestId) -> Option<CachedAdInfo> {
        self.registry.info(id)
    }

    /// Identifiers of pending and loaded requests, sorted.
    pub fn cached_ids(&self) -> Vec<RequestId> {
        self.registry.cached_ids()
    }

    /// Release every loaded and failed request; returns how many were released.
    pub fn clear_all(&self) -> usize {
        for id in self.registry.settled_ids() {
            self.controller.evict(id);
        }
        let released = self.registry.clear_all();
        for id in &released {
            self.hub.remove_all(*id);
        }
        released.len()
    }

    /// Bind `id` to `container`.
    pub async fn bind(&self, id: RequestId, container: &Arc<dyn Container>) -> BindOutcome {
        self.controller.bind(id, container).await
    }

    /// Empty `container`, keeping its renderable cached.
    pub fn unbind(&self, container: &Arc<dyn Container>) {
        self.controller.unbind(container);
    }

    /// Binding handle for `container`.
    pub fn binding(&self, container: Arc<dyn Container>) -> ContainerBinding {
        ContainerBinding::new(Arc::clone(&self.controller), container)
    }

    /// The attachment controller.
    pub fn controller(&self) -> &Arc<AttachmentController> {
        &self.controller
    }

    /// Host listeners keyed by request.
    pub fn listeners(&self) -> &ListenerHub {
        &self.hub
    }

    /// Recorded reparenting diagnostics, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.controller.diagnostics()
    }
}
