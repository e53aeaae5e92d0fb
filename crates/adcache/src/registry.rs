// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request registry: issues identifiers and owns cached renderables.
//!
//! Every request gets a fresh [`RequestId`] and a record that moves
//! `Pending → Loaded | Failed`, and finally `Released`. Only pending and
//! loaded records stay in the live table; failed and released identifiers are
//! retired into a bounded history so `state` can still report them. Only the
//! registry creates (through the fetcher) or disposes renderables.

use crate::lock;
use adcache_port::{
    codes, AdFetcher, AdSize, AdSizeSpec, FetchError, FetchRequest, OptionsError, Renderable,
    RequestId, RequestKind, RequestOptions, SizeSpecError,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Lifecycle state of one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Waiting for the fetcher.
    Pending,
    /// Renderable cached and bindable.
    Loaded,
    /// The fetcher failed; nothing is cached.
    Failed,
    /// Released; the identifier is dead for good.
    Released,
}

/// Error returned by a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Malformed request (missing unit id, sizes, bad size string...).
    #[error("invalid_config: {0}")]
    InvalidConfig(String),
    /// Options failed validation.
    #[error("invalid_request_options: {0}")]
    InvalidOptions(#[from] OptionsError),
    /// The fetcher failed; code and message pass through unchanged.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl RequestError {
    /// Machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidConfig(_) => codes::INVALID_CONFIG,
            Self::InvalidOptions(_) => codes::INVALID_REQUEST_OPTIONS,
            Self::Fetch(err) => err.code.as_str(),
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidConfig(msg) => msg.clone(),
            Self::InvalidOptions(err) => err.to_string(),
            Self::Fetch(err) => err.message.clone(),
        }
    }
}

impl From<SizeSpecError> for RequestError {
    fn from(err: SizeSpecError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

/// Parse host size strings (`"BANNER"`, `"300x250"`, ...).
pub fn parse_sizes<S: AsRef<str>>(sizes: &[S]) -> Result<Vec<AdSizeSpec>, RequestError> {
    sizes
        .iter()
        .map(|s| s.as_ref().parse::<AdSizeSpec>().map_err(RequestError::from))
        .collect()
}

/// Result of a successful request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedAd {
    /// Identifier to bind later.
    pub request_id: RequestId,
    /// Width reported by the renderable.
    pub width: u32,
    /// Height reported by the renderable.
    pub height: u32,
}

/// Snapshot of one live request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAdInfo {
    /// Identifier.
    pub request_id: RequestId,
    /// Ad unit.
    pub unit_id: String,
    /// Request variant.
    pub kind: RequestKind,
    /// True once a renderable is cached.
    pub is_loaded: bool,
    /// Width (0 until loaded).
    pub width: u32,
    /// Height (0 until loaded).
    pub height: u32,
}

struct RequestRecord {
    kind: RequestKind,
    unit_id: String,
    renderable: Option<Arc<dyn Renderable>>,
    state: RequestState,
    size: Option<AdSize>,
}

impl RequestRecord {
    fn info(&self, request_id: RequestId) -> CachedAdInfo {
        let size = self.size.unwrap_or_default();
        CachedAdInfo {
            request_id,
            unit_id: self.unit_id.clone(),
            kind: self.kind,
            is_loaded: self.state == RequestState::Loaded,
            width: size.width,
            height: size.height,
        }
    }
}

/// What the controller learns when it resolves an identifier.
pub enum Resolution {
    /// Cached and ready to attach.
    Loaded {
        /// The cached renderable.
        renderable: Arc<dyn Renderable>,
        /// Variant of the request that produced it.
        kind: RequestKind,
    },
    /// Known, but pending or failed.
    NotReady,
    /// Never issued, or released.
    Unknown,
}

/// Read side of the registry used by the attachment controller.
pub trait AdSource: Send + Sync {
    /// Resolve an identifier.
    fn resolve(&self, id: RequestId) -> Resolution;
}

/// Failed and released identifiers remembered for [`AdRegistry::state`].
const RETIRED_CAPACITY: usize = 1024;

struct Records {
    live: HashMap<RequestId, RequestRecord>,
    retired: HashMap<RequestId, RequestState>,
    retired_order: VecDeque<RequestId>,
    retired_capacity: usize,
}

impl Records {
    fn with_retired_capacity(retired_capacity: usize) -> Self {
        Self {
            live: HashMap::new(),
            retired: HashMap::new(),
            retired_order: VecDeque::new(),
            retired_capacity,
        }
    }

    fn fresh_id(&self) -> RequestId {
        loop {
            let id = RequestId::generate();
            if !self.live.contains_key(&id) && !self.retired.contains_key(&id) {
                return id;
            }
        }
    }

    /// Remember `id` as `state`, forgetting the oldest retiree past capacity.
    fn retire(&mut self, id: RequestId, state: RequestState) {
        if self.retired.insert(id, state).is_none() {
            self.retired_order.push_back(id);
        }
        while self.retired_order.len() > self.retired_capacity {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: RequestId) -> Option<RequestRecord> {
        let record = self.live.remove(&id)?;
        self.retire(id, RequestState::Released);
        Some(record)
    }
}

impl Default for Records {
    fn default() -> Self {
        Self::with_retired_capacity(RETIRED_CAPACITY)
    }
}

/// Owns every request record.
pub struct AdRegistry<F> {
    fetcher: F,
    records: Mutex<Records>,
}

impl<F: AdFetcher> AdRegistry<F> {
    /// Create an empty registry around a fetcher.
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            records: Mutex::new(Records::default()),
        }
    }

    /// Borrow the fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Request one ad of a single size.
    pub async fn request_standard(
        &self,
        unit_id: &str,
        size: AdSizeSpec,
        options: RequestOptions,
    ) -> Result<LoadedAd, RequestError> {
        self.request(RequestKind::Standard, unit_id, vec![size], options, false)
            .await
    }

    /// Request one managed ad accepting any of `sizes`.
    pub async fn request_managed(
        &self,
        unit_id: &str,
        sizes: Vec<AdSizeSpec>,
        options: RequestOptions,
        manual_impressions: bool,
    ) -> Result<LoadedAd, RequestError> {
        self.request(RequestKind::Managed, unit_id, sizes, options, manual_impressions)
            .await
    }

    /// Validate, register a pending record, and fetch.
    ///
    /// Suspends until the fetcher answers. The registry imposes no timeout and
    /// never retries.
    #[instrument(skip(self, sizes, options), fields(request_id))]
    pub async fn request(
        &self,
        kind: RequestKind,
        unit_id: &str,
        sizes: Vec<AdSizeSpec>,
        options: RequestOptions,
        manual_impressions: bool,
    ) -> Result<LoadedAd, RequestError> {
        validate(kind, unit_id, &sizes, &options)?;

        let request_id = {
            let mut records = lock(&self.records);
            let id = records.fresh_id();
            records.live.insert(
                id,
                RequestRecord {
                    kind,
                    unit_id: unit_id.to_owned(),
                    renderable: None,
                    state: RequestState::Pending,
                    size: None,
                },
            );
            id
        };
        tracing::Span::current().record("request_id", tracing::field::display(request_id));
        debug!("request pending");

        let outcome = self
            .fetcher
            .fetch(FetchRequest {
                request_id,
                kind,
                unit_id: unit_id.to_owned(),
                sizes,
                options,
                manual_impressions: kind == RequestKind::Managed && manual_impressions,
            })
            .await;

        match outcome {
            Ok(renderable) => {
                let size = renderable.size();
                let stored = {
                    let mut records = lock(&self.records);
                    match records.live.get_mut(&request_id) {
                        Some(record) => {
                            record.renderable = Some(Arc::clone(&renderable));
                            record.state = RequestState::Loaded;
                            record.size = Some(size);
                            true
                        }
                        None => false,
                    }
                };
                if !stored {
                    renderable.dispose();
                    return Err(RequestError::Fetch(FetchError::new(
                        codes::AD_NOT_FOUND,
                        "request was released while loading",
                    )));
                }
                info!(%size, "request loaded");
                Ok(LoadedAd {
                    request_id,
                    width: size.width,
                    height: size.height,
                })
            }
            Err(err) => {
                {
                    let mut records = lock(&self.records);
                    if records.live.remove(&request_id).is_some() {
                        records.retire(request_id, RequestState::Failed);
                    }
                }
                warn!(code = %err.code, message = %err.message, "request failed");
                Err(RequestError::Fetch(err))
            }
        }
    }

    /// Cached renderable for `id`, if loaded.
    pub fn lookup(&self, id: RequestId) -> Option<Arc<dyn Renderable>> {
        lock(&self.records)
            .live
            .get(&id)
            .and_then(|r| r.renderable.clone())
    }

    /// Release a loaded or failed request. Pending and unknown ids are left
    /// alone.
    ///
    /// Returns true if the identifier moved to `Released`.
    pub fn release(&self, id: RequestId) -> bool {
        let removed = {
            let mut records = lock(&self.records);
            match records.live.get(&id).map(|r| r.state) {
                Some(RequestState::Loaded) => records.remove(id).map(|r| r.renderable),
                Some(_) => None,
                None if records.retired.get(&id) == Some(&RequestState::Failed) => {
                    records.retire(id, RequestState::Released);
                    Some(None)
                }
                None => None,
            }
        };
        let Some(renderable) = removed else {
            return false;
        };
        if let Some(renderable) = renderable {
            renderable.dispose();
        }
        debug!(request_id = %id, "request released");
        true
    }

    /// True while `id` is pending or loaded.
    pub fn has_request(&self, id: RequestId) -> bool {
        matches!(
            self.state(id),
            Some(RequestState::Pending | RequestState::Loaded)
        )
    }

    /// Current state of `id`; `Released` for identifiers released earlier.
    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        let records = lock(&self.records);
        match records.live.get(&id) {
            Some(record) => Some(record.state),
            None => records.retired.get(&id).copied(),
        }
    }

    /// Snapshot of a pending or loaded request.
    pub fn info(&self, id: RequestId) -> Option<CachedAdInfo> {
        lock(&self.records).live.get(&id).map(|r| r.info(id))
    }

    /// Identifiers of pending and loaded requests, sorted.
    pub fn cached_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = lock(&self.records).live.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Identifiers holding a loaded renderable, sorted.
    pub fn settled_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = lock(&self.records)
            .live
            .iter()
            .filter(|(_, r)| r.state == RequestState::Loaded)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Release every loaded and failed request; pending ones are left to
    /// complete.
    ///
    /// Returns the released identifiers, sorted.
    pub fn clear_all(&self) -> Vec<RequestId> {
        let failed: Vec<RequestId> = {
            let records = lock(&self.records);
            records
                .retired
                .iter()
                .filter(|(_, state)| **state == RequestState::Failed)
                .map(|(id, _)| *id)
                .collect()
        };
        let mut released: Vec<RequestId> = self
            .settled_ids()
            .into_iter()
            .chain(failed)
            .filter(|id| self.release(*id))
            .collect();
        released.sort_unstable();
        released
    }
}

impl<F: AdFetcher> AdSource for AdRegistry<F> {
    fn resolve(&self, id: RequestId) -> Resolution {
        let records = lock(&self.records);
        match records.live.get(&id) {
            Some(RequestRecord {
                renderable: Some(renderable),
                state: RequestState::Loaded,
                kind,
                ..
            }) => Resolution::Loaded {
                renderable: Arc::clone(renderable),
                kind: *kind,
            },
            Some(_) => Resolution::NotReady,
            None if records.retired.get(&id) == Some(&RequestState::Failed) => {
                Resolution::NotReady
            }
            None => Resolution::Unknown,
        }
    }
}

impl<F> Drop for AdRegistry<F> {
    fn drop(&mut self) {
        let records = self.records.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, record) in records.live.drain() {
            if let Some(renderable) = record.renderable {
                renderable.dispose();
            }
        }
    }
}

fn validate(
    kind: RequestKind,
    unit_id: &str,
    sizes: &[AdSizeSpec],
    options: &RequestOptions,
) -> Result<(), RequestError> {
    if unit_id.trim().is_empty() {
        return Err(RequestError::InvalidConfig("unitId is required".into()));
    }
    if sizes.is_empty() {
        return Err(RequestError::InvalidConfig(
            "sizes array is required and must not be empty".into(),
        ));
    }
    if kind == RequestKind::Standard && sizes.len() != 1 {
        return Err(RequestError::InvalidConfig(
            "standard requests take exactly one size".into(),
        ));
    }
    options.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use adcache_dry_tests::{FakeFetcher, Script, Stage};
    use std::future::Future;

    fn registry() -> AdRegistry<FakeFetcher> {
        AdRegistry::new(FakeFetcher::new(Stage::new()))
    }

    #[tokio::test]
    async fn loaded_request_is_cached_with_reported_size() {
        let reg = registry();
        reg.fetcher().push(Script::Load(AdSize::new(300, 250)));
        let ad = reg
            .request_standard("unit", AdSizeSpec::MediumRectangle, RequestOptions::default())
            .await
            .unwrap();
        assert_eq!((ad.width, ad.height), (300, 250));
        assert!(reg.has_request(ad.request_id));
        assert!(reg.lookup(ad.request_id).is_some());
        assert_eq!(reg.state(ad.request_id), Some(RequestState::Loaded));
        let info = reg.info(ad.request_id).unwrap();
        assert!(info.is_loaded);
        assert_eq!(info.unit_id, "unit");
    }

    #[tokio::test]
    async fn fetch_failure_passes_code_through() {
        let reg = registry();
        reg.fetcher()
            .push(Script::Fail(FetchError::new("no-fill", "nothing to show")));
        let err = reg
            .request_standard("unit", AdSizeSpec::Banner, RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "no-fill");
        assert_eq!(err.message(), "nothing to show");

        let failed = reg.fetcher().requests()[0].request_id;
        assert_eq!(reg.state(failed), Some(RequestState::Failed));
        assert!(!reg.has_request(failed));
        assert!(reg.cached_ids().is_empty());
        assert!(matches!(reg.resolve(failed), Resolution::NotReady));
        assert!(reg.release(failed));
        assert_eq!(reg.state(failed), Some(RequestState::Released));
        assert!(matches!(reg.resolve(failed), Resolution::Unknown));
        assert!(!reg.release(failed));
    }

    #[tokio::test]
    async fn failed_requests_leave_no_live_record() {
        let reg = registry();
        for _ in 0..5 {
            reg.fetcher()
                .push(Script::Fail(FetchError::new("no-fill", "nothing to show")));
            assert!(reg
                .request_standard("unit", AdSizeSpec::Banner, RequestOptions::default())
                .await
                .is_err());
        }

        assert!(lock(&reg.records).live.is_empty());
        assert!(reg.settled_ids().is_empty());
        assert!(reg.cached_ids().is_empty());
        assert_eq!(reg.clear_all().len(), 5);
        assert!(reg
            .fetcher()
            .requests()
            .iter()
            .all(|r| reg.state(r.request_id) == Some(RequestState::Released)));
    }

    #[test]
    fn retired_history_forgets_the_oldest_past_capacity() {
        let mut records = Records::with_retired_capacity(2);
        let ids: Vec<RequestId> = (0..3).map(|_| RequestId::generate()).collect();
        for id in &ids {
            records.retire(*id, RequestState::Failed);
        }
        records.retire(ids[2], RequestState::Released);

        assert_eq!(records.retired.len(), 2);
        assert_eq!(records.retired_order.len(), 2);
        assert!(!records.retired.contains_key(&ids[0]));
        assert_eq!(records.retired.get(&ids[2]), Some(&RequestState::Released));
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_fetcher() {
        let reg = registry();
        let err = reg
            .request_standard(" ", AdSizeSpec::Banner, RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_CONFIG);
        assert_eq!(err.message(), "unitId is required");

        let err = reg
            .request_managed("unit", Vec::new(), RequestOptions::default(), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_CONFIG);

        let options = RequestOptions {
            content_url: Some("ftp://example.com".into()),
            ..RequestOptions::default()
        };
        let err = reg
            .request_standard("unit", AdSizeSpec::Banner, options)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_REQUEST_OPTIONS);
        assert!(reg.fetcher().requests().is_empty());
    }

    #[test]
    fn size_strings_map_to_invalid_config() {
        assert_eq!(
            parse_sizes(&["BANNER", "300x250"]).unwrap(),
            vec![
                AdSizeSpec::Banner,
                AdSizeSpec::Custom(AdSize::new(300, 250))
            ]
        );
        let err = parse_sizes(&["banner"]).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_CONFIG);
    }

    #[tokio::test]
    async fn release_disposes_and_is_idempotent() {
        let reg = registry();
        let ad = reg
            .request_standard("unit", AdSizeSpec::Banner, RequestOptions::default())
            .await
            .unwrap();
        let fake = reg.fetcher().last_produced().unwrap();

        assert!(reg.release(ad.request_id));
        assert!(fake.is_disposed());
        assert!(reg.lookup(ad.request_id).is_none());
        assert!(!reg.has_request(ad.request_id));
        assert!(!reg.release(ad.request_id));
        assert!(!reg.release(RequestId::generate()));
    }

    #[tokio::test]
    async fn clear_all_leaves_pending_records() {
        let reg = registry();
        let ready = reg
            .request_standard("unit", AdSizeSpec::Banner, RequestOptions::default())
            .await
            .unwrap();

        reg.fetcher().push(Script::Hold);
        let pending = reg.request_standard("unit", AdSizeSpec::Banner, RequestOptions::default());
        tokio::pin!(pending);
        assert!(poll_once(pending.as_mut()).await.is_none());
        let pending_id = reg.fetcher().requests()[1].request_id;

        assert!(!reg.release(pending_id));
        assert_eq!(reg.clear_all(), vec![ready.request_id]);
        assert_eq!(reg.cached_ids(), vec![pending_id]);

        assert!(reg.fetcher().release_held(AdSize::new(320, 50)));
        let done = pending.await.unwrap();
        assert_eq!(done.request_id, pending_id);
        assert!(reg.has_request(pending_id));
    }

    #[tokio::test]
    async fn drop_disposes_every_loaded_renderable() {
        let reg = registry();
        reg.request_standard("a", AdSizeSpec::Banner, RequestOptions::default())
            .await
            .unwrap();
        reg.request_standard("b", AdSizeSpec::Banner, RequestOptions::default())
            .await
            .unwrap();
        let produced = reg.fetcher().produced();
        drop(reg);
        assert!(produced.iter().all(|r| r.is_disposed()));
    }

    /// Poll a future once, returning its output if it completed.
    async fn poll_once<Fut: Future + Unpin>(fut: Fut) -> Option<Fut::Output> {
        let mut fut = fut;
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut fut).poll(cx) {
                std::task::Poll::Ready(out) => Some(out),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }
}
