// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted fetch collaborator.

use crate::stage::{FakeRenderable, Stage};
use adcache_port::{AdFetcher, AdSize, FetchError, FetchRequest, Renderable};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Outcome of one scripted fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Script {
    /// Produce a renderable of this size.
    Load(AdSize),
    /// Fail with this error.
    Fail(FetchError),
    /// Stay pending until [`FakeFetcher::release_held`] or [`FakeFetcher::fail_held`].
    Hold,
}

type HeldReply = oneshot::Sender<Result<AdSize, FetchError>>;

struct FetcherState {
    queue: VecDeque<Script>,
    fallback: Script,
    requests: Vec<FetchRequest>,
    produced: Vec<Arc<FakeRenderable>>,
    held: VecDeque<HeldReply>,
}

/// [`AdFetcher`] that plays back a script, then repeats a fallback outcome.
pub struct FakeFetcher {
    stage: Arc<Stage>,
    state: Mutex<FetcherState>,
}

impl FakeFetcher {
    /// Fetcher that loads 320x50 banners unless scripted otherwise.
    pub fn new(stage: Arc<Stage>) -> Self {
        Self {
            stage,
            state: Mutex::new(FetcherState {
                queue: VecDeque::new(),
                fallback: Script::Load(AdSize::new(320, 50)),
                requests: Vec::new(),
                produced: Vec::new(),
                held: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FetcherState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue one outcome for the next fetch.
    pub fn push(&self, script: Script) {
        self.state().queue.push_back(script);
    }

    /// Outcome used once the queue is empty.
    pub fn set_fallback(&self, script: Script) {
        self.state().fallback = script;
    }

    /// Resolve the oldest held fetch with a renderable of `size`.
    pub fn release_held(&self, size: AdSize) -> bool {
        self.state()
            .held
            .pop_front()
            .is_some_and(|tx| tx.send(Ok(size)).is_ok())
    }

    /// Fail the oldest held fetch.
    pub fn fail_held(&self, error: FetchError) -> bool {
        self.state()
            .held
            .pop_front()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Fetches currently held open.
    pub fn held_count(&self) -> usize {
        self.state().held.len()
    }

    /// Every request seen, in order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.state().requests.clone()
    }

    /// Every renderable produced, in order.
    pub fn produced(&self) -> Vec<Arc<FakeRenderable>> {
        self.state().produced.clone()
    }

    /// Most recently produced renderable.
    pub fn last_produced(&self) -> Option<Arc<FakeRenderable>> {
        self.state().produced.last().cloned()
    }
}

enum Pending {
    Ready(Result<AdSize, FetchError>),
    Held(oneshot::Receiver<Result<AdSize, FetchError>>),
}

impl AdFetcher for FakeFetcher {
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<Arc<dyn Renderable>, FetchError>> + Send {
        let pending = {
            let mut st = self.state();
            st.requests.push(request);
            let step = st.queue.pop_front().unwrap_or_else(|| st.fallback.clone());
            match step {
                Script::Load(size) => Pending::Ready(Ok(size)),
                Script::Fail(err) => Pending::Ready(Err(err)),
                Script::Hold => {
                    let (tx, rx) = oneshot::channel();
                    st.held.push_back(tx);
                    Pending::Held(rx)
                }
            }
        };
        async move {
            let outcome = match pending {
                Pending::Ready(outcome) => outcome,
                Pending::Held(rx) => rx.await.unwrap_or_else(|_| {
                    Err(FetchError::new("fetch_cancelled", "held fetch was dropped"))
                }),
            };
            let size = match outcome {
                Ok(size) => size,
                Err(err) => return Err(err),
            };
            let renderable = FakeRenderable::new(Arc::clone(&self.stage), size);
            self.state().produced.push(Arc::clone(&renderable));
            Ok(renderable as Arc<dyn Renderable>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcache_port::{AdSizeSpec, RequestId, RequestKind, RequestOptions};

    fn request() -> FetchRequest {
        FetchRequest {
            request_id: RequestId::generate(),
            kind: RequestKind::Standard,
            unit_id: "unit".into(),
            sizes: vec![AdSizeSpec::Banner],
            options: RequestOptions::default(),
            manual_impressions: false,
        }
    }

    #[tokio::test]
    async fn script_plays_in_order_then_falls_back() {
        let fetcher = FakeFetcher::new(Stage::new());
        fetcher.push(Script::Fail(FetchError::new("no-fill", "nothing")));
        fetcher.push(Script::Load(AdSize::new(300, 250)));

        let err = fetcher.fetch(request()).await.err().unwrap();
        assert_eq!(err.code, "no-fill");
        let second = fetcher.fetch(request()).await.unwrap();
        assert_eq!(second.size(), AdSize::new(300, 250));
        let third = fetcher.fetch(request()).await.unwrap();
        assert_eq!(third.size(), AdSize::new(320, 50));
        assert_eq!(fetcher.requests().len(), 3);
        assert_eq!(fetcher.produced().len(), 2);
    }

    #[tokio::test]
    async fn held_fetch_resolves_when_released() {
        let fetcher = FakeFetcher::new(Stage::new());
        fetcher.push(Script::Hold);
        let fut = fetcher.fetch(request());
        assert_eq!(fetcher.held_count(), 1);
        assert!(fetcher.release_held(AdSize::new(728, 90)));
        let renderable = fut.await.unwrap();
        assert_eq!(renderable.size(), AdSize::new(728, 90));
    }
}
