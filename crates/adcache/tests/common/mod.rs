// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::unwrap_used)]

use adcache::{AdCache, AdSizeSpec, Container, RequestId, RequestOptions};
use adcache_app_core::settings::{AttachmentMode, CacheSettings};
use adcache_dry_tests::{FakeContainer, FakeFetcher, FakeRenderable, Stage};
use std::sync::Arc;

pub struct World {
    pub stage: Arc<Stage>,
    pub cache: AdCache<FakeFetcher>,
}

pub fn world() -> World {
    world_with(CacheSettings::default())
}

pub fn fail_fast_world() -> World {
    let mut settings = CacheSettings::default();
    settings.attachment.mode = AttachmentMode::FailFast;
    world_with(settings)
}

pub fn world_with(settings: CacheSettings) -> World {
    let stage = Stage::new();
    let cache = AdCache::new(FakeFetcher::new(Arc::clone(&stage)), settings);
    World { stage, cache }
}

impl World {
    pub fn container(&self, id: u64) -> (Arc<FakeContainer>, Arc<dyn Container>) {
        let fake = FakeContainer::new(Arc::clone(&self.stage), id);
        let port = fake.as_container();
        (fake, port)
    }

    pub async fn load_standard(&self) -> (RequestId, Arc<FakeRenderable>) {
        let ad = self
            .cache
            .request_standard("ca-app-pub/banner", AdSizeSpec::Banner, RequestOptions::default())
            .await
            .unwrap();
        (ad.request_id, self.cache.registry().fetcher().last_produced().unwrap())
    }

    pub async fn load_managed(&self, manual_impressions: bool) -> (RequestId, Arc<FakeRenderable>) {
        let ad = self
            .cache
            .request_managed(
                "/6499/example/banner",
                vec![AdSizeSpec::Banner, AdSizeSpec::MediumRectangle],
                RequestOptions::default(),
                manual_impressions,
            )
            .await
            .unwrap();
        (ad.request_id, self.cache.registry().fetcher().last_produced().unwrap())
    }
}
