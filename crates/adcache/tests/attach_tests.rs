// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used)]
//! Attachment controller behaviour against fake containers.

mod common;

use adcache::{codes, AdSize, AttachPath, BindOutcome, Notification, RequestId};
use adcache_app_core::diagnostics::DiagnosticLevel;
use adcache_dry_tests::{DirectAttach, Removal, Script};
use adcache_app_core::settings::CacheSettings;
use adcache_port::LifecycleEvent;
use common::{fail_fast_world, world, world_with};
use std::sync::Arc;
use std::time::Duration;

const BANNER: AdSize = AdSize::new(320, 50);

#[tokio::test]
async fn bind_attaches_and_reports_loaded_size() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, port) = w.container(1);

    let outcome = w.cache.bind(id, &port).await;

    assert_eq!(
        outcome,
        BindOutcome::Attached {
            size: BANNER,
            path: AttachPath::Direct
        }
    );
    assert!(c1.holds(&fake));
    assert_eq!(c1.received(), vec![Notification::loaded(BANNER)]);
    assert_eq!(c1.layouts(), 1);
    assert_eq!(w.cache.controller().bound_request(port.id()), Some(id));
}

#[tokio::test]
async fn loaded_size_prefers_the_measured_layout() {
    let w = world();
    let (id, _fake) = w.load_standard().await;
    let (c1, port) = w.container(1);
    c1.set_measured(Some(AdSize::new(360, 56)));

    let outcome = w.cache.bind(id, &port).await;

    assert_eq!(
        outcome,
        BindOutcome::Attached {
            size: AdSize::new(360, 56),
            path: AttachPath::Direct
        }
    );
}

#[tokio::test]
async fn moving_between_containers_keeps_one_parent_and_moves_events() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    let (c2, p2) = w.container(2);

    w.cache.bind(id, &p1).await;
    let outcome = w.cache.bind(id, &p2).await;

    assert!(matches!(outcome, BindOutcome::Attached { path: AttachPath::Direct, .. }));
    assert!(c2.holds(&fake));
    assert!(!c1.has_child());
    assert_eq!(w.stage.parented_count(), 1);
    assert_eq!(w.cache.controller().session_count(), 1);
    assert_eq!(w.cache.controller().bound_request(p1.id()), None);

    c1.take_received();
    c2.take_received();
    fake.emit(LifecycleEvent::Clicked);
    assert!(c1.received().is_empty());
    assert_eq!(c2.received(), vec![Notification::AdClicked]);
}

#[tokio::test]
async fn racing_binds_leave_exactly_one_holder() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    let (c2, p2) = w.container(2);

    let (first, second) = tokio::join!(w.cache.bind(id, &p1), w.cache.bind(id, &p2));

    assert_eq!(first, BindOutcome::Superseded);
    assert!(matches!(second, BindOutcome::Attached { .. }));
    assert!(c2.holds(&fake));
    assert!(!c1.has_child());
    assert!(c1.received().is_empty());
    assert_eq!(c2.loaded_count(), 1);
    assert_eq!(w.stage.parented_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn older_bind_yields_to_a_newer_bind_elsewhere_while_detaching() {
    let mut settings = CacheSettings::default();
    settings.attachment.detach_retry_delay_ms = 10;
    let w = world_with(settings);
    let (id, fake) = w.load_standard().await;
    let (c0, p0) = w.container(10);
    let (c1, p1) = w.container(1);
    let (c2, p2) = w.container(2);
    w.cache.bind(id, &p0).await;
    c0.set_removal(Removal::AfterRequests(3));

    let (older, newer) = tokio::join!(w.cache.bind(id, &p1), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        w.cache.bind(id, &p2).await
    });

    assert_eq!(older, BindOutcome::Superseded);
    assert_eq!(
        newer,
        BindOutcome::Attached {
            size: BANNER,
            path: AttachPath::Direct
        }
    );
    assert!(c2.holds(&fake));
    assert!(!c1.has_child());
    assert!(c1.received().is_empty());
    assert_eq!(c2.received(), vec![Notification::loaded(BANNER)]);
    assert_eq!(c0.remove_requests(), 3);
    assert_eq!(w.stage.parented_count(), 1);
    assert_eq!(w.cache.controller().bound_request(p2.id()), Some(id));
    assert_eq!(w.cache.controller().session_count(), 1);
}

#[tokio::test]
async fn container_may_unbind_itself_from_a_replayed_callback() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    fake.set_replay_on_install(LifecycleEvent::Impression);
    let controller = Arc::clone(w.cache.controller());
    let port = Arc::downgrade(&p1);
    c1.set_on_dispatch(Arc::new(move |n: &Notification| {
        if *n == Notification::AdImpression {
            if let Some(port) = port.upgrade() {
                controller.unbind(&port);
            }
        }
    }));

    let outcome = w.cache.bind(id, &p1).await;

    assert_eq!(outcome, BindOutcome::Superseded);
    assert_eq!(c1.received(), vec![Notification::AdImpression]);
    assert!(!c1.has_child());
    assert!(!fake.has_lifecycle_listener());
    assert_eq!(w.cache.controller().session_count(), 0);
}

#[tokio::test]
async fn rebinding_the_same_id_reports_again_without_reparenting() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);

    w.cache.bind(id, &p1).await;
    let again = w.cache.bind(id, &p1).await;

    assert_eq!(again, BindOutcome::AlreadyAttached { size: BANNER });
    assert_eq!(c1.loaded_count(), 2);
    assert_eq!(c1.remove_requests(), 0);
    assert_eq!(c1.force_detaches(), 0);
    assert_eq!(fake.install_count(), 1);
    assert!(c1.holds(&fake));
}

#[tokio::test]
async fn latest_bind_on_a_container_wins() {
    let w = world();
    let (first_id, first) = w.load_standard().await;
    let (second_id, second) = w.load_standard().await;
    let (c0, p0) = w.container(10);
    let (c1, p1) = w.container(1);

    w.cache.bind(first_id, &p0).await;
    c0.set_removal(Removal::AfterRequests(2));

    let (a, b) = tokio::join!(w.cache.bind(first_id, &p1), w.cache.bind(second_id, &p1));

    assert_eq!(a, BindOutcome::Superseded);
    assert!(matches!(b, BindOutcome::Attached { .. }));
    assert!(c1.holds(&second));
    assert!(!c1.holds(&first));
    assert_eq!(c1.received(), vec![Notification::loaded(BANNER)]);
    assert_eq!(w.cache.controller().bound_request(p1.id()), Some(second_id));
}

#[tokio::test]
async fn deferred_removal_is_retried_until_the_parent_lets_go() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    let (c2, p2) = w.container(2);
    w.cache.bind(id, &p1).await;
    c1.set_removal(Removal::AfterRequests(2));

    let outcome = w.cache.bind(id, &p2).await;

    assert!(matches!(outcome, BindOutcome::Attached { path: AttachPath::Direct, .. }));
    assert_eq!(c1.remove_requests(), 2);
    assert_eq!(c1.force_detaches(), 0);
    assert!(c2.holds(&fake));
    assert!(w.cache.diagnostics().is_empty());
}

#[tokio::test]
async fn stuck_parent_is_force_detached() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    let (c2, p2) = w.container(2);
    w.cache.bind(id, &p1).await;
    c1.set_removal(Removal::Stuck);

    let outcome = w.cache.bind(id, &p2).await;

    assert_eq!(
        outcome,
        BindOutcome::Attached {
            size: BANNER,
            path: AttachPath::ForcedDetach
        }
    );
    assert_eq!(c1.remove_requests(), 3);
    assert_eq!(c1.force_detaches(), 1);
    assert!(!c1.has_child());
    assert!(c2.holds(&fake));

    let titles: Vec<_> = w.cache.diagnostics().into_iter().map(|d| d.title).collect();
    assert_eq!(titles, vec!["detach gave up", "forced detach"]);
}

#[tokio::test]
async fn stale_parent_pointer_falls_back_to_wrapper() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    c1.set_direct_attach(DirectAttach::AlwaysParented);

    let outcome = w.cache.bind(id, &p1).await;

    assert_eq!(
        outcome,
        BindOutcome::Attached {
            size: BANNER,
            path: AttachPath::Wrapped
        }
    );
    assert!(c1.holds(&fake));
    assert!(c1.is_wrapped());

    fake.emit(LifecycleEvent::Impression);
    assert_eq!(c1.received().last(), Some(&Notification::AdImpression));
}

#[tokio::test]
async fn refused_wrapper_reports_attachment_failure() {
    let w = world();
    let (id, _fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    c1.set_direct_attach(DirectAttach::AlwaysParented);
    c1.set_accept_wrapped(false);

    let outcome = w.cache.bind(id, &p1).await;

    assert_eq!(
        outcome,
        BindOutcome::Failed {
            code: codes::VIEW_ATTACHMENT_FAILED
        }
    );
    assert!(!c1.has_child());
    assert_eq!(c1.failure_codes(), vec![codes::VIEW_ATTACHMENT_FAILED]);
    assert_eq!(w.cache.controller().session_count(), 0);
    assert!(w
        .cache
        .diagnostics()
        .iter()
        .any(|d| d.level == DiagnosticLevel::Error));
    // Still cached and bindable elsewhere.
    assert!(w.cache.has_request(id));
}

#[tokio::test]
async fn non_parent_rejection_fails_without_forcing() {
    let w = world();
    let (id, _fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    let (c2, p2) = w.container(2);
    w.cache.bind(id, &p1).await;
    c2.set_direct_attach(DirectAttach::Reject);

    let outcome = w.cache.bind(id, &p2).await;

    assert_eq!(
        outcome,
        BindOutcome::Failed {
            code: codes::VIEW_ATTACHMENT_FAILED
        }
    );
    assert_eq!(c1.force_detaches(), 0);
    assert!(!c2.has_child());
}

#[tokio::test]
async fn fail_fast_moves_a_cooperative_renderable() {
    let w = fail_fast_world();
    let (id, fake) = w.load_standard().await;
    let (_c1, p1) = w.container(1);
    let (c2, p2) = w.container(2);
    w.cache.bind(id, &p1).await;

    let outcome = w.cache.bind(id, &p2).await;

    assert!(matches!(outcome, BindOutcome::Attached { path: AttachPath::Direct, .. }));
    assert!(c2.holds(&fake));
}

#[tokio::test]
async fn fail_fast_gives_up_on_a_stuck_parent() {
    let w = fail_fast_world();
    let (id, _fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    let (c2, p2) = w.container(2);
    w.cache.bind(id, &p1).await;
    c1.set_removal(Removal::Stuck);

    let outcome = w.cache.bind(id, &p2).await;

    assert_eq!(
        outcome,
        BindOutcome::Failed {
            code: codes::VIEW_ATTACHMENT_FAILED
        }
    );
    assert_eq!(c1.remove_requests(), 1);
    assert_eq!(c1.force_detaches(), 0);
    assert!(!c2.has_child());
}

#[tokio::test]
async fn fail_fast_skips_the_wrapper() {
    let w = fail_fast_world();
    let (id, _fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    c1.set_direct_attach(DirectAttach::AlwaysParented);

    let outcome = w.cache.bind(id, &p1).await;

    assert_eq!(
        outcome,
        BindOutcome::Failed {
            code: codes::VIEW_ATTACHMENT_FAILED
        }
    );
    assert!(!c1.is_wrapped());
}

#[tokio::test]
async fn unknown_id_clears_the_container() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    w.cache.bind(id, &p1).await;

    let outcome = w.cache.bind(RequestId::generate(), &p1).await;

    assert_eq!(
        outcome,
        BindOutcome::Failed {
            code: codes::AD_NOT_FOUND
        }
    );
    assert!(!c1.has_child());
    assert!(!fake.has_lifecycle_listener());
    assert_eq!(c1.failure_codes(), vec![codes::AD_NOT_FOUND]);
}

#[tokio::test]
async fn failed_request_is_not_ready() {
    let w = world();
    w.cache
        .registry()
        .fetcher()
        .push(Script::Fail(adcache::FetchError::new("no-fill", "none")));
    let err = w
        .cache
        .request_standard("unit", adcache::AdSizeSpec::Banner, Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "no-fill");
    let failed = w.cache.registry().fetcher().requests()[0].request_id;
    let (c1, p1) = w.container(1);

    let outcome = w.cache.bind(failed, &p1).await;

    assert_eq!(
        outcome,
        BindOutcome::Failed {
            code: codes::CACHED_AD_NOT_READY
        }
    );
    assert_eq!(c1.failure_codes(), vec![codes::CACHED_AD_NOT_READY]);
}

#[tokio::test]
async fn released_id_is_not_found_and_its_container_is_emptied() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    w.cache.bind(id, &p1).await;

    assert!(w.cache.release(id));
    assert!(fake.is_disposed());
    assert!(!c1.has_child());
    assert_eq!(w.cache.controller().session_count(), 0);

    let outcome = w.cache.bind(id, &p1).await;
    assert_eq!(
        outcome,
        BindOutcome::Failed {
            code: codes::AD_NOT_FOUND
        }
    );
}

#[tokio::test]
async fn dead_container_receives_nothing() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    w.cache.bind(id, &p1).await;
    c1.take_received();

    c1.kill();
    fake.emit(LifecycleEvent::Clicked);
    fake.emit_paid(1_000, 1, "USD");

    assert!(c1.received().is_empty());
}

#[tokio::test]
async fn reload_and_failure_callbacks_are_forwarded() {
    let w = world();
    let (id, fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    w.cache.bind(id, &p1).await;
    c1.take_received();

    fake.resize(AdSize::new(320, 100));
    fake.emit(LifecycleEvent::Loaded);
    fake.emit(LifecycleEvent::FailedToLoad {
        code: 2,
        message: "offline".into(),
    });

    assert_eq!(
        c1.received(),
        vec![
            Notification::loaded(AdSize::new(320, 100)),
            Notification::failed("network-error", "offline"),
        ]
    );
}

#[tokio::test]
async fn manual_impressions_reach_managed_renderables_only() {
    let w = world();
    let (managed, managed_fake) = w.load_managed(true).await;
    let (standard, standard_fake) = w.load_standard().await;
    let (_c1, p1) = w.container(1);
    let (_c2, p2) = w.container(2);

    let managed_binding = w.cache.binding(p1);
    let standard_binding = w.cache.binding(p2);
    managed_binding.set_identifier(Some(managed)).await;
    standard_binding.set_identifier(Some(standard)).await;

    assert!(managed_binding.record_manual_impression());
    assert!(!standard_binding.record_manual_impression());
    assert_eq!(managed_fake.manual_impressions(), 1);
    assert_eq!(standard_fake.manual_impressions(), 0);

    let request = &w.cache.registry().fetcher().requests()[0];
    assert!(request.manual_impressions);
}

#[tokio::test]
async fn app_events_flow_for_managed_requests_only() {
    let w = world();
    let (managed, managed_fake) = w.load_managed(false).await;
    let (standard, standard_fake) = w.load_standard().await;
    let (c1, p1) = w.container(1);
    let (_c2, p2) = w.container(2);
    w.cache.bind(managed, &p1).await;
    w.cache.bind(standard, &p2).await;
    c1.take_received();

    managed_fake.emit_app_event("color", Some("red"));

    assert_eq!(
        c1.received(),
        vec![Notification::AppEvent {
            name: "color".into(),
            data: Some("red".into())
        }]
    );
    assert!(managed_fake.has_app_event_listener());
    assert!(!standard_fake.has_app_event_listener());
}
