// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded detach-with-retry state machine.

use adcache_app_core::settings::AttachmentSettings;
use adcache_port::Renderable;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Progress of detaching a renderable from its current parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetachState {
    /// Detachment requested; `attempt` counts requests so far (1-based).
    Detaching {
        /// Requests issued so far.
        attempt: u32,
    },
    /// The renderable reports no parent.
    Detached,
    /// Still parented after every allowed attempt.
    GiveUp {
        /// Requests issued.
        attempts: u32,
    },
    /// The bind stopped wanting the renderable before it was detached.
    Abandoned {
        /// Requests issued before stopping.
        attempts: u32,
    },
}

impl DetachState {
    /// Advance after observing the parent at the end of an attempt.
    pub fn advance(self, still_parented: bool, max_attempts: u32) -> Self {
        match self {
            Self::Detaching { .. } if !still_parented => Self::Detached,
            Self::Detaching { attempt } if attempt >= max_attempts => {
                Self::GiveUp { attempts: attempt }
            }
            Self::Detaching { attempt } => Self::Detaching {
                attempt: attempt + 1,
            },
            done => done,
        }
    }

    /// True for every state but `Detaching`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Detaching { .. })
    }
}

/// Let the host run removals and layout before re-checking.
pub(crate) async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

/// Ask the renderable's parent to let go, re-asking up to the configured limit.
///
/// `still_wanted` is consulted before every request; once it returns false the
/// loop stops with `Abandoned` and never touches the parent again. Returns
/// `Detached` immediately for an unparented renderable.
pub async fn detach_with_retry(
    renderable: &Arc<dyn Renderable>,
    settings: &AttachmentSettings,
    still_wanted: impl Fn() -> bool,
) -> DetachState {
    if renderable.parent().is_none() {
        return DetachState::Detached;
    }
    let max_attempts = settings.effective_detach_attempts();
    if max_attempts == 0 {
        return DetachState::GiveUp { attempts: 0 };
    }

    let mut state = DetachState::Detaching { attempt: 1 };
    while let DetachState::Detaching { attempt } = state {
        if !still_wanted() {
            debug!(attempt, "detach abandoned");
            return DetachState::Abandoned {
                attempts: attempt - 1,
            };
        }
        debug!(attempt, "requesting detach");
        renderable.detach_from_parent();
        pause(settings.detach_retry_delay()).await;
        state = state.advance(renderable.parent().is_some(), max_attempts);
    }
    state
}
