// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-surface binding handle.

use crate::controller::{AttachmentController, BindOutcome};
use crate::lock;
use adcache_port::{Container, RequestId};
use std::sync::{Arc, Mutex};

/// Ties one display container to whichever identifier the host sets on it.
///
/// Dropping the binding unbinds the container.
pub struct ContainerBinding {
    controller: Arc<AttachmentController>,
    container: Arc<dyn Container>,
    identifier: Mutex<Option<RequestId>>,
}

impl ContainerBinding {
    /// Binding for `container`, initially showing nothing.
    pub fn new(controller: Arc<AttachmentController>, container: Arc<dyn Container>) -> Self {
        Self {
            controller,
            container,
            identifier: Mutex::new(None),
        }
    }

    /// Show `identifier`, or clear the container with `None`.
    ///
    /// Setting the identifier already shown re-reports the loaded size.
    pub async fn set_identifier(&self, identifier: Option<RequestId>) -> Option<BindOutcome> {
        *lock(&self.identifier) = identifier;
        match identifier {
            Some(id) => Some(self.controller.bind(id, &self.container).await),
            None => {
                self.controller.unbind(&self.container);
                None
            }
        }
    }

    /// Identifier last set on this binding.
    pub fn identifier(&self) -> Option<RequestId> {
        *lock(&self.identifier)
    }

    /// Record a manual impression (managed requests only).
    pub fn record_manual_impression(&self) -> bool {
        self.controller
            .record_manual_impression(self.container.id())
    }

    /// The bound container.
    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }
}

impl Drop for ContainerBinding {
    fn drop(&mut self) {
        self.controller.unbind(&self.container);
    }
}
