//! Visibility-driven suspend/resume.
//!
//! A [`VisibilityController`] is the application's single source of truth for
//! whether the view is visible (the browser's `visibilitychange`, a desktop
//! window being minimised, a mobile app moving to the background). Every
//! subscription holds a [`watch::Receiver`] of it:
//!
//! - **Hidden**: the subscription closes its transport, cancels its retry
//!   timer, polling interval and in-flight fetch, and goes `Disconnected`.
//!   Nothing is scheduled while hidden.
//! - **Visible**: the attempt counter resets and a fresh stream open is
//!   attempted, even if the subscription had fallen back to polling.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Visibility of the consuming view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Foreground; subscriptions run.
    #[default]
    Visible,
    /// Background; subscriptions are fully dormant.
    Hidden,
}

/// Cloneable handle publishing [`Visibility`] transitions.
#[derive(Debug, Clone)]
pub struct VisibilityController {
    tx: Arc<watch::Sender<Visibility>>,
}

impl Default for VisibilityController {
    fn default() -> Self {
        Self::new(Visibility::Visible)
    }
}

impl VisibilityController {
    /// A controller starting in `initial`.
    pub fn new(initial: Visibility) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a transition. Setting the current value again is a no-op.
    /// Returns whether the value changed.
    pub fn set(&self, visibility: Visibility) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
        if changed {
            tracing::debug!(?visibility, "visibility changed");
        }
        changed
    }

    /// Shorthand for `set(Visibility::Hidden)`.
    pub fn hide(&self) -> bool {
        self.set(Visibility::Hidden)
    }

    /// Shorthand for `set(Visibility::Visible)`.
    pub fn show(&self) -> bool {
        self.set(Visibility::Visible)
    }

    /// Current visibility.
    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    /// Whether the view is hidden.
    pub fn is_hidden(&self) -> bool {
        self.current() == Visibility::Hidden
    }

    /// Receiver handed to subscriptions.
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}
