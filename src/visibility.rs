//! Host visibility signal.
//!
//! The synchronizer only needs two capabilities from its host: read the
//! current visibility and wait for a transition. In a browser host the
//! signal is page visibility; a headless host simply never reports hidden.
//! The engine does not assume any particular source.

use std::sync::Arc;

use tokio::sync::watch;

/// Read side of the host's visibility signal.
#[derive(Debug, Clone)]
pub struct VisibilityMonitor {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for monitors with no feeding handle.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
    decayed: bool,
}

/// Write side, held by whatever owns the host signal.
#[derive(Debug, Clone)]
pub struct VisibilityHandle {
    tx: watch::Sender<bool>,
}

impl VisibilityMonitor {
    /// A monitor that always reports visible and never transitions.
    pub fn always_visible() -> Self {
        let (tx, rx) = watch::channel(true);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
            decayed: false,
        }
    }

    /// A monitor fed by a [`VisibilityHandle`]. Starts visible.
    pub fn pair() -> (VisibilityHandle, VisibilityMonitor) {
        let (tx, rx) = watch::channel(true);
        (
            VisibilityHandle { tx },
            VisibilityMonitor {
                rx,
                _keepalive: None,
                decayed: false,
            },
        )
    }

    /// Current visibility.
    pub fn is_visible(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next visibility transition and return the new value.
    ///
    /// If the feeding handle is dropped the signal decays to visible: one
    /// final transition is reported (so a suspended scheduler can resume),
    /// then this pends forever.
    pub async fn transition(&mut self) -> bool {
        if self.decayed {
            return std::future::pending().await;
        }
        match self.rx.changed().await {
            Ok(()) => *self.rx.borrow_and_update(),
            Err(_) => {
                self.decayed = true;
                true
            }
        }
    }
}

impl VisibilityHandle {
    /// Update the host visibility. Only actual transitions wake waiters.
    pub fn set_visible(&self, visible: bool) {
        self.tx.send_if_modified(|current| {
            if *current != visible {
                *current = visible;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_always_visible_never_transitions() {
        let mut monitor = VisibilityMonitor::always_visible();
        assert!(monitor.is_visible());

        let waited =
            tokio::time::timeout(Duration::from_millis(20), monitor.transition()).await;
        assert!(waited.is_err(), "no transition should ever arrive");
    }

    #[tokio::test]
    async fn test_pair_reports_transitions() {
        let (handle, mut monitor) = VisibilityMonitor::pair();
        assert!(monitor.is_visible());

        handle.set_visible(false);
        assert!(!monitor.transition().await);
        assert!(!monitor.is_visible());

        handle.set_visible(true);
        assert!(monitor.transition().await);
    }

    #[tokio::test]
    async fn test_redundant_set_does_not_wake() {
        let (handle, mut monitor) = VisibilityMonitor::pair();

        // Already visible; setting visible again is not a transition.
        handle.set_visible(true);
        let waited =
            tokio::time::timeout(Duration::from_millis(20), monitor.transition()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_dropped_handle_decays_to_visible() {
        let (handle, mut monitor) = VisibilityMonitor::pair();
        handle.set_visible(false);
        assert!(!monitor.transition().await);

        drop(handle);
        assert!(monitor.transition().await);

        // After decay there are no further events.
        let waited =
            tokio::time::timeout(Duration::from_millis(20), monitor.transition()).await;
        assert!(waited.is_err());
    }
}
