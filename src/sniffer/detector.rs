//! Bus-attached URL detection for one process.

use std::sync::{Arc, Mutex, PoisonError};

use super::{DetectedUrl, UrlSniffer};
use crate::bus::{Event, EventBus, SubscriptionId, Topic, WeakEventBus};
use crate::process::StreamKind;
use crate::supervisor::ProcessId;

#[derive(Debug, Default)]
struct Subscriptions {
    output: Option<SubscriptionId>,
    stopped: Option<SubscriptionId>,
}

impl Subscriptions {
    fn detach(&mut self, bus: &EventBus) {
        if let Some(id) = self.output.take() {
            bus.unsubscribe(Topic::Output, id);
        }
        if let Some(id) = self.stopped.take() {
            bus.unsubscribe(Topic::Stopped, id);
        }
    }
}

/// Watches one process's output events for a server URL.
///
/// The detector removes both of its subscriptions when it sees a `Stopped`
/// event for its process, so a restarted process never has two detectors.
#[derive(Debug, Clone)]
pub struct UrlDetector {
    bus: WeakEventBus,
    subscriptions: Arc<Mutex<Subscriptions>>,
}

impl UrlDetector {
    /// Subscribe a detector for `process_id`.
    ///
    /// `on_detect` runs on the publisher's thread each time the detected URL
    /// changes. Stderr is only scanned when `scan_stderr` is set.
    pub fn attach<F>(
        bus: &EventBus,
        sniffer: Arc<UrlSniffer>,
        process_id: ProcessId,
        scan_stderr: bool,
        on_detect: F,
    ) -> Self
    where
        F: Fn(DetectedUrl) + Send + Sync + 'static,
    {
        let subscriptions = Arc::new(Mutex::new(Subscriptions::default()));
        let last_url: Mutex<Option<String>> = Mutex::new(None);

        let output = bus.subscribe(Topic::Output, move |event| {
            let Event::Output(output) = event else {
                return;
            };
            if output.process_id != process_id
                || (output.stream == StreamKind::Stderr && !scan_stderr)
            {
                return;
            }
            let Some(detected) = sniffer.detect(&output.chunk) else {
                return;
            };

            let mut last = last_url.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(detected.url.as_str()) {
                return;
            }
            *last = Some(detected.url.clone());
            drop(last);

            tracing::info!(%process_id, url = %detected.url, "Detected server URL");
            on_detect(detected);
        });

        let weak = bus.downgrade();
        let on_stop = Arc::clone(&subscriptions);
        let stopped = bus.subscribe(Topic::Stopped, move |event| {
            if event.process_id() != Some(process_id) {
                return;
            }
            if let Some(bus) = weak.upgrade() {
                on_stop
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .detach(&bus);
                tracing::debug!(%process_id, "URL detector detached");
            }
        });

        {
            let mut guard = subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
            guard.output = Some(output);
            guard.stopped = Some(stopped);
        }

        Self {
            bus: bus.downgrade(),
            subscriptions,
        }
    }

    /// Remove the detector's subscriptions. Safe to call more than once.
    pub fn detach(&self) {
        if let Some(bus) = self.bus.upgrade() {
            self.subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .detach(&bus);
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions.output.is_some() || subscriptions.stopped.is_some()
    }
}
