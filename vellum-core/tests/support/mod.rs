//! Shared fixtures for integration tests.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vellum_core::pipeline::ChangeObserver;
use vellum_model::ChangeEvent;

/// Observer that records every change event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events_for(&self, path: &Path) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.path == path)
            .cloned()
            .collect()
    }
}

impl ChangeObserver for RecordingObserver {
    fn on_file_change(&self, event: &ChangeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Poll until `predicate` holds, failing after `timeout`.
pub async fn wait_until<F>(timeout: Duration, what: &str, mut predicate: F)
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
