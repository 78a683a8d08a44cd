//! Route changes requested by the login flows.

use parking_lot::Mutex;
use tracing::info;

/// Performs navigation to an application route.
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// Navigator that only records where it was sent.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.visits.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.visits.lock().len()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: &str) {
        info!(target_route = target, "Navigating");
        self.visits.lock().push(target.to_string());
    }
}
