use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::models::DiscoveryReport;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryLogEntry {
    pub app_id: String,
    pub manifest_url: String,
    pub selected_version: Option<String>,
    pub outcome: String,
    pub error: Option<String>,
    pub finished_at_unix_ms: u64,
}

impl From<&DiscoveryReport> for DiscoveryLogEntry {
    fn from(report: &DiscoveryReport) -> Self {
        let (outcome, error) = match &report.outcome {
            Ok(success) => (success.log_label().to_string(), None),
            Err(error) => (error.tag().to_string(), Some(error.to_string())),
        };

        Self {
            app_id: report.app.to_string(),
            manifest_url: report.manifest_url.clone(),
            selected_version: report.selected_version.as_ref().map(ToString::to_string),
            outcome,
            error,
            finished_at_unix_ms: unix_ms(report.finished_at),
        }
    }
}

/// Most recent discovery results, oldest first. Holds at most `capacity`
/// entries.
#[derive(Clone, Debug)]
pub struct DiscoveryLog {
    capacity: usize,
    entries: VecDeque<DiscoveryLogEntry>,
}

impl DiscoveryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&mut self, report: &DiscoveryReport) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DiscoveryLogEntry::from(report));
    }

    pub fn entries(&self) -> Vec<DiscoveryLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unix_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
