use std::time::{Duration, Instant};

use crate::model::{ItemKind, RunStatistics};

#[derive(Debug)]
pub struct ProgressAggregator {
    stats: RunStatistics,
    started: Instant,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self {
            stats: RunStatistics::default(),
            started: Instant::now(),
        }
    }

    pub fn increment_directories_seen(&mut self) {
        self.stats.directories_seen += 1;
    }

    pub fn increment_files_seen(&mut self) {
        self.stats.files_seen += 1;
    }

    pub fn increment_directories_changed(&mut self) {
        self.stats.directories_changed += 1;
    }

    pub fn increment_files_changed(&mut self) {
        self.stats.files_changed += 1;
    }

    pub fn increment_exceptions(&mut self) {
        self.stats.exceptions += 1;
    }

    pub(crate) fn record_seen(&mut self, kind: ItemKind) {
        match kind {
            ItemKind::Directory => self.increment_directories_seen(),
            ItemKind::File => self.increment_files_seen(),
        }
    }

    pub(crate) fn record_changed(&mut self, kind: ItemKind) {
        match kind {
            ItemKind::Directory => self.increment_directories_changed(),
            ItemKind::File => self.increment_files_changed(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn summary(&self) -> RunStatistics {
        self.stats
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}
