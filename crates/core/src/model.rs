use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

pub const REPORT_VERSION: &str = "1.0.0";

/// Opaque security principal identifier (a string SID on Windows, a numeric uid on Unix).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipClassification {
    Resolvable,
    Orphaned,
    Unknown,
}

impl OwnershipClassification {
    pub fn label(self) -> &'static str {
        match self {
            OwnershipClassification::Resolvable => "Valid",
            OwnershipClassification::Orphaned => "Orphaned",
            OwnershipClassification::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Directory,
    File,
}

impl ItemKind {
    pub fn is_directory(self) -> bool {
        matches!(self, ItemKind::Directory)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemOutcome {
    pub path: PathBuf,
    pub is_directory: bool,
    pub classification: OwnershipClassification,
    /// Ownership was rewritten, or would have been in a dry run.
    pub changed: bool,
    #[serde(default)]
    pub owner: Option<Identifier>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatistics {
    pub directories_seen: u64,
    pub files_seen: u64,
    pub directories_changed: u64,
    pub files_changed: u64,
    pub exceptions: u64,
}

impl RunStatistics {
    pub fn total_items(&self) -> u64 {
        self.directories_seen.saturating_add(self.files_seen)
    }

    pub fn total_changes(&self) -> u64 {
        self.directories_changed.saturating_add(self.files_changed)
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    pub fn has_errors(&self) -> bool {
        self.exceptions > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub error: String,
    pub kind: ErrorKind,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    TimedOut,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub report_version: String,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub root: String,
    pub target: Identifier,
    pub execute: bool,
    pub outcome: RunOutcome,
    pub statistics: RunStatistics,
    pub elapsed_ms: u64,
    pub failures: Vec<FailureRecord>,
}

impl RunReport {
    pub fn is_dry_run(&self) -> bool {
        !self.execute
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemediationPriority {
    Low,
    Medium,
    High,
}

impl RemediationPriority {
    pub fn for_occurrences(total: u64) -> Self {
        if total >= 50 {
            RemediationPriority::High
        } else if total >= 10 {
            RemediationPriority::Medium
        } else {
            RemediationPriority::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemediationPriority::Low => "LOW",
            RemediationPriority::Medium => "MEDIUM",
            RemediationPriority::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionEntry {
    pub identifier: Identifier,
    pub file_count: u64,
    pub directory_count: u64,
    pub classification: OwnershipClassification,
    pub display_name: String,
}

impl DistributionEntry {
    pub fn total(&self) -> u64 {
        self.file_count.saturating_add(self.directory_count)
    }

    pub fn priority(&self) -> Option<RemediationPriority> {
        match self.classification {
            OwnershipClassification::Orphaned => {
                Some(RemediationPriority::for_occurrences(self.total()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionSummary {
    pub total_files: u64,
    pub total_directories: u64,
    pub unique_identifiers: u64,
    pub resolvable_count: u64,
    pub orphaned_count: u64,
    #[serde(default)]
    pub unknown_count: u64,
}
