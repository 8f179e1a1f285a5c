use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::identity::IdentityResolver;
use crate::model::{
    DistributionEntry, DistributionSummary, Identifier, ItemKind, OwnershipClassification,
};

/// Profiles which identifiers own how much of a tree.
///
/// Each identifier is classified once, on first sighting. Tracking never
/// fails: lookup errors downgrade the entry to `Unknown` and go to the log.
pub struct DistributionTracker<'r> {
    resolver: &'r dyn IdentityResolver,
    entries: HashMap<Identifier, DistributionEntry>,
    total_files: u64,
    total_directories: u64,
}

impl<'r> DistributionTracker<'r> {
    pub fn new(resolver: &'r dyn IdentityResolver) -> Self {
        Self {
            resolver,
            entries: HashMap::new(),
            total_files: 0,
            total_directories: 0,
        }
    }

    pub fn record_file(&mut self, path: &Path, identifier: &Identifier) {
        self.record(path, identifier, ItemKind::File);
    }

    pub fn record_directory(&mut self, path: &Path, identifier: &Identifier) {
        self.record(path, identifier, ItemKind::Directory);
    }

    pub(crate) fn record(&mut self, path: &Path, identifier: &Identifier, kind: ItemKind) {
        if !self.entries.contains_key(identifier) {
            let entry = self.classify(path, identifier);
            self.entries.insert(identifier.clone(), entry);
        }
        let Some(entry) = self.entries.get_mut(identifier) else {
            return;
        };
        match kind {
            ItemKind::File => {
                entry.file_count += 1;
                self.total_files += 1;
            }
            ItemKind::Directory => {
                entry.directory_count += 1;
                self.total_directories += 1;
            }
        }
    }

    pub fn summary(&self) -> DistributionSummary {
        let mut summary = DistributionSummary {
            total_files: self.total_files,
            total_directories: self.total_directories,
            unique_identifiers: self.entries.len() as u64,
            ..DistributionSummary::default()
        };
        for entry in self.entries.values() {
            match entry.classification {
                OwnershipClassification::Resolvable => summary.resolvable_count += 1,
                OwnershipClassification::Orphaned => summary.orphaned_count += 1,
                OwnershipClassification::Unknown => summary.unknown_count += 1,
            }
        }
        summary
    }

    /// Entries by descending occurrence count, ties by identifier.
    pub fn entries(&self) -> Vec<DistributionEntry> {
        let mut entries: Vec<DistributionEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.total()
                .cmp(&a.total())
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        entries
    }

    pub fn orphaned_entries(&self) -> Vec<DistributionEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.classification == OwnershipClassification::Orphaned)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn classify(&self, path: &Path, identifier: &Identifier) -> DistributionEntry {
        let (classification, display_name) = match self.resolver.is_resolvable(identifier) {
            Ok(true) => {
                let name = match self.resolver.account_name(identifier) {
                    Ok(Some(name)) => name,
                    Ok(None) => placeholder("Valid", identifier),
                    Err(err) => {
                        warn!("name lookup failed for {identifier}: {err}");
                        placeholder("Valid", identifier)
                    }
                };
                (OwnershipClassification::Resolvable, name)
            }
            Ok(false) => (
                OwnershipClassification::Orphaned,
                placeholder("Orphaned", identifier),
            ),
            Err(err) => {
                warn!(
                    "could not classify {identifier} (first seen at {}): {err}",
                    path.display()
                );
                (
                    OwnershipClassification::Unknown,
                    placeholder("Unknown", identifier),
                )
            }
        };
        debug!(
            "tracking {identifier} as {} ({display_name})",
            classification.label()
        );
        DistributionEntry {
            identifier: identifier.clone(),
            file_count: 0,
            directory_count: 0,
            classification,
            display_name,
        }
    }
}

fn placeholder(label: &str, identifier: &Identifier) -> String {
    format!("<{label} SID: {identifier}>")
}
