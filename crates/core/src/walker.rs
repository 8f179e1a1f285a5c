use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::deadline::{Clock, DeadlineGuard, SystemClock};
use crate::distribution::DistributionTracker;
use crate::error::{AccessError, ConfigurationError, ErrorKind, WalkError};
use crate::identity::{IdentityResolver, OwnerInfo};
use crate::model::{
    FailureRecord, Identifier, ItemKind, ItemOutcome, OwnershipClassification, RunOutcome,
    RunReport, REPORT_VERSION,
};
use crate::progress::ProgressAggregator;

#[derive(Debug, Clone)]
pub struct TraversalConfig {
    pub root: PathBuf,
    pub target: Identifier,
    pub recurse: bool,
    pub include_files: bool,
    /// Apply ownership changes. When false the run only reports them.
    pub execute: bool,
    pub deadline: Option<Duration>,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            target: Identifier::default(),
            recurse: false,
            include_files: false,
            execute: false,
            deadline: None,
            cancel_flag: None,
        }
    }
}

impl TraversalConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.target.is_empty() {
            return Err(ConfigurationError::EmptyTarget);
        }
        let metadata = std::fs::metadata(&self.root)
            .map_err(|_| ConfigurationError::MissingRoot(self.root.clone()))?;
        if !metadata.is_dir() {
            return Err(ConfigurationError::RootNotDirectory(self.root.clone()));
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

pub struct WalkRunOutput {
    pub report: RunReport,
    pub items: Vec<ItemOutcome>,
}

pub fn run_walk(
    config: &TraversalConfig,
    resolver: &dyn IdentityResolver,
    tracker: Option<&mut DistributionTracker<'_>>,
) -> Result<RunReport, WalkError> {
    run_walk_with_callback(config, resolver, tracker, |_| {})
}

pub fn run_walk_with_items(
    config: &TraversalConfig,
    resolver: &dyn IdentityResolver,
    tracker: Option<&mut DistributionTracker<'_>>,
) -> Result<WalkRunOutput, WalkError> {
    let mut items = Vec::new();
    let report = run_walk_with_callback(config, resolver, tracker, |item| items.push(item))?;
    Ok(WalkRunOutput { report, items })
}

pub fn run_walk_with_callback<F>(
    config: &TraversalConfig,
    resolver: &dyn IdentityResolver,
    tracker: Option<&mut DistributionTracker<'_>>,
    on_item: F,
) -> Result<RunReport, WalkError>
where
    F: FnMut(ItemOutcome),
{
    run_walk_with_clock(config, resolver, tracker, SystemClock::new(), on_item)
}

/// Walks `config.root` top-down: each directory, then its files, then its
/// subdirectories. `on_item` fires once per examined item, in that order.
///
/// Per-item failures are recorded in the report and never end the run.
/// Only a failure to enumerate the root itself is returned as an error.
pub fn run_walk_with_clock<C, F>(
    config: &TraversalConfig,
    resolver: &dyn IdentityResolver,
    tracker: Option<&mut DistributionTracker<'_>>,
    clock: C,
    on_item: F,
) -> Result<RunReport, WalkError>
where
    C: Clock,
    F: FnMut(ItemOutcome),
{
    walk_with_lister(config, resolver, tracker, clock, list_directory, on_item)
}

type Lister = fn(&Path) -> std::io::Result<Listing>;

fn walk_with_lister<C, F>(
    config: &TraversalConfig,
    resolver: &dyn IdentityResolver,
    tracker: Option<&mut DistributionTracker<'_>>,
    clock: C,
    lister: Lister,
    on_item: F,
) -> Result<RunReport, WalkError>
where
    C: Clock,
    F: FnMut(ItemOutcome),
{
    config.validate()?;
    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let run_id = Uuid::new_v4().to_string();

    let root_listing = lister(&config.root).map_err(|source| WalkError::Enumerate {
        path: config.root.clone(),
        source,
    })?;

    info!(
        run_id = %run_id,
        "{} ownership walk of {} (target {}, recurse={}, files={})",
        if config.execute { "executing" } else { "simulating" },
        config.root.display(),
        config.target,
        config.recurse,
        config.include_files
    );

    let mut walk = Walk {
        config,
        resolver,
        tracker,
        guard: DeadlineGuard::with_clock(config.deadline, clock),
        progress: ProgressAggregator::new(),
        failures: Vec::new(),
        lister,
        on_item,
    };
    let outcome = walk.run(root_listing);

    let statistics = walk.progress.summary();
    let elapsed_ms = walk
        .progress
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX);
    match outcome {
        RunOutcome::Completed => info!(
            run_id = %run_id,
            "walk complete: {} directories, {} files, {} changes, {} exceptions",
            statistics.directories_seen,
            statistics.files_seen,
            statistics.total_changes(),
            statistics.exceptions
        ),
        RunOutcome::TimedOut => warn!(
            run_id = %run_id,
            "processing timeout reached after {} items; statistics are partial",
            statistics.total_items()
        ),
        RunOutcome::Interrupted => warn!(
            run_id = %run_id,
            "walk interrupted by caller after {} items",
            statistics.total_items()
        ),
    }

    Ok(RunReport {
        report_version: REPORT_VERSION.to_string(),
        run_id,
        started_at,
        finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        root: config.root.to_string_lossy().to_string(),
        target: config.target.clone(),
        execute: config.execute,
        outcome,
        statistics,
        elapsed_ms,
        failures: walk.failures,
    })
}

struct Walk<'a, 't, C: Clock, F> {
    config: &'a TraversalConfig,
    resolver: &'a dyn IdentityResolver,
    tracker: Option<&'a mut DistributionTracker<'t>>,
    guard: DeadlineGuard<C>,
    progress: ProgressAggregator,
    failures: Vec<FailureRecord>,
    lister: Lister,
    on_item: F,
}

impl<C, F> Walk<'_, '_, C, F>
where
    C: Clock,
    F: FnMut(ItemOutcome),
{
    fn run(&mut self, root_listing: Listing) -> RunOutcome {
        let mut pending = vec![(self.config.root.clone(), Some(root_listing))];

        while let Some((directory, listing)) = pending.pop() {
            if let Some(outcome) = self.stop_reason() {
                return outcome;
            }
            self.process_item(&directory, ItemKind::Directory);

            let listing = match listing {
                Some(listing) => listing,
                None => match (self.lister)(&directory) {
                    Ok(listing) => listing,
                    Err(err) => {
                        let err = AccessError::from_io("list directory", &directory, &err);
                        warn!("{err}");
                        self.record_failure(&directory, ItemKind::Directory, &err);
                        continue;
                    }
                },
            };
            for (path, kind, err) in &listing.errors {
                warn!("{err}");
                self.record_failure(path, *kind, err);
            }

            if self.config.include_files {
                for file in &listing.files {
                    if let Some(outcome) = self.stop_reason() {
                        return outcome;
                    }
                    self.process_item(file, ItemKind::File);
                }
            }

            if self.config.recurse {
                pending.extend(listing.directories.into_iter().rev().map(|dir| (dir, None)));
            }
        }

        RunOutcome::Completed
    }

    fn stop_reason(&self) -> Option<RunOutcome> {
        if self.config.is_cancelled() {
            return Some(RunOutcome::Interrupted);
        }
        if self.guard.expired() {
            return Some(RunOutcome::TimedOut);
        }
        None
    }

    // An item whose owner cannot be read reaches the hook and the failure
    // list but is not counted as seen, so tracker totals match seen counts.
    fn process_item(&mut self, path: &Path, kind: ItemKind) {
        let outcome = match self.resolver.get_owner(path) {
            Ok(owner) => {
                let outcome = self.examine(path, kind, owner);
                self.progress.record_seen(kind);
                outcome
            }
            Err(err) => {
                warn!("{err}");
                self.record_failure(path, kind, &err);
                ItemOutcome {
                    path: path.to_path_buf(),
                    is_directory: kind.is_directory(),
                    classification: OwnershipClassification::Unknown,
                    changed: false,
                    owner: None,
                    owner_name: None,
                    error: Some(err.to_string()),
                }
            }
        };
        (self.on_item)(outcome);
    }

    fn examine(&mut self, path: &Path, kind: ItemKind, owner: OwnerInfo) -> ItemOutcome {
        let classification = self.classify(&owner);
        debug!(
            "{}: owner {} is {}",
            path.display(),
            owner.identifier,
            classification.label()
        );

        let mut error = None;
        let changed = if classification == OwnershipClassification::Orphaned {
            match self.remediate(path, kind) {
                Ok(()) => {
                    self.progress.record_changed(kind);
                    true
                }
                Err(err) => {
                    error = Some(err.to_string());
                    false
                }
            }
        } else {
            false
        };

        if let Some(tracker) = self.tracker.as_deref_mut() {
            tracker.record(path, &owner.identifier, kind);
        }

        ItemOutcome {
            path: path.to_path_buf(),
            is_directory: kind.is_directory(),
            classification,
            changed,
            owner: Some(owner.identifier),
            owner_name: owner.display_name,
            error,
        }
    }

    fn classify(&self, owner: &OwnerInfo) -> OwnershipClassification {
        if owner.display_name.is_some() {
            return OwnershipClassification::Resolvable;
        }
        match self.resolver.is_resolvable(&owner.identifier) {
            Ok(true) => OwnershipClassification::Resolvable,
            Ok(false) => OwnershipClassification::Orphaned,
            Err(err) => {
                warn!("could not classify owner {}: {err}", owner.identifier);
                OwnershipClassification::Unknown
            }
        }
    }

    fn remediate(&mut self, path: &Path, kind: ItemKind) -> Result<(), AccessError> {
        if !self.config.execute {
            return Ok(());
        }
        match self.resolver.set_owner(path, &self.config.target) {
            Ok(()) => {
                debug!("{}: owner set to {}", path.display(), self.config.target);
                Ok(())
            }
            Err(err) => {
                warn!("{err}");
                self.record_failure(path, kind, &err);
                Err(err)
            }
        }
    }

    fn record_failure(&mut self, path: &Path, kind: ItemKind, err: &AccessError) {
        self.progress.increment_exceptions();
        self.failures.push(FailureRecord {
            path: path.to_path_buf(),
            error: err.to_string(),
            kind: err.kind,
            is_directory: kind.is_directory(),
        });
    }
}

#[derive(Debug, Default)]
struct Listing {
    directories: Vec<PathBuf>,
    files: Vec<PathBuf>,
    errors: Vec<(PathBuf, ItemKind, AccessError)>,
}

/// Fails only when `dir` itself cannot be read. Symlinks are not followed,
/// so a link to a directory is listed as a file.
fn list_directory(dir: &Path) -> std::io::Result<Listing> {
    let mut listing = Listing::default();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for item in walker {
        match item {
            Ok(entry) => {
                if entry.file_type().is_dir() {
                    listing.directories.push(entry.into_path());
                } else {
                    listing.files.push(entry.into_path());
                }
            }
            Err(err) if err.depth() == 0 => {
                return Err(err.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "directory listing failed")
                }));
            }
            Err(err) => {
                let path = err.path().unwrap_or(dir).to_path_buf();
                let access = match err.io_error() {
                    Some(io) => AccessError::from_io("list entry", &path, io),
                    None => AccessError::new(
                        "list entry",
                        path.to_string_lossy(),
                        ErrorKind::Io,
                        err.to_string(),
                    ),
                };
                listing.errors.push((path.clone(), failed_entry_kind(&path), access));
            }
        }
    }
    Ok(listing)
}

fn failed_entry_kind(path: &Path) -> ItemKind {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => ItemKind::Directory,
        _ => ItemKind::File,
    }
}
