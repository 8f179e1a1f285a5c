use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use fix_owner_core::{
    run_walk, run_walk_with_clock, run_walk_with_items, Clock, DistributionTracker, ErrorKind,
    Identifier, InMemoryResolver, OwnershipClassification, RunOutcome, TraversalConfig,
};

const ORPHAN: &str = "S-1-5-21-3623811015-3361044348-30300820-1013";
const LIVE: &str = "S-1-5-21-3623811015-3361044348-30300820-1105";
const TARGET: &str = "S-1-5-32-544";

struct Sample {
    _dir: tempfile::TempDir,
    root: PathBuf,
    a_txt: PathBuf,
    sub: PathBuf,
    b_txt: PathBuf,
}

/// `root/{a.txt, sub/{b.txt}}`
fn sample_tree() -> Result<Sample> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().to_path_buf();
    let sub = root.join("sub");
    fs::create_dir(&sub)?;
    let a_txt = root.join("a.txt");
    let b_txt = sub.join("b.txt");
    fs::write(&a_txt, b"a")?;
    fs::write(&b_txt, b"b")?;
    Ok(Sample {
        _dir: dir,
        root,
        a_txt,
        sub,
        b_txt,
    })
}

fn accounts() -> InMemoryResolver {
    InMemoryResolver::new()
        .with_account(LIVE, "CONTOSO\\jdoe")
        .with_account(TARGET, "BUILTIN\\Administrators")
}

/// `a.txt` orphaned; everything else owned by a live account.
fn scenario_resolver(sample: &Sample) -> InMemoryResolver {
    accounts()
        .with_owner(&sample.root, LIVE)
        .with_owner(&sample.a_txt, ORPHAN)
        .with_owner(&sample.sub, LIVE)
        .with_owner(&sample.b_txt, LIVE)
}

fn full_config(root: &Path, execute: bool) -> TraversalConfig {
    TraversalConfig {
        root: root.to_path_buf(),
        target: Identifier::new(TARGET),
        recurse: true,
        include_files: true,
        execute,
        ..TraversalConfig::default()
    }
}

#[test]
fn execute_repairs_only_the_orphaned_file() -> Result<()> {
    let sample = sample_tree()?;
    let resolver = scenario_resolver(&sample);

    let report = run_walk(&full_config(&sample.root, true), &resolver, None)?;
    let stats = report.statistics;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(stats.files_seen, 2);
    assert_eq!(stats.directories_seen, 2);
    assert_eq!(stats.files_changed, 1);
    assert_eq!(stats.directories_changed, 0);
    assert_eq!(stats.exceptions, 0);
    assert_eq!(resolver.owner_of(&sample.a_txt), Some(Identifier::new(TARGET)));
    assert_eq!(resolver.writes().len(), 1);
    Ok(())
}

#[test]
fn dry_run_reports_the_same_counters_without_writing() -> Result<()> {
    let sample = sample_tree()?;
    let resolver = scenario_resolver(&sample);

    let report = run_walk(&full_config(&sample.root, false), &resolver, None)?;
    let stats = report.statistics;
    assert!(report.is_dry_run());
    assert_eq!(stats.files_seen, 2);
    assert_eq!(stats.directories_seen, 2);
    assert_eq!(stats.files_changed, 1);
    assert_eq!(stats.directories_changed, 0);
    assert_eq!(resolver.owner_of(&sample.a_txt), Some(Identifier::new(ORPHAN)));
    assert!(resolver.writes().is_empty());
    Ok(())
}

#[test]
fn dry_run_is_idempotent() -> Result<()> {
    let sample = sample_tree()?;
    let resolver = accounts().with_default_owner(ORPHAN);
    let config = full_config(&sample.root, false);

    let first = run_walk(&config, &resolver, None)?;
    let second = run_walk(&config, &resolver, None)?;
    assert_eq!(first.statistics, second.statistics);
    assert_ne!(first.run_id, second.run_id);
    Ok(())
}

#[test]
fn dry_run_never_mutates_owners() -> Result<()> {
    let sample = sample_tree()?;
    let resolver = accounts().with_default_owner(ORPHAN);
    let paths = [&sample.root, &sample.a_txt, &sample.sub, &sample.b_txt];
    let before: Vec<_> = paths.iter().map(|path| resolver.owner_of(path)).collect();

    run_walk(&full_config(&sample.root, false), &resolver, None)?;

    let after: Vec<_> = paths.iter().map(|path| resolver.owner_of(path)).collect();
    assert_eq!(before, after);
    assert!(resolver.writes().is_empty());
    Ok(())
}

#[test]
fn second_execute_run_converges_to_no_changes() -> Result<()> {
    let sample = sample_tree()?;
    let resolver = accounts().with_default_owner(ORPHAN);
    let config = full_config(&sample.root, true);

    let first = run_walk(&config, &resolver, None)?;
    assert_eq!(first.statistics.total_changes(), first.statistics.total_items());
    assert_eq!(first.statistics.total_items(), 4);

    let second = run_walk(&config, &resolver, None)?;
    assert_eq!(second.statistics.total_items(), 4);
    assert_eq!(second.statistics.total_changes(), 0);
    Ok(())
}

#[test]
fn without_recursion_only_the_root_is_visited() -> Result<()> {
    let sample = sample_tree()?;
    fs::create_dir_all(sample.sub.join("deeper"))?;
    fs::write(sample.sub.join("deeper").join("c.txt"), b"c")?;
    let resolver = accounts().with_default_owner(LIVE);
    let config = TraversalConfig {
        recurse: false,
        ..full_config(&sample.root, false)
    };

    let output = run_walk_with_items(&config, &resolver, None)?;
    assert_eq!(output.report.statistics.directories_seen, 1);
    assert_eq!(output.report.statistics.files_seen, 1);
    let paths: Vec<_> = output.items.iter().map(|item| item.path.clone()).collect();
    assert_eq!(paths, vec![sample.root.clone(), sample.a_txt.clone()]);
    Ok(())
}

#[test]
fn one_unreadable_owner_does_not_abort_the_walk() -> Result<()> {
    let sample = sample_tree()?;
    let resolver = scenario_resolver(&sample).fail_reads_for(&sample.b_txt);

    let output = run_walk_with_items(&full_config(&sample.root, true), &resolver, None)?;
    let stats = output.report.statistics;
    assert_eq!(output.items.len(), 4);
    assert_eq!(stats.total_items(), 3);
    assert_eq!(stats.files_seen, 1);
    assert_eq!(stats.directories_seen, 2);
    assert_eq!(stats.exceptions, 1);
    assert_eq!(stats.files_changed, 1);

    let classified = output
        .items
        .iter()
        .filter(|item| item.classification != OwnershipClassification::Unknown)
        .count();
    assert_eq!(classified, 3);

    let failed = output
        .items
        .iter()
        .find(|item| item.path == sample.b_txt)
        .expect("b.txt reported");
    assert!(!failed.changed);
    assert!(failed.error.is_some());

    assert_eq!(output.report.failures.len(), 1);
    assert_eq!(output.report.failures[0].path, sample.b_txt);
    assert_eq!(output.report.failures[0].kind, ErrorKind::PermissionDenied);
    assert_eq!(resolver.owner_of(&sample.a_txt), Some(Identifier::new(TARGET)));
    Ok(())
}

#[test]
fn failed_owner_write_is_recorded_and_not_counted_as_changed() -> Result<()> {
    let sample = sample_tree()?;
    let resolver = scenario_resolver(&sample).fail_writes_for(&sample.a_txt);

    let report = run_walk(&full_config(&sample.root, true), &resolver, None)?;
    assert_eq!(report.statistics.files_changed, 0);
    assert_eq!(report.statistics.exceptions, 1);
    assert!(!report.failures[0].is_directory);
    assert_eq!(resolver.owner_of(&sample.a_txt), Some(Identifier::new(ORPHAN)));
    Ok(())
}

/// Advances one second per processed item, driven from the item hook.
#[derive(Default)]
struct StepClock {
    now: Cell<Duration>,
}

impl Clock for StepClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

#[test]
fn deadline_stops_before_the_whole_tree_is_processed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for index in 0..10 {
        fs::write(dir.path().join(format!("file_{index:02}.dat")), b"x")?;
    }
    let resolver = accounts().with_default_owner(ORPHAN);
    let config = TraversalConfig {
        deadline: Some(Duration::from_secs(4)),
        ..full_config(dir.path(), false)
    };
    let clock = StepClock::default();

    let mut processed = 0_u64;
    let report = run_walk_with_clock(&config, &resolver, None, &clock, |_| {
        processed += 1;
        clock.now.set(clock.now.get() + Duration::from_secs(1));
    })?;

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert!(processed <= 5);
    assert!(report.statistics.total_items() < 11);
    assert_eq!(report.statistics.total_items(), processed);
    Ok(())
}

#[test]
fn distribution_totals_match_seen_counters() -> Result<()> {
    let sample = sample_tree()?;
    let resolver = scenario_resolver(&sample);
    let mut tracker = DistributionTracker::new(&resolver);

    let report = run_walk(&full_config(&sample.root, false), &resolver, Some(&mut tracker))?;
    let summary = tracker.summary();
    let entries = tracker.entries();

    let files: u64 = entries.iter().map(|entry| entry.file_count).sum();
    let dirs: u64 = entries.iter().map(|entry| entry.directory_count).sum();
    assert_eq!(files, report.statistics.files_seen);
    assert_eq!(dirs, report.statistics.directories_seen);
    assert_eq!(summary.total_files, files);
    assert_eq!(summary.total_directories, dirs);
    assert_eq!(summary.unique_identifiers, 2);
    assert_eq!(summary.orphaned_count, 1);
    assert_eq!(entries[0].identifier, Identifier::new(LIVE));
    assert_eq!(entries[0].display_name, "CONTOSO\\jdoe");
    Ok(())
}

#[test]
fn distribution_totals_match_seen_counters_when_an_owner_read_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let a_txt = dir.path().join("a.txt");
    let b_txt = dir.path().join("b.txt");
    fs::write(&a_txt, b"a")?;
    fs::write(&b_txt, b"b")?;
    let resolver = accounts()
        .with_default_owner(LIVE)
        .with_owner(&a_txt, ORPHAN)
        .fail_reads_for(&b_txt);
    let mut tracker = DistributionTracker::new(&resolver);

    let report = run_walk(&full_config(dir.path(), false), &resolver, Some(&mut tracker))?;
    let entries = tracker.entries();
    let files: u64 = entries.iter().map(|entry| entry.file_count).sum();
    let dirs: u64 = entries.iter().map(|entry| entry.directory_count).sum();

    assert_eq!(report.statistics.exceptions, 1);
    assert_eq!(report.statistics.files_seen, 1);
    assert_eq!(files, report.statistics.files_seen);
    assert_eq!(dirs, report.statistics.directories_seen);
    assert_eq!(tracker.summary().total_files, files);
    Ok(())
}

#[test]
fn subdirectory_removed_mid_walk_is_a_failure_and_siblings_continue() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().to_path_buf();
    let (first, doomed, last) = (root.join("a_dir"), root.join("m_dir"), root.join("z_dir"));
    for path in [&first, &doomed, &last] {
        fs::create_dir(path)?;
        fs::write(path.join("inner.txt"), b"i")?;
    }
    let resolver = accounts().with_default_owner(LIVE);

    let mut visited = Vec::new();
    let report = fix_owner_core::run_walk_with_callback(
        &full_config(&root, false),
        &resolver,
        None,
        |item| {
            if item.path == doomed {
                fs::remove_dir_all(&doomed).expect("remove directory");
            }
            visited.push(item.path);
        },
    )?;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.statistics.exceptions, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, doomed);
    assert!(report.failures[0].is_directory);
    assert_eq!(report.statistics.directories_seen, 4);
    assert_eq!(report.statistics.files_seen, 2);
    assert!(visited.contains(&last.join("inner.txt")));
    assert!(!visited.contains(&doomed.join("inner.txt")));
    Ok(())
}

#[cfg(unix)]
#[test]
fn symlinked_directories_are_not_followed() -> Result<()> {
    let sample = sample_tree()?;
    let link = sample.root.join("link");
    std::os::unix::fs::symlink(&sample.sub, &link)?;
    let resolver = accounts().with_default_owner(LIVE);

    let output = run_walk_with_items(&full_config(&sample.root, false), &resolver, None)?;
    let link_item = output
        .items
        .iter()
        .find(|item| item.path == link)
        .expect("link reported");
    assert!(!link_item.is_directory);
    assert_eq!(output.report.statistics.directories_seen, 2);
    assert_eq!(output.report.statistics.files_seen, 3);
    Ok(())
}
