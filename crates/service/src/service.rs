use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, SecondsFormat, Utc};
use fix_owner_core::{
    collect_doctor_info, default_resolver, file_timestamp, run_walk_with_callback,
    write_failure_log, DistributionEntry, DistributionSummary, DistributionTracker, DoctorInfo,
    IdentityResolver, ItemOutcome, OwnershipClassification, RunOutcome, RunReport, RunStatistics,
    TraversalConfig,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub run_id: Option<String>,
    pub root: PathBuf,
    /// Target account name; the current user when absent.
    #[serde(default)]
    pub owner_account: Option<String>,
    #[serde(default)]
    pub recurse: bool,
    #[serde(default)]
    pub include_files: bool,
    #[serde(default)]
    pub execute: bool,
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub track_sids: bool,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub report_output: Option<PathBuf>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            run_id: None,
            root: PathBuf::new(),
            owner_account: None,
            recurse: true,
            include_files: true,
            execute: false,
            timeout_seconds: 0,
            track_sids: false,
            output_dir: None,
            report_output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunSessionStatus {
    Running,
    Completed,
    TimedOut,
    Interrupted,
    Failed,
}

impl RunSessionStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunSessionStatus::Running)
    }
}

impl From<RunOutcome> for RunSessionStatus {
    fn from(value: RunOutcome) -> Self {
        match value {
            RunOutcome::Completed => RunSessionStatus::Completed,
            RunOutcome::TimedOut => RunSessionStatus::TimedOut,
            RunOutcome::Interrupted => RunSessionStatus::Interrupted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunProgressEvent {
    pub seq: u64,
    pub run_id: String,
    pub path: String,
    pub is_directory: bool,
    pub classification: OwnershipClassification,
    pub changed: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSessionSnapshot {
    pub run_id: String,
    pub status: RunSessionStatus,
    pub target_account: String,
    pub statistics: Option<RunStatistics>,
    pub distribution: Option<DistributionSummary>,
    pub failure_log: Option<PathBuf>,
    pub error: Option<String>,
    pub total_events: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub run_id: String,
    pub status: RunSessionStatus,
}

#[derive(Debug, Clone)]
struct RunSession {
    status: RunSessionStatus,
    target_account: String,
    report: Option<RunReport>,
    distribution: Option<(DistributionSummary, Vec<DistributionEntry>)>,
    failure_log: Option<PathBuf>,
    error: Option<String>,
    events: Vec<RunProgressEvent>,
    cancel_flag: Arc<AtomicBool>,
}

static SESSIONS: Lazy<Mutex<HashMap<String, RunSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn start_run(request: RunRequest) -> Result<String> {
    start_run_with_resolver(request, default_resolver())
}

/// Resolves the target account and validates the root before returning;
/// the walk itself runs on a background thread.
pub fn start_run_with_resolver<R>(request: RunRequest, resolver: R) -> Result<String>
where
    R: IdentityResolver + Send + 'static,
{
    let target = resolver.resolve_account(request.owner_account.as_deref())?;
    let run_id = request
        .run_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let cancel_flag = Arc::new(AtomicBool::new(false));

    let config = TraversalConfig {
        root: request.root.clone(),
        target: target.identifier.clone(),
        recurse: request.recurse,
        include_files: request.include_files,
        execute: request.execute,
        deadline: (request.timeout_seconds > 0)
            .then(|| Duration::from_secs(request.timeout_seconds)),
        cancel_flag: Some(Arc::clone(&cancel_flag)),
    };
    config.validate()?;

    {
        let mut sessions = lock_sessions()?;
        if sessions.contains_key(&run_id) {
            return Err(anyhow!("run session already exists: {run_id}"));
        }
        sessions.insert(
            run_id.clone(),
            RunSession {
                status: RunSessionStatus::Running,
                target_account: target.display_name.clone(),
                report: None,
                distribution: None,
                failure_log: None,
                error: None,
                events: Vec::new(),
                cancel_flag: Arc::clone(&cancel_flag),
            },
        );
    }
    info!(run_id = %run_id, "run session started for {}", request.root.display());

    let thread_run_id = run_id.clone();
    thread::spawn(move || {
        let timestamp = file_timestamp(&Local::now());
        let mut tracker = request
            .track_sids
            .then(|| DistributionTracker::new(&resolver));

        let mut seq = 0_u64;
        let run_result = run_walk_with_callback(&config, &resolver, tracker.as_mut(), |item| {
            seq += 1;
            let event = progress_event(seq, &thread_run_id, item);
            if let Ok(mut sessions) = lock_sessions() {
                if let Some(session) = sessions.get_mut(&thread_run_id) {
                    session.events.push(event);
                }
            }
        });
        let distribution = tracker
            .as_ref()
            .map(|tracker| (tracker.summary(), tracker.entries()));

        let report = match run_result {
            Ok(report) => report,
            Err(err) => {
                mark_failed(&thread_run_id, &err.to_string());
                return;
            }
        };

        let failure_log = match &request.output_dir {
            Some(dir) => match write_failure_log(
                dir,
                &timestamp,
                "fix-owner run session",
                &report.finished_at,
                &report.failures,
            ) {
                Ok(path) => path,
                Err(err) => {
                    mark_failed(&thread_run_id, &format!("{err:#}"));
                    return;
                }
            },
            None => None,
        };

        if let Some(path) = &request.report_output {
            if let Err(err) = write_run_report(&report, path) {
                mark_failed(&thread_run_id, &format!("{err:#}"));
                return;
            }
        }

        if let Ok(mut sessions) = lock_sessions() {
            if let Some(session) = sessions.get_mut(&thread_run_id) {
                session.status = report.outcome.into();
                session.report = Some(report);
                session.distribution = distribution;
                session.failure_log = failure_log;
                session.error = None;
            }
        }
    });

    Ok(run_id)
}

pub fn poll_run_events(run_id: &str, from_seq: u64) -> Result<Vec<RunProgressEvent>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(run_id)
        .ok_or_else(|| anyhow!("run session not found: {run_id}"))?;

    Ok(session
        .events
        .iter()
        .filter(|event| event.seq > from_seq)
        .cloned()
        .collect())
}

/// Requests a stop. The walk notices at its next item boundary.
pub fn cancel_run(run_id: &str) -> Result<CancelRunResponse> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get_mut(run_id)
        .ok_or_else(|| anyhow!("run session not found: {run_id}"))?;

    if !session.status.is_finished() {
        session.cancel_flag.store(true, Ordering::Relaxed);
    }

    Ok(CancelRunResponse {
        run_id: run_id.to_string(),
        status: session.status.clone(),
    })
}

pub fn get_run_session(run_id: &str) -> Result<RunSessionSnapshot> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(run_id)
        .ok_or_else(|| anyhow!("run session not found: {run_id}"))?;

    Ok(RunSessionSnapshot {
        run_id: run_id.to_string(),
        status: session.status.clone(),
        target_account: session.target_account.clone(),
        statistics: session.report.as_ref().map(|report| report.statistics),
        distribution: session.distribution.as_ref().map(|(summary, _)| *summary),
        failure_log: session.failure_log.clone(),
        error: session.error.clone(),
        total_events: session.events.len() as u64,
    })
}

pub fn get_run_report(run_id: &str) -> Result<Option<RunReport>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(run_id)
        .ok_or_else(|| anyhow!("run session not found: {run_id}"))?;
    Ok(session.report.clone())
}

pub fn get_run_distribution(run_id: &str) -> Result<Option<Vec<DistributionEntry>>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(run_id)
        .ok_or_else(|| anyhow!("run session not found: {run_id}"))?;
    Ok(session
        .distribution
        .as_ref()
        .map(|(_, entries)| entries.clone()))
}

pub fn load_run_report(path: impl AsRef<Path>) -> Result<RunReport> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read run report {}", path.display()))?;
    let report: RunReport = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(report)
}

pub fn doctor() -> DoctorInfo {
    collect_doctor_info()
}

fn write_run_report(report: &RunReport, path: &Path) -> Result<()> {
    let payload =
        serde_json::to_string_pretty(report).context("failed to serialize run report")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write run report to {}", path.display()))?;
    Ok(())
}

fn progress_event(seq: u64, run_id: &str, item: ItemOutcome) -> RunProgressEvent {
    RunProgressEvent {
        seq,
        run_id: run_id.to_string(),
        path: item.path.to_string_lossy().to_string(),
        is_directory: item.is_directory,
        classification: item.classification,
        changed: item.changed,
        error: item.error,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

fn mark_failed(run_id: &str, error: &str) {
    warn!(run_id = %run_id, "run session failed: {error}");
    if let Ok(mut sessions) = lock_sessions() {
        if let Some(session) = sessions.get_mut(run_id) {
            session.status = RunSessionStatus::Failed;
            session.error = Some(error.to_string());
        }
    }
}

fn lock_sessions() -> Result<std::sync::MutexGuard<'static, HashMap<String, RunSession>>> {
    SESSIONS
        .lock()
        .map_err(|_| anyhow!("run session registry lock poisoned"))
}
