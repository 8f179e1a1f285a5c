use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::model::{
    DistributionEntry, DistributionSummary, OwnershipClassification, REPORT_VERSION,
};

pub const ANALYSIS_PREFIX: &str = "sid_ownership_analysis";
pub const REMEDIATION_PREFIX: &str = "sid_orphaned_remediation";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionAnalysis {
    pub metadata: AnalysisMetadata,
    pub summary: DistributionSummary,
    pub identifiers: Vec<IdentifierRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisMetadata {
    pub report_version: String,
    pub generated_at: String,
    pub root_path: String,
    pub target_account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifierRecord {
    pub sid: String,
    pub account_name: String,
    pub status: String,
    pub file_count: u64,
    pub directory_count: u64,
    pub total_count: u64,
    pub file_percentage: f64,
    pub directory_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationPlan {
    pub orphaned_sids: Vec<OrphanedIdentifierPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrphanedIdentifierPlan {
    pub sid_info: SidInfo,
    pub impact_analysis: ImpactAnalysis,
    pub recommended_remediation: RecommendedRemediation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SidInfo {
    pub sid: String,
    pub account_name: String,
    pub status: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactAnalysis {
    pub files_affected: u64,
    pub directories_affected: u64,
    pub total_items_affected: u64,
    /// Files as a share of this identifier's own occurrences.
    pub file_percentage: f64,
    pub directory_percentage: f64,
    pub remediation_priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecommendedRemediation {
    pub new_owner_account: String,
    pub action_required: String,
    pub command_example: String,
    pub verification_steps: Vec<String>,
}

pub fn file_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y%m%d_%H%M%S").to_string()
}

pub fn timestamped_file_name(prefix: &str, timestamp: &str, extension: &str) -> String {
    format!("{prefix}_{timestamp}.{extension}")
}

pub fn build_distribution_analysis(
    entries: &[DistributionEntry],
    summary: &DistributionSummary,
    root_path: &Path,
    target_account: &str,
) -> DistributionAnalysis {
    let identifiers = entries
        .iter()
        .map(|entry| IdentifierRecord {
            sid: entry.identifier.to_string(),
            account_name: entry.display_name.clone(),
            status: entry.classification.label().to_string(),
            file_count: entry.file_count,
            directory_count: entry.directory_count,
            total_count: entry.total(),
            file_percentage: percentage(entry.file_count, summary.total_files),
            directory_percentage: percentage(entry.directory_count, summary.total_directories),
        })
        .collect();

    DistributionAnalysis {
        metadata: AnalysisMetadata {
            report_version: REPORT_VERSION.to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            root_path: root_path.to_string_lossy().to_string(),
            target_account: target_account.to_string(),
        },
        summary: *summary,
        identifiers,
    }
}

/// `None` when no entry is orphaned.
pub fn build_remediation_plan(
    entries: &[DistributionEntry],
    new_owner_account: &str,
) -> Option<RemediationPlan> {
    let orphaned_sids: Vec<OrphanedIdentifierPlan> = entries
        .iter()
        .filter(|entry| entry.classification == OwnershipClassification::Orphaned)
        .filter_map(|entry| {
            let priority = entry.priority()?;
            let total = entry.total();
            Some(OrphanedIdentifierPlan {
                sid_info: SidInfo {
                    sid: entry.identifier.to_string(),
                    account_name: entry.display_name.clone(),
                    status: "ORPHANED".to_string(),
                    description: "SID does not correspond to any existing account".to_string(),
                },
                impact_analysis: ImpactAnalysis {
                    files_affected: entry.file_count,
                    directories_affected: entry.directory_count,
                    total_items_affected: total,
                    file_percentage: percentage(entry.file_count, total),
                    directory_percentage: percentage(entry.directory_count, total),
                    remediation_priority: priority.as_str().to_string(),
                },
                recommended_remediation: RecommendedRemediation {
                    new_owner_account: new_owner_account.to_string(),
                    action_required: "Change ownership to specified account".to_string(),
                    command_example: format!(
                        "fix-owner repair <path> \"{new_owner_account}\" -x -r -f"
                    ),
                    verification_steps: vec![
                        "Run with dry-run mode first (without -x flag)".to_string(),
                        "Verify the target account exists and is accessible".to_string(),
                        "Apply changes with -x flag".to_string(),
                        "Verify ownership changes were successful".to_string(),
                    ],
                },
            })
        })
        .collect();

    if orphaned_sids.is_empty() {
        None
    } else {
        Some(RemediationPlan { orphaned_sids })
    }
}

pub fn write_distribution_analysis(
    analysis: &DistributionAnalysis,
    output_dir: &Path,
    timestamp: &str,
) -> Result<PathBuf> {
    let path = prepare_output(output_dir, ANALYSIS_PREFIX, timestamp, "json")?;
    let payload = serde_json::to_string_pretty(analysis)
        .context("failed to serialize ownership analysis")?;
    fs::write(&path, payload)
        .with_context(|| format!("failed to write ownership analysis to {}", path.display()))?;
    Ok(path)
}

pub fn write_remediation_plan(
    plan: &RemediationPlan,
    output_dir: &Path,
    timestamp: &str,
) -> Result<PathBuf> {
    let path = prepare_output(output_dir, REMEDIATION_PREFIX, timestamp, "yaml")?;
    let payload = serde_yaml::to_string(plan).context("failed to serialize remediation plan")?;
    fs::write(&path, payload)
        .with_context(|| format!("failed to write remediation plan to {}", path.display()))?;
    Ok(path)
}

/// Reads the target account out of a remediation plan: the
/// `new_owner_account` of its first orphaned entry.
pub fn load_remediation_plan(path: &Path) -> Result<String, ConfigurationError> {
    let plan_error = |reason: String| ConfigurationError::RemediationPlan {
        path: path.to_path_buf(),
        reason,
    };

    let text = fs::read_to_string(path).map_err(|err| plan_error(err.to_string()))?;
    let document: serde_yaml::Value = if text.trim().is_empty() {
        serde_yaml::Value::Null
    } else {
        serde_yaml::from_str(&text).map_err(|err| plan_error(format!("invalid YAML: {err}")))?
    };
    if document.is_null() {
        return Err(plan_error("file is empty".to_string()));
    }

    document
        .get("orphaned_sids")
        .and_then(|entries| entries.get(0))
        .and_then(|entry| entry.get("recommended_remediation"))
        .and_then(|remediation| remediation.get("new_owner_account"))
        .and_then(serde_yaml::Value::as_str)
        .map(str::trim)
        .filter(|account| !account.is_empty())
        .map(str::to_string)
        .ok_or_else(|| plan_error("no new_owner_account found".to_string()))
}

fn prepare_output(output_dir: &Path, prefix: &str, timestamp: &str, extension: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;
    Ok(output_dir.join(timestamped_file_name(prefix, timestamp, extension)))
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let value = part as f64 * 100.0 / whole as f64;
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use chrono::{TimeZone, Utc};

    use super::{
        build_distribution_analysis, build_remediation_plan, file_timestamp,
        load_remediation_plan, write_distribution_analysis, write_remediation_plan,
    };
    use crate::error::ConfigurationError;
    use crate::model::{
        DistributionEntry, DistributionSummary, Identifier, OwnershipClassification,
    };

    fn entries() -> Vec<DistributionEntry> {
        vec![
            DistributionEntry {
                identifier: Identifier::new("S-1-5-21-1234567890-1234567890-1234567890-1001"),
                file_count: 15,
                directory_count: 3,
                classification: OwnershipClassification::Orphaned,
                display_name: "<Orphaned SID: S-1-5-21-1234567890-1234567890-1234567890-1001>"
                    .to_string(),
            },
            DistributionEntry {
                identifier: Identifier::new("S-1-5-32-544"),
                file_count: 5,
                directory_count: 1,
                classification: OwnershipClassification::Resolvable,
                display_name: "BUILTIN\\Administrators".to_string(),
            },
        ]
    }

    fn summary() -> DistributionSummary {
        DistributionSummary {
            total_files: 20,
            total_directories: 4,
            unique_identifiers: 2,
            resolvable_count: 1,
            orphaned_count: 1,
            unknown_count: 0,
        }
    }

    #[test]
    fn analysis_percentages_are_shares_of_tracked_totals() {
        let analysis =
            build_distribution_analysis(&entries(), &summary(), Path::new("C:/data"), "Admin");
        let first = &analysis.identifiers[0];
        assert_eq!(first.status, "Orphaned");
        assert_eq!(first.total_count, 18);
        assert_eq!(first.file_percentage, 75.0);
        assert_eq!(first.directory_percentage, 75.0);
        assert_eq!(analysis.identifiers[1].file_percentage, 25.0);
    }

    #[test]
    fn plan_covers_orphaned_entries_only() {
        let plan = build_remediation_plan(&entries(), "TestUser").expect("one orphan");
        assert_eq!(plan.orphaned_sids.len(), 1);
        let impact = &plan.orphaned_sids[0].impact_analysis;
        assert_eq!(impact.total_items_affected, 18);
        assert_eq!(impact.file_percentage, 83.33);
        assert_eq!(impact.directory_percentage, 16.67);
        assert_eq!(impact.remediation_priority, "MEDIUM");

        let resolvable_only = vec![entries().remove(1)];
        assert!(build_remediation_plan(&resolvable_only, "TestUser").is_none());
    }

    #[test]
    fn plan_round_trips_to_target_account() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = build_remediation_plan(&entries(), "CONTOSO\\svc-owner").expect("plan");
        let path = write_remediation_plan(&plan, dir.path(), "20250804_114500").expect("writes");

        assert!(path.ends_with("sid_orphaned_remediation_20250804_114500.yaml"));
        assert_eq!(
            load_remediation_plan(&path).expect("loads"),
            "CONTOSO\\svc-owner"
        );
    }

    #[test]
    fn loading_rejects_missing_empty_and_keyless_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            load_remediation_plan(&missing),
            Err(ConfigurationError::RemediationPlan { .. })
        ));

        let empty = dir.path().join("empty.yaml");
        fs::write(&empty, "").expect("write");
        assert!(load_remediation_plan(&empty).is_err());

        let invalid = dir.path().join("invalid.yaml");
        fs::write(&invalid, "orphaned_sids: [unclosed").expect("write");
        assert!(load_remediation_plan(&invalid).is_err());

        let keyless = dir.path().join("keyless.yaml");
        fs::write(&keyless, "orphaned_sids:\n  - sid_info:\n      sid: S-1-5-21-1\n")
            .expect("write");
        assert!(load_remediation_plan(&keyless).is_err());
    }

    #[test]
    fn analysis_file_is_timestamped_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let at = Utc.with_ymd_and_hms(2025, 8, 4, 11, 45, 0).single().expect("valid time");
        let stamp = file_timestamp(&at);
        assert_eq!(stamp, "20250804_114500");

        let analysis =
            build_distribution_analysis(&entries(), &summary(), Path::new("/srv"), "root");
        let path = write_distribution_analysis(&analysis, &dir.path().join("output"), &stamp)
            .expect("writes");
        assert!(path.ends_with("output/sid_ownership_analysis_20250804_114500.json"));

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(parsed["summary"]["total_files"], 20);
        assert_eq!(parsed["identifiers"][1]["account_name"], "BUILTIN\\Administrators");
    }
}
