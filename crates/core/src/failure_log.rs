use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::export::timestamped_file_name;
use crate::model::FailureRecord;

const RULE_WIDTH: usize = 80;

pub fn render_failure_log(operation: &str, generated_at: &str, failures: &[FailureRecord]) -> String {
    let mut sorted: Vec<&FailureRecord> = failures.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let failed_directories = failures.iter().filter(|record| record.is_directory).count();
    let failed_files = failures.len() - failed_directories;

    let mut out = String::new();
    out.push_str(&format!("Failed Items Log - {operation}\n"));
    out.push_str(&format!("Generated: {generated_at}\n"));
    out.push_str(&"=".repeat(RULE_WIDTH));
    out.push_str("\n\nSUMMARY:\n");
    out.push_str(&format!("Total Failed Files: {failed_files}\n"));
    out.push_str(&format!("Total Failed Directories: {failed_directories}\n"));
    out.push_str(&format!("Total Failures: {}\n\n", failures.len()));

    out.push_str("FAILED ITEMS:\n");
    out.push_str(&"-".repeat(RULE_WIDTH));
    out.push('\n');
    for record in sorted {
        let label = if record.is_directory { "Directory" } else { "File" };
        out.push_str(&format!("{label}: {}\n", record.path.display()));
        out.push_str(&format!("  Error: {}\n", record.error));
        out.push_str(&format!("  Exception: {}\n\n", record.kind.as_str()));
    }
    out
}

/// Writes `failed_items_<timestamp>.log` under `output_dir`. Nothing is
/// written, and `None` returned, when there are no failures.
pub fn write_failure_log(
    output_dir: &Path,
    timestamp: &str,
    operation: &str,
    generated_at: &str,
    failures: &[FailureRecord],
) -> Result<Option<PathBuf>> {
    if failures.is_empty() {
        return Ok(None);
    }
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;
    let path = output_dir.join(timestamped_file_name("failed_items", timestamp, "log"));
    fs::write(&path, render_failure_log(operation, generated_at, failures))
        .with_context(|| format!("failed to write failure log to {}", path.display()))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{render_failure_log, write_failure_log};
    use crate::error::ErrorKind;
    use crate::model::FailureRecord;

    fn failure(path: &str, is_directory: bool) -> FailureRecord {
        FailureRecord {
            path: PathBuf::from(path),
            error: format!("read owner failed for '{path}': access is denied"),
            kind: ErrorKind::PermissionDenied,
            is_directory,
        }
    }

    #[test]
    fn summary_counts_and_path_order() {
        let failures = vec![
            failure("/test/z_file.txt", false),
            failure("/test/a_file.txt", false),
            failure("/test/m_dir", true),
        ];
        let text = render_failure_log("fix-owner", "2025-08-04T11:45:00Z", &failures);

        assert!(text.contains("Total Failed Files: 2"));
        assert!(text.contains("Total Failed Directories: 1"));
        assert!(text.contains("Total Failures: 3"));
        assert!(text.contains("Exception: PermissionDenied"));

        let a = text.find("File: /test/a_file.txt").expect("a listed");
        let m = text.find("Directory: /test/m_dir").expect("m listed");
        let z = text.find("File: /test/z_file.txt").expect("z listed");
        assert!(a < m && m < z);
    }

    #[test]
    fn no_file_without_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let written =
            write_failure_log(dir.path(), "20250804_114500", "fix-owner", "now", &[]).expect("ok");
        assert!(written.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).expect("read").count(), 0);
    }

    #[test]
    fn writes_timestamped_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("output");
        let written = write_failure_log(
            &out,
            "20250804_114500",
            "fix-owner",
            "now",
            &[failure("/test/x", false)],
        )
        .expect("writes")
        .expect("path returned");

        assert_eq!(written, out.join("failed_items_20250804_114500.log"));
        let text = std::fs::read_to_string(written).expect("read back");
        assert!(text.starts_with("Failed Items Log - fix-owner"));
    }
}
