use std::env;

use serde::{Deserialize, Serialize};

use crate::identity::{default_resolver, is_elevated, IdentityResolver};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorInfo {
    pub os: String,
    pub arch: String,
    pub current_dir: Option<String>,
    pub elevated: bool,
    pub current_account: Option<String>,
    pub current_identifier: Option<String>,
    pub notes: Vec<String>,
}

pub fn collect_doctor_info() -> DoctorInfo {
    let current_dir = env::current_dir()
        .ok()
        .map(|path| path.to_string_lossy().to_string());
    let elevated = is_elevated();

    let mut notes = vec![
        "Only the owner field is rewritten; ACLs and other security metadata are left untouched."
            .to_string(),
        "Runs are simulated unless --execute is passed.".to_string(),
    ];
    if !elevated {
        notes.push(
            "Not running elevated; ownership changes will likely fail with access denied."
                .to_string(),
        );
    }

    let (current_account, current_identifier) = match default_resolver().resolve_account(None) {
        Ok(account) => (
            Some(account.display_name),
            Some(account.identifier.to_string()),
        ),
        Err(err) => {
            notes.push(format!("Current account could not be resolved: {err}"));
            (None, None)
        }
    };

    DoctorInfo {
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        current_dir,
        elevated,
        current_account,
        current_identifier,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::collect_doctor_info;

    #[test]
    fn reports_platform_and_notes() {
        let info = collect_doctor_info();
        assert_eq!(info.os, std::env::consts::OS);
        assert!(!info.notes.is_empty());
        assert_eq!(info.current_account.is_some(), info.current_identifier.is_some());
    }
}
