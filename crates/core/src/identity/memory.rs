use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{AccessError, ConfigurationError, ErrorKind};
use crate::identity::{IdentityResolver, OwnerInfo, ResolvedAccount};
use crate::model::Identifier;

/// Resolver backed by in-memory tables instead of a real security subsystem.
///
/// Used for simulations and tests. Paths without an explicit owner fall back
/// to the default owner when one is configured.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    owners: HashMap<PathBuf, Identifier>,
    default_owner: Option<Identifier>,
    accounts: HashMap<Identifier, String>,
    current_user: Option<Identifier>,
    failing_reads: HashSet<PathBuf>,
    failing_writes: HashSet<PathBuf>,
    failing_lookups: HashSet<Identifier>,
    writes: Vec<(PathBuf, Identifier)>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, identifier: impl Into<Identifier>, name: &str) -> Self {
        self.lock()
            .accounts
            .insert(identifier.into(), name.to_string());
        self
    }

    pub fn with_current_user(self, identifier: impl Into<Identifier>) -> Self {
        self.lock().current_user = Some(identifier.into());
        self
    }

    pub fn with_default_owner(self, identifier: impl Into<Identifier>) -> Self {
        self.lock().default_owner = Some(identifier.into());
        self
    }

    pub fn with_owner(self, path: impl Into<PathBuf>, identifier: impl Into<Identifier>) -> Self {
        self.set_owner_entry(path, identifier);
        self
    }

    pub fn set_owner_entry(&self, path: impl Into<PathBuf>, identifier: impl Into<Identifier>) {
        self.lock().owners.insert(path.into(), identifier.into());
    }

    pub fn fail_reads_for(self, path: impl Into<PathBuf>) -> Self {
        self.lock().failing_reads.insert(path.into());
        self
    }

    pub fn fail_writes_for(self, path: impl Into<PathBuf>) -> Self {
        self.lock().failing_writes.insert(path.into());
        self
    }

    pub fn fail_lookups_for(self, identifier: impl Into<Identifier>) -> Self {
        self.lock().failing_lookups.insert(identifier.into());
        self
    }

    pub fn owner_of(&self, path: &Path) -> Option<Identifier> {
        let state = self.lock();
        state
            .owners
            .get(path)
            .cloned()
            .or_else(|| state.default_owner.clone())
    }

    pub fn writes(&self) -> Vec<(PathBuf, Identifier)> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned table still holds consistent data for test purposes.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl IdentityResolver for InMemoryResolver {
    fn get_owner(&self, path: &Path) -> Result<OwnerInfo, AccessError> {
        let state = self.lock();
        if state.failing_reads.contains(path) {
            return Err(AccessError::new(
                "read owner",
                path.to_string_lossy(),
                ErrorKind::PermissionDenied,
                "access is denied",
            ));
        }
        let identifier = state
            .owners
            .get(path)
            .cloned()
            .or_else(|| state.default_owner.clone())
            .ok_or_else(|| {
                AccessError::new(
                    "read owner",
                    path.to_string_lossy(),
                    ErrorKind::NotFound,
                    "no security descriptor recorded",
                )
            })?;
        let display_name = if state.failing_lookups.contains(&identifier) {
            None
        } else {
            state.accounts.get(&identifier).cloned()
        };
        Ok(OwnerInfo {
            identifier,
            display_name,
        })
    }

    fn account_name(&self, identifier: &Identifier) -> Result<Option<String>, AccessError> {
        let state = self.lock();
        if state.failing_lookups.contains(identifier) {
            return Err(AccessError::new(
                "look up account",
                identifier.as_str(),
                ErrorKind::Security,
                "account lookup service unavailable",
            ));
        }
        Ok(state.accounts.get(identifier).cloned())
    }

    fn set_owner(&self, path: &Path, identifier: &Identifier) -> Result<(), AccessError> {
        let mut state = self.lock();
        if state.failing_writes.contains(path) {
            return Err(AccessError::new(
                "set owner",
                path.to_string_lossy(),
                ErrorKind::PermissionDenied,
                "a required privilege is not held by the client",
            ));
        }
        state.owners.insert(path.to_path_buf(), identifier.clone());
        state.writes.push((path.to_path_buf(), identifier.clone()));
        Ok(())
    }

    fn resolve_account(&self, name: Option<&str>) -> Result<ResolvedAccount, ConfigurationError> {
        let state = self.lock();
        match name {
            Some(name) => state
                .accounts
                .iter()
                .filter(|(_, account)| account.eq_ignore_ascii_case(name))
                .min_by(|a, b| a.0.cmp(b.0))
                .map(|(identifier, account)| ResolvedAccount {
                    identifier: identifier.clone(),
                    display_name: account.clone(),
                })
                .ok_or_else(|| ConfigurationError::UnknownAccount {
                    account: name.to_string(),
                    reason: "no mapping between account names and security IDs was done"
                        .to_string(),
                }),
            None => {
                let identifier =
                    state
                        .current_user
                        .clone()
                        .ok_or_else(|| ConfigurationError::UnknownAccount {
                            account: "current user".to_string(),
                            reason: "no current user configured".to_string(),
                        })?;
                let display_name = state
                    .accounts
                    .get(&identifier)
                    .cloned()
                    .unwrap_or_else(|| identifier.to_string());
                Ok(ResolvedAccount {
                    identifier,
                    display_name,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::InMemoryResolver;
    use crate::error::ErrorKind;
    use crate::identity::IdentityResolver;
    use crate::model::Identifier;

    #[test]
    fn orphaned_owner_has_no_display_name() {
        let resolver = InMemoryResolver::new()
            .with_account("S-1-5-32-544", "BUILTIN\\Administrators")
            .with_owner("/data/a.txt", "S-1-5-21-9-9-9-1001");

        let owner = resolver.get_owner(Path::new("/data/a.txt")).expect("owner");
        assert_eq!(owner.identifier, Identifier::new("S-1-5-21-9-9-9-1001"));
        assert_eq!(owner.display_name, None);
        assert!(!resolver
            .is_resolvable(&owner.identifier)
            .expect("lookup runs"));
    }

    #[test]
    fn failing_lookup_is_an_error_not_a_miss() {
        let resolver = InMemoryResolver::new().fail_lookups_for("S-1-5-21-1-1-1-500");
        let err = resolver
            .is_resolvable(&Identifier::new("S-1-5-21-1-1-1-500"))
            .expect_err("lookup fails");
        assert_eq!(err.kind, ErrorKind::Security);
    }

    #[test]
    fn set_owner_records_write() {
        let resolver = InMemoryResolver::new().with_default_owner("S-1-5-21-9-9-9-1001");
        resolver
            .set_owner(Path::new("/data"), &Identifier::new("S-1-5-32-544"))
            .expect("write succeeds");

        assert_eq!(
            resolver.owner_of(Path::new("/data")),
            Some(Identifier::new("S-1-5-32-544"))
        );
        assert_eq!(resolver.writes().len(), 1);
    }

    #[test]
    fn resolve_account_by_name_and_current_user() {
        let resolver = InMemoryResolver::new()
            .with_account("S-1-5-21-1-1-1-1001", "CONTOSO\\alice")
            .with_current_user("S-1-5-21-1-1-1-1001");

        let named = resolver
            .resolve_account(Some("contoso\\ALICE"))
            .expect("name resolves");
        assert_eq!(named.identifier.as_str(), "S-1-5-21-1-1-1-1001");

        let current = resolver.resolve_account(None).expect("current user");
        assert_eq!(current.display_name, "CONTOSO\\alice");

        assert!(resolver.resolve_account(Some("bob")).is_err());
    }
}
