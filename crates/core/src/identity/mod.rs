mod memory;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AccessError, ConfigurationError};
use crate::model::Identifier;

pub use memory::InMemoryResolver;
#[cfg(unix)]
pub use unix::PosixResolver;
#[cfg(windows)]
pub use windows::WindowsResolver;

#[cfg(unix)]
pub type PlatformResolver = PosixResolver;
#[cfg(windows)]
pub type PlatformResolver = WindowsResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerInfo {
    pub identifier: Identifier,
    /// `None` when the identifier no longer maps to an account name.
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub identifier: Identifier,
    pub display_name: String,
}

pub trait IdentityResolver {
    fn get_owner(&self, path: &Path) -> Result<OwnerInfo, AccessError>;

    /// Looks up the account name behind `identifier`.
    ///
    /// `Ok(None)` means the lookup ran and found no account. Errors are
    /// reserved for failures of the lookup machinery itself.
    fn account_name(&self, identifier: &Identifier) -> Result<Option<String>, AccessError>;

    fn is_resolvable(&self, identifier: &Identifier) -> Result<bool, AccessError> {
        Ok(self.account_name(identifier)?.is_some())
    }

    /// Rewrites only the owner of `path`; all other security metadata is kept.
    fn set_owner(&self, path: &Path, identifier: &Identifier) -> Result<(), AccessError>;

    /// Resolves an account name, or the current user when `name` is `None`.
    fn resolve_account(&self, name: Option<&str>) -> Result<ResolvedAccount, ConfigurationError>;
}

impl<R: IdentityResolver + ?Sized> IdentityResolver for &R {
    fn get_owner(&self, path: &Path) -> Result<OwnerInfo, AccessError> {
        (**self).get_owner(path)
    }

    fn account_name(&self, identifier: &Identifier) -> Result<Option<String>, AccessError> {
        (**self).account_name(identifier)
    }

    fn is_resolvable(&self, identifier: &Identifier) -> Result<bool, AccessError> {
        (**self).is_resolvable(identifier)
    }

    fn set_owner(&self, path: &Path, identifier: &Identifier) -> Result<(), AccessError> {
        (**self).set_owner(path, identifier)
    }

    fn resolve_account(&self, name: Option<&str>) -> Result<ResolvedAccount, ConfigurationError> {
        (**self).resolve_account(name)
    }
}

pub fn default_resolver() -> PlatformResolver {
    PlatformResolver::default()
}

/// Whether the process runs with administrator (or root) rights.
pub fn is_elevated() -> bool {
    #[cfg(windows)]
    {
        windows::process_is_elevated()
    }
    #[cfg(unix)]
    {
        unix::process_is_root()
    }
}
