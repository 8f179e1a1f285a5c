use std::ffi::{CStr, CString};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::{AccessError, ConfigurationError, ErrorKind};
use crate::identity::{IdentityResolver, OwnerInfo, ResolvedAccount};
use crate::model::Identifier;

const INITIAL_BUFFER: usize = 1024;
const MAX_BUFFER: usize = 1 << 20;

/// Uid-based backend: an owner is orphaned when its uid has no passwd entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixResolver;

impl IdentityResolver for PosixResolver {
    fn get_owner(&self, path: &Path) -> Result<OwnerInfo, AccessError> {
        let metadata =
            fs::symlink_metadata(path).map_err(|err| AccessError::from_io("read owner", path, &err))?;
        let uid = metadata.uid();
        let display_name = user_name(uid).ok().flatten();
        Ok(OwnerInfo {
            identifier: Identifier::new(uid.to_string()),
            display_name,
        })
    }

    fn account_name(&self, identifier: &Identifier) -> Result<Option<String>, AccessError> {
        let uid = parse_uid(identifier)?;
        user_name(uid).map_err(|err| {
            AccessError::new(
                "look up account",
                identifier.as_str(),
                ErrorKind::Security,
                err.to_string(),
            )
        })
    }

    fn set_owner(&self, path: &Path, identifier: &Identifier) -> Result<(), AccessError> {
        let uid = parse_uid(identifier)?;
        std::os::unix::fs::lchown(path, Some(uid), None)
            .map_err(|err| AccessError::from_io("set owner", path, &err))
    }

    fn resolve_account(&self, name: Option<&str>) -> Result<ResolvedAccount, ConfigurationError> {
        let account = name.unwrap_or("current user").to_string();
        let unknown = |reason: String| ConfigurationError::UnknownAccount {
            account: account.clone(),
            reason,
        };

        let uid = match name {
            None => unsafe { libc::geteuid() },
            Some(name) => match name.parse::<libc::uid_t>() {
                Ok(uid) => uid,
                Err(_) => user_id(name)
                    .map_err(|err| unknown(err.to_string()))?
                    .ok_or_else(|| unknown("no such user".to_string()))?,
            },
        };
        let display_name = user_name(uid)
            .map_err(|err| unknown(err.to_string()))?
            .ok_or_else(|| unknown(format!("uid {uid} has no passwd entry")))?;

        Ok(ResolvedAccount {
            identifier: Identifier::new(uid.to_string()),
            display_name,
        })
    }
}

pub(crate) fn process_is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn parse_uid(identifier: &Identifier) -> Result<libc::uid_t, AccessError> {
    identifier.as_str().parse::<libc::uid_t>().map_err(|_| {
        AccessError::new(
            "parse identifier",
            identifier.as_str(),
            ErrorKind::Security,
            "not a numeric uid",
        )
    })
}

fn user_name(uid: libc::uid_t) -> io::Result<Option<String>> {
    let mut buffer = vec![0 as libc::c_char; INITIAL_BUFFER];
    loop {
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut entry,
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buffer.len() < MAX_BUFFER {
            let grown = buffer.len() * 2;
            buffer.resize(grown, 0);
            continue;
        }
        return passwd_lookup_result(rc, result, || unsafe {
            CStr::from_ptr(entry.pw_name).to_string_lossy().into_owned()
        });
    }
}

fn user_id(name: &str) -> io::Result<Option<libc::uid_t>> {
    let c_name = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "account name contains NUL"))?;
    let mut buffer = vec![0 as libc::c_char; INITIAL_BUFFER];
    loop {
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                c_name.as_ptr(),
                &mut entry,
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buffer.len() < MAX_BUFFER {
            let grown = buffer.len() * 2;
            buffer.resize(grown, 0);
            continue;
        }
        return passwd_lookup_result(rc, result, || entry.pw_uid);
    }
}

/// getpw*_r report "no such entry" through a null result, and some libcs
/// through one of these codes instead.
fn passwd_lookup_result<T>(
    rc: libc::c_int,
    result: *mut libc::passwd,
    read: impl FnOnce() -> T,
) -> io::Result<Option<T>> {
    if rc != 0 {
        if matches!(rc, libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM) {
            return Ok(None);
        }
        return Err(io::Error::from_raw_os_error(rc));
    }
    if result.is_null() {
        return Ok(None);
    }
    Ok(Some(read()))
}

#[cfg(test)]
mod tests {
    use super::PosixResolver;
    use crate::identity::IdentityResolver;
    use crate::model::Identifier;

    #[test]
    fn reads_owner_of_fresh_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("owned.txt");
        std::fs::write(&file, b"x").expect("write");

        let owner = PosixResolver.get_owner(&file).expect("owner");
        let expected = unsafe { libc::geteuid() }.to_string();
        assert_eq!(owner.identifier, Identifier::new(expected));
    }

    #[test]
    fn missing_path_is_an_access_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = PosixResolver
            .get_owner(&dir.path().join("missing"))
            .expect_err("missing path fails");
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn non_numeric_identifier_is_rejected() {
        let err = PosixResolver
            .account_name(&Identifier::new("S-1-5-18"))
            .expect_err("not a uid");
        assert!(err.to_string().contains("not a numeric uid"));
    }

    #[test]
    fn unknown_account_name_is_a_configuration_error() {
        assert!(PosixResolver
            .resolve_account(Some("no-such-user-for-fix-owner-tests"))
            .is_err());
    }
}
