use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, LocalFree, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND,
    ERROR_INSUFFICIENT_BUFFER, ERROR_INVALID_OWNER, ERROR_MORE_DATA, ERROR_NONE_MAPPED,
    ERROR_PATH_NOT_FOUND, ERROR_PRIVILEGE_NOT_HELD, ERROR_SHARING_VIOLATION, ERROR_SUCCESS, HANDLE,
};
use windows_sys::Win32::Security::Authentication::Identity::{GetUserNameExW, NameSamCompatible};
use windows_sys::Win32::Security::Authorization::{
    ConvertSidToStringSidW, ConvertStringSidToSidW, GetNamedSecurityInfoW, SetNamedSecurityInfoW,
    SE_FILE_OBJECT,
};
use windows_sys::Win32::Security::{
    GetTokenInformation, LookupAccountNameW, LookupAccountSidW, TokenElevation,
    OWNER_SECURITY_INFORMATION, PSECURITY_DESCRIPTOR, PSID, SID_NAME_USE, TOKEN_ELEVATION,
    TOKEN_QUERY,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use crate::error::{AccessError, ConfigurationError, ErrorKind};
use crate::identity::{IdentityResolver, OwnerInfo, ResolvedAccount};
use crate::model::Identifier;

const NAME_CAPACITY: u32 = 256;
const SID_CAPACITY: u32 = 68;

/// SID-based backend built on the Win32 security descriptor APIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsResolver;

impl IdentityResolver for WindowsResolver {
    fn get_owner(&self, path: &Path) -> Result<OwnerInfo, AccessError> {
        let mut wide = to_wide(path.as_os_str());
        let mut owner: PSID = ptr::null_mut();
        let mut descriptor: PSECURITY_DESCRIPTOR = ptr::null_mut();

        let status = unsafe {
            GetNamedSecurityInfoW(
                wide.as_mut_ptr(),
                SE_FILE_OBJECT,
                OWNER_SECURITY_INFORMATION,
                &mut owner,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                &mut descriptor,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(win32_error("read owner", &path.to_string_lossy(), status));
        }

        // `owner` points into `descriptor`; both live until LocalFree below.
        let result = sid_to_string(owner).map(|identifier| {
            let display_name = lookup_sid(owner).ok().flatten();
            OwnerInfo {
                identifier,
                display_name,
            }
        });
        unsafe {
            LocalFree(descriptor as _);
        }
        result.map_err(|code| win32_error("read owner", &path.to_string_lossy(), code))
    }

    fn account_name(&self, identifier: &Identifier) -> Result<Option<String>, AccessError> {
        let sid = OwnedSid::parse(identifier)
            .map_err(|code| win32_error("parse identifier", identifier.as_str(), code))?;
        lookup_sid(sid.as_psid())
            .map_err(|code| win32_error("look up account", identifier.as_str(), code))
    }

    fn set_owner(&self, path: &Path, identifier: &Identifier) -> Result<(), AccessError> {
        let sid = OwnedSid::parse(identifier)
            .map_err(|code| win32_error("parse identifier", identifier.as_str(), code))?;
        let mut wide = to_wide(path.as_os_str());

        let status = unsafe {
            SetNamedSecurityInfoW(
                wide.as_mut_ptr(),
                SE_FILE_OBJECT,
                OWNER_SECURITY_INFORMATION,
                sid.as_psid(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if status != ERROR_SUCCESS {
            return Err(win32_error("set owner", &path.to_string_lossy(), status));
        }
        Ok(())
    }

    fn resolve_account(&self, name: Option<&str>) -> Result<ResolvedAccount, ConfigurationError> {
        let account = match name {
            Some(name) => name.to_string(),
            None => current_user_name().map_err(|code| ConfigurationError::UnknownAccount {
                account: "current logged-in user".to_string(),
                reason: describe(code),
            })?,
        };

        let (identifier, domain) =
            lookup_name(&account).map_err(|code| ConfigurationError::UnknownAccount {
                account: account.clone(),
                reason: describe(code),
            })?;

        let display_name = if name.is_none() || account.contains('\\') || domain.is_empty() {
            account
        } else {
            format!("{domain}\\{account}")
        };
        Ok(ResolvedAccount {
            identifier,
            display_name,
        })
    }
}

pub(crate) fn process_is_elevated() -> bool {
    let mut token: HANDLE = 0 as HANDLE;
    if unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) } == 0 {
        return false;
    }
    let mut elevation = TOKEN_ELEVATION { TokenIsElevated: 0 };
    let mut returned = 0_u32;
    let ok = unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut TOKEN_ELEVATION as *mut _,
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
    };
    unsafe {
        CloseHandle(token);
    }
    ok != 0 && elevation.TokenIsElevated != 0
}

/// A SID allocated by `ConvertStringSidToSidW`, released on drop.
struct OwnedSid(PSID);

impl OwnedSid {
    fn parse(identifier: &Identifier) -> Result<Self, u32> {
        let mut wide = to_wide(OsStr::new(identifier.as_str()));
        let mut sid: PSID = ptr::null_mut();
        if unsafe { ConvertStringSidToSidW(wide.as_mut_ptr(), &mut sid) } == 0 {
            return Err(unsafe { GetLastError() });
        }
        Ok(Self(sid))
    }

    fn as_psid(&self) -> PSID {
        self.0
    }
}

impl Drop for OwnedSid {
    fn drop(&mut self) {
        unsafe {
            LocalFree(self.0 as _);
        }
    }
}

fn to_wide(value: &OsStr) -> Vec<u16> {
    value.encode_wide().chain(std::iter::once(0)).collect()
}

fn from_wide(buffer: &[u16]) -> String {
    let end = buffer.iter().position(|&ch| ch == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..end])
}

fn sid_to_string(sid: PSID) -> Result<Identifier, u32> {
    let mut text: *mut u16 = ptr::null_mut();
    if unsafe { ConvertSidToStringSidW(sid, &mut text) } == 0 {
        return Err(unsafe { GetLastError() });
    }
    let mut len = 0_usize;
    unsafe {
        while *text.add(len) != 0 {
            len += 1;
        }
    }
    let value = String::from_utf16_lossy(unsafe { std::slice::from_raw_parts(text, len) });
    unsafe {
        LocalFree(text as _);
    }
    Ok(Identifier::new(value))
}

/// `Ok(None)` when the SID maps to no account (`ERROR_NONE_MAPPED`).
fn lookup_sid(sid: PSID) -> Result<Option<String>, u32> {
    let mut name_len = NAME_CAPACITY;
    let mut domain_len = NAME_CAPACITY;
    loop {
        let mut name = vec![0_u16; name_len as usize];
        let mut domain = vec![0_u16; domain_len as usize];
        let mut use_kind: SID_NAME_USE = 0;
        let ok = unsafe {
            LookupAccountSidW(
                ptr::null(),
                sid,
                name.as_mut_ptr(),
                &mut name_len,
                domain.as_mut_ptr(),
                &mut domain_len,
                &mut use_kind,
            )
        };
        if ok != 0 {
            let name = from_wide(&name);
            let domain = from_wide(&domain);
            return Ok(Some(if domain.is_empty() {
                name
            } else {
                format!("{domain}\\{name}")
            }));
        }
        match unsafe { GetLastError() } {
            ERROR_NONE_MAPPED => return Ok(None),
            ERROR_INSUFFICIENT_BUFFER => continue,
            code => return Err(code),
        }
    }
}

fn lookup_name(account: &str) -> Result<(Identifier, String), u32> {
    let wide_account = to_wide(OsStr::new(account));
    let mut sid_len = SID_CAPACITY;
    let mut domain_len = NAME_CAPACITY;
    loop {
        let mut sid = vec![0_u8; sid_len as usize];
        let mut domain = vec![0_u16; domain_len as usize];
        let mut use_kind: SID_NAME_USE = 0;
        let ok = unsafe {
            LookupAccountNameW(
                ptr::null(),
                wide_account.as_ptr(),
                sid.as_mut_ptr() as PSID,
                &mut sid_len,
                domain.as_mut_ptr(),
                &mut domain_len,
                &mut use_kind,
            )
        };
        if ok != 0 {
            let identifier = sid_to_string(sid.as_mut_ptr() as PSID)?;
            return Ok((identifier, from_wide(&domain)));
        }
        match unsafe { GetLastError() } {
            ERROR_INSUFFICIENT_BUFFER => continue,
            code => return Err(code),
        }
    }
}

fn current_user_name() -> Result<String, u32> {
    current_user_name_from(NAME_CAPACITY)
}

// `len` comes back as the required size, including the terminator.
fn current_user_name_from(mut len: u32) -> Result<String, u32> {
    loop {
        let mut buffer = vec![0_u16; len as usize];
        if unsafe { GetUserNameExW(NameSamCompatible, buffer.as_mut_ptr(), &mut len) } != 0 {
            return Ok(from_wide(&buffer));
        }
        match unsafe { GetLastError() } {
            ERROR_MORE_DATA => continue,
            code => return Err(code),
        }
    }
}

fn win32_error(operation: &'static str, target: &str, code: u32) -> AccessError {
    let kind = match code {
        ERROR_ACCESS_DENIED | ERROR_PRIVILEGE_NOT_HELD | ERROR_INVALID_OWNER => {
            ErrorKind::PermissionDenied
        }
        ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => ErrorKind::NotFound,
        ERROR_SHARING_VIOLATION => ErrorKind::SharingViolation,
        _ => ErrorKind::Security,
    };
    AccessError::new(operation, target, kind, describe(code))
}

fn describe(code: u32) -> String {
    std::io::Error::from_raw_os_error(code as i32).to_string()
}
