//! Process hardening methods.

use std::ffi::CString;
use std::io;

use crate::admin::{AdminReply, AdminTable};
use crate::benc::Dict;
use crate::error::{RequestError, Result};

/// User looked up when `Security_getUser` is called without one
pub const DEFAULT_USER: &str = "nobody";

/// Account ids for a user name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIds {
    /// User id
    pub uid: u32,
    /// Primary group id
    pub gid: u32,
}

fn os_error(what: &str, err: io::Error) -> RequestError {
    RequestError::InvalidArgument(format!("{what}: {err}").into())
}

/// Look up `name` in the password database.
pub fn lookup_user(name: &str) -> std::result::Result<UserIds, RequestError> {
    let c_name = CString::new(name)
        .map_err(|_| RequestError::InvalidArgument("user name contains NUL".into()))?;
    // SAFETY: passwd is plain old data; all-zero is a valid value.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; 16 * 1024];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: every pointer is valid for the duration of the call and the
    // buffer length matches the buffer.
    let rc = unsafe {
        libc::getpwnam_r(
            c_name.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 {
        return Err(os_error("getpwnam_r", io::Error::from_raw_os_error(rc)));
    }
    if result.is_null() {
        return Err(RequestError::InvalidArgument(
            format!("no such user '{name}'").into(),
        ));
    }
    Ok(UserIds {
        uid: pwd.pw_uid,
        gid: pwd.pw_gid,
    })
}

/// Forbid opening any further file descriptors.
pub fn no_files() -> std::result::Result<(), RequestError> {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: setrlimit reads the struct we pass and nothing else.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) };
    if rc != 0 {
        return Err(os_error("setrlimit", io::Error::last_os_error()));
    }
    tracing::info!("file descriptor limit set to zero");
    Ok(())
}

/// Register `Security_noFiles` and `Security_getUser`.
pub fn register_admin(table: &mut AdminTable) -> Result<()> {
    table.register("Security_noFiles", true, |_: &Dict| {
        no_files()?;
        Ok(AdminReply::Message(Dict::new().with("error", "none")))
    })?;
    table.register("Security_getUser", true, |args: &Dict| {
        let name = match args.get("user") {
            None => DEFAULT_USER,
            Some(v) => v.as_str().ok_or(RequestError::MissingField("user"))?,
        };
        let ids = lookup_user(name)?;
        Ok(AdminReply::Message(
            Dict::new()
                .with("error", "none")
                .with("uid", i64::from(ids.uid))
                .with("gid", i64::from(ids.gid)),
        ))
    })
}
