//! Least-privilege setup: chroot into the service user's home, drop to
//! that user, and pin the privilege set. Installed before the event loop
//! starts; afterwards the process can only use stdio, the unix sockets
//! it holds, and descriptors received over them.

use std::ffi::CString;

use unwind_dns_domain::FrontendError;

/// Unprivileged account the frontend runs as.
pub const FRONTEND_USER: &str = "_unwind";

/// Chroots into `user`'s home directory and drops to their uid/gid.
pub fn drop_privileges(user: &str) -> Result<(), FrontendError> {
    let name = CString::new(user).map_err(|_| FrontendError::Config("bad user name".into()))?;
    let root = CString::new("/").expect("static path");

    unsafe {
        let pw = libc::getpwnam(name.as_ptr());
        if pw.is_null() {
            return Err(FrontendError::Config(format!("getpwnam: no user {}", user)));
        }
        let uid = (*pw).pw_uid;
        let gid = (*pw).pw_gid;

        if libc::chroot((*pw).pw_dir) == -1 {
            return Err(FrontendError::Io(format!(
                "chroot: {}",
                std::io::Error::last_os_error()
            )));
        }
        if libc::chdir(root.as_ptr()) == -1 {
            return Err(FrontendError::Io(format!(
                "chdir(\"/\"): {}",
                std::io::Error::last_os_error()
            )));
        }

        if libc::setgroups(1, &gid) != 0
            || libc::setresgid(gid, gid, gid) != 0
            || libc::setresuid(uid, uid, uid) != 0
        {
            return Err(FrontendError::Io("can't drop privileges".into()));
        }
    }
    Ok(())
}

/// Pins the reduced privilege set: no path to new privileges remains,
/// and with the chroot in place no filesystem surface does either.
pub fn restrict_capabilities() -> Result<(), FrontendError> {
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(FrontendError::Io(format!(
            "prctl: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// SIGPIPE and SIGHUP are noise for this process: writes to dead peers
/// already report errors, and reload arrives over the main channel.
pub fn ignore_hangup_signals() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }
}
