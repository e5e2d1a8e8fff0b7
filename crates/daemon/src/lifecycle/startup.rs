// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup plumbing, in the order `main` runs it: logging, fd limits,
//! listener bind (before the privilege drop), chroot/chuser, detach,
//! pidfile.

use super::LifecycleError;
use fcp_config::GlobalSettings;
use fcp_core::ProjectSettings;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use nix::unistd::{chdir, chroot, setgid, setuid, User};
use std::net::{TcpListener, ToSocketAddrs};
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Marker environment variable: set in the re-executed background child.
pub const DAEMONIZED_ENV: &str = "FCGIPOOL_DAEMONIZED";

/// Initialize tracing. `debuglevel` maps 0 to info, 1 to debug, 2+ to
/// trace; `RUST_LOG` refines it. With a logfile configured, output goes
/// there through a non-blocking writer whose guard the caller must hold.
pub fn init_logging(
    global: &GlobalSettings,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LifecycleError> {
    let level = match global.debuglevel {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match &global.logfile {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().ok_or_else(|| LifecycleError::LogFile {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
            })?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

/// This scheduler holds a lot of descriptors. Estimate the need and raise
/// the soft limit when it is below; warn when the hard limit refuses.
///
/// Per project: two sockets for roughly 20 descriptors a child holds,
/// plus one slot per worker, plus log/listener/pipe overhead and the
/// ~950 descriptors observed outside the scheduler's own accounting.
pub fn check_resource_limits(projects: &[ProjectSettings]) -> Result<(), LifecycleError> {
    let (soft, hard) =
        getrlimit(Resource::RLIMIT_NOFILE).map_err(|e| LifecycleError::ResourceLimit(e.into()))?;

    let worker_slots: u64 = projects.iter().map(|p| p.max_proc as u64).sum();
    let needed = projects.len() as u64 * 2 * 20 + worker_slots + 7 + 950;
    info!(soft, hard, needed, "open-file limits");

    if soft >= needed {
        return Ok(());
    }
    if needed > hard {
        warn!(
            needed,
            hard,
            "hard open-file limit is below the calculated need; consider raising \
             the nofile entry in /etc/security/limits.conf"
        );
        setrlimit(Resource::RLIMIT_NOFILE, hard, hard)
            .map_err(|e| LifecycleError::ResourceLimit(e.into()))?;
    } else {
        warn!(soft, needed, "raising soft open-file limit");
        setrlimit(Resource::RLIMIT_NOFILE, needed, hard)
            .map_err(|e| LifecycleError::ResourceLimit(e.into()))?;
    }
    Ok(())
}

/// Bind and listen on the configured address before privileges drop.
/// `*` binds the wildcard address.
pub fn bind_listener(global: &GlobalSettings) -> Result<TcpListener, LifecycleError> {
    let host = if global.listen == "*" { "::" } else { global.listen.as_str() };
    let addrs = (host, global.port)
        .to_socket_addrs()
        .map_err(|_| LifecycleError::Resolve(global.listen.clone()))?;

    let mut last_error: Option<std::io::Error> = None;
    for addr in addrs {
        match TcpListener::bind(addr) {
            Ok(listener) => {
                info!(%addr, "listening");
                return Ok(listener);
            }
            Err(e) => last_error = Some(e),
        }
    }
    // The wildcard v6 address may be unavailable; fall back to v4-any
    if global.listen == "*" {
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", global.port)) {
            info!(port = global.port, "listening on 0.0.0.0");
            return Ok(listener);
        }
    }
    Err(LifecycleError::Bind {
        listen: global.listen.clone(),
        port: global.port,
        source: last_error
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address")),
    })
}

/// chroot (if configured), drop to the configured user, and move the
/// working directory to `/` so workers inherit a sane default.
pub fn drop_privileges(global: &GlobalSettings) -> Result<(), LifecycleError> {
    if let Some(root) = &global.chroot {
        if global.chuser.is_none() {
            warn!(
                "chroot requested without chuser; a root process can break out of the jail"
            );
        }
        chroot(root.as_path()).map_err(|e| LifecycleError::PrivilegeDrop(e.into()))?;
        info!(root = %root.display(), "changed root directory");
    }

    if let Some(name) = &global.chuser {
        let user = User::from_name(name)
            .map_err(|e| LifecycleError::PrivilegeDrop(e.into()))?
            .ok_or_else(|| LifecycleError::UnknownUser(name.clone()))?;
        setgid(user.gid).map_err(|e| LifecycleError::PrivilegeDrop(e.into()))?;
        setuid(user.uid).map_err(|e| LifecycleError::PrivilegeDrop(e.into()))?;
        info!(user = %name, uid = %user.uid, gid = %user.gid, "dropped privileges");
    }

    chdir("/").map_err(|e| LifecycleError::PrivilegeDrop(e.into()))?;
    Ok(())
}

/// Detach by re-executing into the background.
///
/// Runs last in the startup sequence, after the fd-limit check, the bind,
/// and the privilege drop, so every fatal startup error surfaces in the
/// foreground invocation's exit status. The bound listener is handed to
/// the child on fd 0 and recovered via [`inherited_listener`]; the child
/// runs in a fresh process group with the marker variable set.
/// stdout/stderr stay attached (the log redirect handles them), matching
/// the original daemon(nochdir, noclose) behavior.
pub fn detach(listener: TcpListener) -> Result<(), LifecycleError> {
    let exe = std::env::current_exe().map_err(LifecycleError::Detach)?;
    let mut command = std::process::Command::new(exe);
    command
        .args(std::env::args_os().skip(1))
        .env(DAEMONIZED_ENV, "1")
        .stdin(std::process::Stdio::from(OwnedFd::from(listener)));
    std::os::unix::process::CommandExt::process_group(&mut command, 0);
    command.spawn().map_err(LifecycleError::Detach)?;
    Ok(())
}

/// The listening socket handed over by the foreground parent; present iff
/// this process is the re-executed background child.
pub fn inherited_listener() -> Result<Option<TcpListener>, LifecycleError> {
    if std::env::var_os(DAEMONIZED_ENV).is_none() {
        return Ok(None);
    }
    let fd = std::io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .map_err(LifecycleError::Detach)?;
    Ok(Some(TcpListener::from(fd)))
}

/// Pidfile handle; the file is removed when dropped (clean exit).
pub struct PidFile {
    path: PathBuf,
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %error, "cannot remove pidfile");
        }
    }
}

/// Write the current pid to `path`.
pub fn write_pidfile(path: &Path) -> Result<PidFile, LifecycleError> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .map_err(|source| LifecycleError::PidFile { path: path.to_path_buf(), source })?;
    Ok(PidFile { path: path.to_path_buf() })
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
