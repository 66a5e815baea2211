//! Daemonisation and PID file handling, in the manner of daemon(7)
//!
//! Refuses to start while the PID file names a live process. Forks twice
//! with a `setsid` in between; the surviving child writes the PID file,
//! redirects stdio to the null device, clears the umask, and moves to the
//! filesystem root.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::Path;

use tracing::{debug, info};

use eapold_core::{Error, Result};

fn pid_alive(pid: i32) -> bool {
    pid > 0 && unsafe { libc::kill(pid, 0) } == 0
}

fn read_pid(file: &mut File) -> Option<i32> {
    let mut text = String::new();
    file.read_to_string(&mut text).ok()?;
    text.trim().parse().ok()
}

/// Exit early when the PID file already names a live process
fn check_pidfile(path: &Path) -> Result<()> {
    if let Ok(mut file) = File::open(path) {
        if let Some(pid) = read_pid(&mut file) {
            if pid_alive(pid) {
                info!("already daemonized (PID {pid})?");
                std::process::exit(0);
            }
        }
    }
    Ok(())
}

/// Write the PID file as per daemon(7): exclusive advisory lock, liveness
/// check of any existing PID, truncate, write ASCII PID + newline, fsync,
/// and verify by reading back.
pub fn write_pidfile(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::config(format!("cannot open PID file '{}': {e}", path.display())))?;

    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == -1 {
        return Err(Error::config(format!(
            "cannot lock PID file '{}': {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }

    if let Some(existing) = read_pid(&mut file) {
        if pid_alive(existing) {
            return Err(Error::config(format!(
                "found existing PID {existing} in PID file"
            )));
        }
    }

    let pid = unsafe { libc::getpid() };
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{pid}")?;
    file.sync_all()?;

    file.seek(SeekFrom::Start(0))?;
    if read_pid(&mut file) != Some(pid) {
        return Err(Error::config(format!(
            "cannot verify PID file '{}'",
            path.display()
        )));
    }

    info!("wrote PID {} to '{}'", pid, path.display());
    Ok(())
}

/// Redirect stdin, stdout, and stderr to the null device
pub fn redirect_stdio() -> Result<()> {
    let rdonly = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDONLY) };
    let wronly = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY) };
    if rdonly == -1 || wronly == -1 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    let rv = unsafe {
        libc::dup2(rdonly, libc::STDIN_FILENO) == -1
            || libc::dup2(wronly, libc::STDOUT_FILENO) == -1
            || libc::dup2(wronly, libc::STDERR_FILENO) == -1
    };
    unsafe {
        libc::close(rdonly);
        libc::close(wronly);
    }
    if rv {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn fork() -> Result<libc::pid_t> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(pid)
}

/// Daemonize the process. On return the caller is the daemon.
pub fn daemonize(pidfile: &Path) -> Result<()> {
    check_pidfile(pidfile)?;

    if unsafe { libc::getppid() } == 1 {
        info!("already daemonized");
        std::process::exit(0);
    }

    if fork()? > 0 {
        unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        debug!("parent exiting");
        std::process::exit(0);
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    if fork()? > 0 {
        unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        debug!("first child exiting");
        std::process::exit(0);
    }

    write_pidfile(pidfile)?;
    redirect_stdio()?;

    unsafe { libc::umask(0) };
    std::env::set_current_dir("/")?;

    info!("successfully daemonized");
    Ok(())
}
