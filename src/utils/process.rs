/// Whether a process with this pid currently exists.
pub fn is_process_alive(pid: u32) -> bool {
    // pid 0 and values past i32::MAX address process groups, not a process.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    #[cfg(unix)]
    {
        // EPERM means the process exists but belongs to someone else.
        let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
        ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Asks the process to terminate. Returns false if the signal could not be sent.
pub fn terminate_process(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 || pid == std::process::id() {
        return false;
    }

    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
