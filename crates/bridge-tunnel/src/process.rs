//! Process probing helpers (spec.md §4.D), grounded on `tunnel.py`'s
//! `_is_process_alive`/`_is_cloudflared_process`/`_find_pid_on_port`.

use std::time::Duration;

use tokio::process::Command;

/// Send signal 0 to check liveness without actually signalling the process.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Confirm a PID is actually cloudflared, not a recycled PID reused by an
/// unrelated process.
pub async fn is_cloudflared_process(pid: u32) -> bool {
    let output = Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "comm="])
        .output()
        .await;
    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout)
            .trim()
            .contains("cloudflared"),
        Err(_) => false,
    }
}

/// Find the PID of the cloudflared process listening on `port`, if any.
pub async fn find_pid_on_port(port: u16) -> Option<u32> {
    let output = Command::new("lsof")
        .args(["-ti", &format!(":{port}")])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if let Ok(pid) = line.trim().parse::<u32>() {
            if is_cloudflared_process(pid).await {
                return Some(pid);
            }
        }
    }
    None
}

/// Send SIGTERM, wait briefly, then SIGKILL if still alive.
pub async fn terminate_pid(pid: u32, grace: Duration) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    tokio::time::sleep(grace).await;
    if is_process_alive(pid) {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}
