//! Cloudflare quick-tunnel supervisor (spec.md §4.D), grounded on
//! `tunnel.py`'s `TunnelManager`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::cloudflared::ensure_cloudflared;
use crate::error::{Result, TunnelError};
use crate::process::{find_pid_on_port, is_cloudflared_process, is_process_alive, terminate_pid};
use crate::sink::UrlChangeSink;
use crate::state::{self, TunnelState};

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https://[a-z0-9-]+\.trycloudflare\.com").unwrap());

/// Exponential backoff schedule before falling back to flat slow retry.
pub const RESTART_DELAYS: [Duration; 5] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
    Duration::from_secs(300),
];
pub const BACKGROUND_RETRY_INTERVAL: Duration = Duration::from_secs(600);
pub const START_TIMEOUT: Duration = Duration::from_secs(30);

enum Owned {
    Spawned(Child),
    Adopted(u32),
    None,
}

/// Supervises one cloudflared quick-tunnel subprocess with adopt-on-restart
/// and auto-restart-with-backoff semantics.
pub struct TunnelManager {
    local_port: u16,
    state_file: PathBuf,
    sink: Arc<dyn UrlChangeSink>,
    process: Mutex<Owned>,
    public_url: watch::Sender<Option<String>>,
    stopping: AtomicBool,
    auto_restarting: AtomicBool,
}

impl TunnelManager {
    pub fn new(local_port: u16, state_file: Option<PathBuf>, sink: Arc<dyn UrlChangeSink>) -> Arc<Self> {
        let (tx, _rx) = watch::channel(None);
        Arc::new(Self {
            local_port,
            state_file: state_file.unwrap_or_else(state::default_state_path),
            sink,
            process: Mutex::new(Owned::None),
            public_url: tx,
            stopping: AtomicBool::new(false),
            auto_restarting: AtomicBool::new(false),
        })
    }

    pub fn public_url(&self) -> Option<String> {
        self.public_url.borrow().clone()
    }

    /// Adopt an existing healthy tunnel from a prior run, or spawn a new one.
    pub async fn start(self: &Arc<Self>) -> Result<String> {
        self.stopping.store(false, Ordering::SeqCst);

        if let Some(url) = self.try_adopt().await {
            return Ok(url);
        }

        match self.spawn().await {
            Ok(url) => Ok(url),
            Err(e) => {
                if is_port_conflict(&e) {
                    if let Some(orphan) = find_pid_on_port(self.local_port).await {
                        warn!(pid = orphan, port = self.local_port, "killing orphaned cloudflared on our port");
                        terminate_pid(orphan, Duration::from_secs(1)).await;
                        return self.spawn().await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn try_adopt(self: &Arc<Self>) -> Option<String> {
        let state = state::load(&self.state_file).ok()?;
        let (pid, url, port) = (state.pid?, state.url?, state.port);

        if let Some(port) = port {
            if port != self.local_port {
                debug!(state_port = port, our_port = self.local_port, "port mismatch, skipping adoption");
                return None;
            }
        }

        if !is_process_alive(pid) {
            state::remove(&self.state_file);
            return None;
        }
        if !is_cloudflared_process(pid).await {
            state::remove(&self.state_file);
            return None;
        }
        if !check_url_healthy(&url).await {
            warn!(pid, %url, "adopted candidate unreachable, killing it");
            terminate_pid(pid, Duration::from_secs(1)).await;
            state::remove(&self.state_file);
            return None;
        }

        *self.process.lock().await = Owned::Adopted(pid);
        let _ = self.public_url.send(Some(url.clone()));
        info!(pid, %url, "adopted existing cloudflared tunnel");

        let this = self.clone();
        tokio::spawn(async move { this.monitor_adopted(pid).await });

        Some(url)
    }

    async fn monitor_adopted(self: Arc<Self>, pid: u32) {
        loop {
            tokio::time::sleep(Duration::from_secs(10)).await;
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            if !is_process_alive(pid) {
                warn!(pid, "adopted cloudflared has exited");
                *self.process.lock().await = Owned::None;
                let _ = self.public_url.send(None);
                let this = self.clone();
                tokio::spawn(async move { this.auto_restart().await });
                return;
            }
        }
    }

    async fn spawn(self: &Arc<Self>) -> Result<String> {
        let bin = ensure_cloudflared().await?;
        info!(port = self.local_port, "starting cloudflared quick tunnel");

        let mut child = Command::new(bin)
            .args(["tunnel", "--url", &format!("http://localhost:{}", self.local_port)])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take().expect("piped stderr");
        let pid = child.id();
        *self.process.lock().await = Owned::Spawned(child);

        let (found_tx, mut found_rx) = watch::channel(None::<String>);
        let this = self.clone();
        tokio::spawn(async move { this.read_stderr(stderr, found_tx).await });

        let wait = async {
            loop {
                if found_rx.changed().await.is_err() {
                    return None;
                }
                let url = found_rx.borrow().clone();
                if url.is_some() {
                    return url;
                }
            }
        };

        let url = match tokio::time::timeout(START_TIMEOUT, wait).await {
            Ok(Some(url)) => url,
            _ => {
                warn!("timed out waiting for cloudflared URL");
                self.kill_current().await;
                return Err(TunnelError::StartTimeout(START_TIMEOUT));
            }
        };

        info!(%url, "tunnel active");
        let _ = self.public_url.send(Some(url.clone()));
        self.save_state(pid, &url).await;
        Ok(url)
    }

    async fn read_stderr(self: Arc<Self>, stderr: tokio::process::ChildStderr, found: watch::Sender<Option<String>>) {
        let mut lines = BufReader::new(stderr).lines();
        let mut reported = false;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(target: "cloudflared", "{line}");
                    if !reported {
                        if let Some(m) = URL_RE.find(&line) {
                            reported = true;
                            let _ = found.send(Some(m.as_str().to_string()));
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if !self.stopping.load(Ordering::SeqCst) && !self.auto_restarting.load(Ordering::SeqCst) {
            let this = self.clone();
            tokio::spawn(async move { this.auto_restart().await });
        }
    }

    async fn kill_current(self: &Arc<Self>) {
        let mut guard = self.process.lock().await;
        if let Owned::Spawned(child) = &mut *guard {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        }
        *guard = Owned::None;
        let _ = self.public_url.send(None);
    }

    async fn save_state(&self, pid: Option<u32>, url: &str) {
        let Some(pid) = pid else { return };
        let state = TunnelState {
            pid: Some(pid),
            url: Some(url.to_string()),
            port: Some(self.local_port),
            started_at: Some(Utc::now()),
        };
        if let Err(e) = state::save(&self.state_file, &state) {
            warn!(error = %e, "failed to save tunnel state");
        }
    }

    /// Restart with exponential backoff, then an infinite flat-interval
    /// retry once the schedule is exhausted. Guarded against nested entry.
    async fn auto_restart(self: Arc<Self>) {
        if self
            .auto_restarting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.auto_restart_loop().await;
        self.auto_restarting.store(false, Ordering::SeqCst);
    }

    async fn auto_restart_loop(self: &Arc<Self>) {
        for (attempt, delay) in RESTART_DELAYS.iter().enumerate() {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            info!(delay = ?delay, attempt = attempt + 1, total = RESTART_DELAYS.len(), "auto-restarting cloudflared");
            tokio::time::sleep(*delay).await;
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            match self.spawn().await {
                Ok(url) => {
                    self.sink.on_url_change(&url).await;
                    info!(%url, "tunnel auto-restarted");
                    return;
                }
                Err(e) => warn!(error = %e, attempt = attempt + 1, "auto-restart attempt failed"),
            }
        }

        warn!(interval = ?BACKGROUND_RETRY_INTERVAL, "initial auto-restart attempts exhausted, entering background retry");
        let mut attempt = RESTART_DELAYS.len();
        loop {
            tokio::time::sleep(BACKGROUND_RETRY_INTERVAL).await;
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            attempt += 1;
            match self.spawn().await {
                Ok(url) => {
                    self.sink.on_url_change(&url).await;
                    info!(%url, attempt, "tunnel recovered after background retry");
                    return;
                }
                Err(_) => warn!(attempt, interval = ?BACKGROUND_RETRY_INTERVAL, "background retry failed, will retry"),
            }
        }
    }

    /// Stop the tunnel and remove the state file.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);

        let mut guard = self.process.lock().await;
        match &mut *guard {
            Owned::Spawned(child) => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
                info!("cloudflared stopped");
            }
            Owned::Adopted(pid) => {
                terminate_pid(*pid, Duration::from_secs(5)).await;
                info!(pid, "adopted cloudflared stopped");
            }
            Owned::None => {}
        }
        *guard = Owned::None;
        let _ = self.public_url.send(None);
        state::remove(&self.state_file);
    }

    /// Detach without killing the subprocess, leaving the state file in
    /// place so the next process instance can adopt it.
    pub async fn detach(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let mut guard = self.process.lock().await;
        let pid = match &*guard {
            Owned::Spawned(child) => child.id(),
            Owned::Adopted(pid) => Some(*pid),
            Owned::None => None,
        };
        if let (Some(pid), Some(url)) = (pid, self.public_url()) {
            self.save_state(Some(pid), &url).await;
        }
        *guard = Owned::None;
        let _ = self.public_url.send(None);
        info!("detached from cloudflared tunnel (preserved for next instance)");
    }

    pub async fn restart(self: &Arc<Self>) -> Result<String> {
        self.stop().await;
        self.start().await
    }
}

fn is_port_conflict(e: &TunnelError) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("address already in use") || msg.contains("bind")
}

async fn check_url_healthy(url: &str) -> bool {
    let client = reqwest::Client::new();
    match client.get(url).timeout(Duration::from_secs(5)).send().await {
        Ok(resp) => (resp.status().as_u16()) < 600,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_regex_extracts_trycloudflare_url() {
        let line = "2024-01-01T00:00:00Z INF |  https://random-words-here.trycloudflare.com  |";
        let m = URL_RE.find(line).unwrap();
        assert_eq!(m.as_str(), "https://random-words-here.trycloudflare.com");
    }

    #[test]
    fn detects_port_conflict_messages() {
        assert!(is_port_conflict(&TunnelError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "Address already in use (os error 98)"
        ))));
        assert!(!is_port_conflict(&TunnelError::NoUrl));
    }

    #[test]
    fn restart_delays_match_spec_schedule() {
        let secs: Vec<u64> = RESTART_DELAYS.iter().map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![10, 30, 60, 120, 300]);
    }
}
