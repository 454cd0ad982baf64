//! Local backend process supervision.
//!
//! Spawns the backend executable with its storage descriptor, drains
//! its standard streams into the log, and terminates it with a
//! graceful-then-forceful escalation. At most one backend process is
//! alive per session: starting a replacement first fully stops the
//! previous one, so two processes never contend for the same storage
//! file.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::config::ServerConfig;

/// Owning handle to a live backend process.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    child: Child,
}

impl ProcessHandle {
    fn new(child: Child) -> Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| anyhow!("backend process exited before a PID could be read"))?;
        Ok(Self { pid, child })
    }

    /// Check whether the process is still running.
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(_) => false,
        }
    }
}

/// Supervisor for the single local backend process.
#[derive(Debug)]
pub struct Supervisor {
    server: ServerConfig,
    handle: Option<ProcessHandle>,
}

impl Supervisor {
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            handle: None,
        }
    }

    /// Base URL the spawned backend declares it will listen on.
    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid)
    }

    pub fn is_running(&mut self) -> bool {
        self.handle.as_mut().is_some_and(|h| h.is_running())
    }

    /// Launch the backend with `--db-uri <descriptor>`.
    ///
    /// If a process is already live it is stopped and reaped first;
    /// the replacement is only spawned once the old one is gone.
    pub async fn start(&mut self, db_uri: &str) -> Result<()> {
        if self.handle.is_some() {
            info!("stopping previous backend before starting a new one");
            self.stop(self.server.grace_period()).await?;
        }

        info!(
            "spawning backend: {} {:?} --db-uri {}",
            self.server.program, self.server.args, db_uri
        );

        let mut child = Command::new(&self.server.program)
            .args(&self.server.args)
            .arg("--db-uri")
            .arg(db_uri)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning backend process {}", self.server.program))?;

        // Drain both streams into the log; never block on them.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("backend stdout: {line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("backend stderr: {line}");
                }
            });
        }

        let handle = ProcessHandle::new(child)?;
        info!(
            "backend started with PID {} on {}",
            handle.pid,
            self.base_url()
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Terminate the backend: graceful request first, forceful kill if
    /// it has not exited within `grace`. Safe to call when no process
    /// is live or the process already exited.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        if !handle.is_running() {
            debug!("backend PID {} already exited", handle.pid);
            return Ok(());
        }

        info!("stopping backend PID {} (grace {:?})", handle.pid, grace);

        #[cfg(unix)]
        unsafe {
            libc::kill(handle.pid as i32, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = handle.child.start_kill();
        }

        match tokio::time::timeout(grace, handle.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("backend PID {} exited: {status}", handle.pid);
                Ok(())
            }
            Ok(Err(err)) => {
                warn!("error waiting for backend PID {}: {err}", handle.pid);
                Ok(())
            }
            Err(_) => {
                warn!(
                    "backend PID {} did not exit within {:?}, killing",
                    handle.pid, grace
                );
                handle
                    .child
                    .kill()
                    .await
                    .context("force-killing backend process")?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A config whose "backend" just sleeps; the appended `--db-uri`
    /// pair lands in the shell's positional parameters and is ignored.
    fn sleeping_server() -> ServerConfig {
        ServerConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "exec sleep 30".to_string(), "backend".to_string()],
            port: 59_990,
            grace_period_secs: 2,
        }
    }

    fn pid_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn start_and_stop() {
        let mut supervisor = Supervisor::new(sleeping_server());
        supervisor.start("sqlite:///tmp/test.db").await.unwrap();
        assert!(supervisor.is_running());
        let pid = supervisor.pid().unwrap();

        supervisor.stop(Duration::from_secs(2)).await.unwrap();
        assert!(!supervisor.is_running());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let mut supervisor = Supervisor::new(sleeping_server());
        supervisor.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_after_process_exited_is_noop() {
        let mut supervisor = Supervisor::new(ServerConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 0".to_string(), "backend".to_string()],
            ..sleeping_server()
        });
        supervisor.start("sqlite:///tmp/test.db").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!supervisor.is_running());
        supervisor.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn restart_terminates_previous_process_first() {
        let mut supervisor = Supervisor::new(sleeping_server());
        supervisor.start("sqlite:///tmp/test.db").await.unwrap();
        let first_pid = supervisor.pid().unwrap();

        supervisor.start("sqlite:///tmp/test.db").await.unwrap();
        let second_pid = supervisor.pid().unwrap();
        assert_ne!(first_pid, second_pid);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pid_alive(first_pid));
        assert!(supervisor.is_running());

        supervisor.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_escalates_when_sigterm_is_ignored() {
        let mut supervisor = Supervisor::new(ServerConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "trap '' TERM; sleep 30".to_string(),
                "backend".to_string(),
            ],
            ..sleeping_server()
        });
        supervisor.start("sqlite:///tmp/test.db").await.unwrap();
        let pid = supervisor.pid().unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = std::time::Instant::now();
        supervisor.stop(Duration::from_millis(300)).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pid_alive(pid));
    }
}
