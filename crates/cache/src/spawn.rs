//! Child process spawn protocol and shutdown (spec.md §4.3).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub binary: PathBuf,
    pub model_path: String,
    pub projector_path: Option<String>,
    pub host: String,
    pub port: u16,
    pub context_size: u32,
    pub num_threads: u32,
    pub num_gpu_layers: u32,
}

impl SpawnSpec {
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            self.model_path.clone(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--ctx-size".to_string(),
            self.context_size.to_string(),
            "--threads".to_string(),
            self.num_threads.to_string(),
            "--n-gpu-layers".to_string(),
            self.num_gpu_layers.to_string(),
        ];
        if let Some(projector) = &self.projector_path {
            args.push("--mmproj".to_string());
            args.push(projector.clone());
        }
        args
    }
}

pub struct SpawnedChild {
    pub child: Child,
    pub pid: u32,
}

/// Starts the child with the spawn arguments from spec.md §4.3: model path,
/// host, port, context size, threads, GPU layers, optional projector.
pub fn spawn_child(spec: &SpawnSpec) -> Result<SpawnedChild> {
    let mut command = Command::new(&spec.binary);
    command.args(spec.args());
    command.kill_on_drop(true);
    let child = command.spawn()?;
    let pid = child.id().ok_or_else(|| CacheError::ChildCrashed("child exited immediately".into()))?;
    debug!(pid, port = spec.port, "spawned child process");
    Ok(SpawnedChild { child, pid })
}

/// Polls `/health` with bounded exponential backoff until the child reports
/// ready or `deadline` elapses, then returns `load_timeout`.
pub async fn wait_for_health(
    http: &reqwest::Client,
    port: u16,
    initial_backoff: Duration,
    max_backoff: Duration,
    deadline: Duration,
) -> Result<()> {
    let start = Instant::now();
    let mut backoff = initial_backoff;
    let url = format!("http://127.0.0.1:{port}/health");
    loop {
        if start.elapsed() >= deadline {
            return Err(CacheError::LoadTimeout);
        }
        match http.get(&url).timeout(Duration::from_secs(2)).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => debug!(status = %resp.status(), "child not ready yet"),
            Err(e) => debug!(error = %e, "child health probe failed"),
        }
        let remaining = deadline.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(CacheError::LoadTimeout);
        }
        tokio::time::sleep(backoff.min(remaining)).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

/// Stops a child gracefully: `SIGTERM`, wait up to `grace`, then `SIGKILL`.
pub async fn stop_child(child: &mut Child, pid: u32, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %e, "failed to send SIGTERM, falling back to kill");
        }
    }
    let waited = tokio::time::timeout(grace, child.wait()).await;
    if waited.is_err() {
        warn!(pid, "child did not exit within grace period, sending SIGKILL");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_include_projector_when_present() {
        let spec = SpawnSpec {
            binary: PathBuf::from("/usr/bin/echo"),
            model_path: "/models/m1.gguf".into(),
            projector_path: Some("/models/m1.mmproj.gguf".into()),
            host: "127.0.0.1".into(),
            port: 50000,
            context_size: 4096,
            num_threads: 4,
            num_gpu_layers: 0,
        };
        let args = spec.args();
        assert!(args.contains(&"--mmproj".to_string()));
        assert!(args.contains(&"/models/m1.mmproj.gguf".to_string()));
    }

    #[test]
    fn args_omit_projector_when_absent() {
        let spec = SpawnSpec {
            binary: PathBuf::from("/usr/bin/echo"),
            model_path: "/models/m1.gguf".into(),
            projector_path: None,
            host: "127.0.0.1".into(),
            port: 50000,
            context_size: 4096,
            num_threads: 4,
            num_gpu_layers: 0,
        };
        assert!(!spec.args().contains(&"--mmproj".to_string()));
    }
}
