use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::SpawnConfig;
use crate::session::StreamRequest;

/// Starts session processes.
#[async_trait::async_trait]
pub trait SessionSpawner: Send + Sync {
    async fn spawn(&self, request: &StreamRequest) -> Result<()>;
}

/// Runs each session as a child process of the `stream` subcommand.
pub struct ProcessSpawner {
    program: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, config_path: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path,
        }
    }

    /// Use the configured program, or this executable.
    pub fn from_config(config: &SpawnConfig) -> Result<Self> {
        let program = match &config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe().context("Failed to locate current executable")?,
        };
        Ok(Self::new(program, config.config_path.clone()))
    }

    pub fn args(&self, request: &StreamRequest) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args.extend(request.to_args());
        args
    }
}

#[async_trait::async_trait]
impl SessionSpawner for ProcessSpawner {
    async fn spawn(&self, request: &StreamRequest) -> Result<()> {
        let args = self.args(request);
        info!("Spawning session {}: {} {}", request.session_id, self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        let session_id = request.session_id;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!("Session {} exited", session_id),
                Ok(status) => warn!("Session {} exited with {}", session_id, status),
                Err(e) => warn!("Failed to wait for session {}: {}", session_id, e),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_put_config_first() {
        let spawner = ProcessSpawner::new("roundstream", Some(PathBuf::from("config/roundstream.toml")));
        let args = spawner.args(&StreamRequest::new(5, 2));
        assert_eq!(
            args,
            vec![
                "--config",
                "config/roundstream.toml",
                "stream",
                "--session-id",
                "5",
                "--project-id",
                "2"
            ]
        );
    }
}
