//! Shell command execution as a given user

use crate::error::{Result, TuneError};
use async_trait::async_trait;
use tokio::process::Command;

/// Runs shell commands on behalf of the scheduler client
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `cmd` through `sh -c` as `user`, returning stdout
    async fn exec_as(&self, user: &str, cmd: &str) -> Result<String>;
}

/// Executor backed by local processes
///
/// Commands for the current user run directly; anything else goes through
/// non-interactive `sudo`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    current_user: Option<String>,
}

impl ShellExecutor {
    /// Create an executor, detecting the current user from the environment
    pub fn new() -> Self {
        Self {
            current_user: std::env::var("USER").ok(),
        }
    }

    fn command_for(&self, user: &str, cmd: &str) -> Command {
        if self.current_user.as_deref() == Some(user) {
            let mut command = Command::new("sh");
            command.arg("-c").arg(cmd);
            command
        } else {
            let mut command = Command::new("sudo");
            command.args(["-n", "-u", user, "sh", "-c", cmd]);
            command
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn exec_as(&self, user: &str, cmd: &str) -> Result<String> {
        tracing::debug!(user, cmd, "executing");

        let output = self
            .command_for(user, cmd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TuneError::Unavailable(format!("failed to spawn shell: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TuneError::Unavailable(format!(
                "command exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}
