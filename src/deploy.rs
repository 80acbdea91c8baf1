use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{process::Command, sync::Semaphore, time::timeout};
use tracing::{debug, error, info};

use crate::{config::DeployConfig, errors::DeploymentError};

/// Something able to deploy a pull request and report where it can be reached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeploymentRunner: Send + Sync {
    /// Deploys pull request `pr_number` of repository `repo`, returning the deployment URL.
    async fn deploy(&self, repo: &str, pr_number: u64) -> Result<String, DeploymentError>;
}

/// Runs an external script for each deployment.
///
/// The script receives the repository name and the pull request number as its last two
/// arguments, and must print the deployment URL on stdout and exit with status 0. Anything else
/// is a failure, reported with the script's stderr.
pub struct ScriptRunner {
    script: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    slots: Semaphore,
}

impl ScriptRunner {
    pub fn new(config: &DeployConfig) -> Self {
        Self {
            script: config.script.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout(),
            slots: Semaphore::new(config.max_concurrent.max(1)),
        }
    }

    fn command(&self, repo: &str, pr_number: u64) -> Command {
        let mut command = Command::new(&self.script);
        command
            .args(&self.args)
            .arg(repo)
            .arg(pr_number.to_string())
            .stdin(Stdio::null())
            // the child is killed if the timeout drops the future
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        command
    }
}

#[async_trait]
impl DeploymentRunner for ScriptRunner {
    #[tracing::instrument(skip(self), fields(script = %self.script))]
    async fn deploy(&self, repo: &str, pr_number: u64) -> Result<String, DeploymentError> {
        let _slot = self
            .slots
            .acquire()
            .await
            .expect("deployment semaphore is never closed");
        debug!("starting deployment");

        let output = match timeout(self.timeout, self.command(repo, pr_number).output()).await {
            Ok(output) => output.map_err(|source| DeploymentError::Launch {
                script: self.script.clone(),
                source,
            })?,
            Err(_) => {
                error!("deployment timed out after {:?}", self.timeout);
                return Err(DeploymentError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("error deploying container: {}", stderr);
            return Err(DeploymentError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        info!("deployment script output: {}", stdout.trim_end());

        Ok(stdout.trim().to_string())
    }
}
