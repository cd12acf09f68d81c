use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use grid_store::{IacOperation, IacRun, IacRunStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use grid_domain::InstanceId;

use crate::error::DriverError;

/// Bounds a single `init`/`apply`/`destroy` invocation (spec.md §5: external
/// provisioning tool calls are bounded by a per-phase timeout of 10 minutes).
const PHASE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Invokes the external provisioning tool (`terraform`/`tofu`-compatible
/// CLI contract: `init`, `apply -auto-approve`, `destroy -auto-approve`,
/// `output -json`) against a per-instance workspace, capturing combined
/// stdout+stderr into an [`IacRun`].
pub struct IacRunner {
    pub binary: String,
    pub workspace_root: PathBuf,
}

impl IacRunner {
    pub fn new(binary: impl Into<String>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workspace_root: workspace_root.into(),
        }
    }

    pub fn workspace_dir(&self, instance_id: &InstanceId) -> PathBuf {
        self.workspace_root.join(instance_id.as_str())
    }

    /// Runs `init` then `apply -auto-approve`, returning an [`IacRun`]
    /// regardless of outcome (failures are recorded in the run, not just
    /// returned as an error) and the combined run plus parsed outputs on
    /// success.
    pub async fn apply(
        &self,
        instance_id: &InstanceId,
        env: &HashMap<String, String>,
    ) -> (IacRun, Result<String, DriverError>) {
        let workspace = self.workspace_dir(instance_id);
        let mut log = String::new();

        let init = self.run_phase("init", &workspace, &["init", "-input=false"], env).await;
        let (init_exit, init_log) = match init {
            Ok(out) => out,
            Err(e) => return self.finish(instance_id, IacOperation::Provision, log, Err(e)),
        };
        log.push_str("=== init ===\n");
        log.push_str(&init_log);
        if init_exit != 0 {
            let err = DriverError::Provisioning {
                phase: "init".into(),
                stderr: init_log,
                cause: format!("exited with code {init_exit}"),
            };
            return self.finish(instance_id, IacOperation::Provision, log, Err(err));
        }

        let apply = self
            .run_phase("apply", &workspace, &["apply", "-auto-approve", "-input=false"], env)
            .await;
        let (apply_exit, apply_log) = match apply {
            Ok(out) => out,
            Err(e) => return self.finish(instance_id, IacOperation::Provision, log, Err(e)),
        };
        log.push_str("\n=== apply ===\n");
        log.push_str(&apply_log);
        if apply_exit != 0 {
            let err = DriverError::Provisioning {
                phase: "apply".into(),
                stderr: apply_log,
                cause: format!("exited with code {apply_exit}"),
            };
            return self.finish(instance_id, IacOperation::Provision, log, Err(err));
        }

        let outputs = self.run_phase("output", &workspace, &["output", "-json"], env).await;
        match outputs {
            Ok((0, raw)) => self.finish(instance_id, IacOperation::Provision, log, Ok(raw)),
            Ok((code, raw)) => {
                let err = DriverError::Provisioning {
                    phase: "output".into(),
                    stderr: raw,
                    cause: format!("exited with code {code}"),
                };
                self.finish(instance_id, IacOperation::Provision, log, Err(err))
            }
            Err(e) => self.finish(instance_id, IacOperation::Provision, log, Err(e)),
        }
    }

    /// Runs `destroy -auto-approve`. A missing workspace is treated as
    /// already torn down.
    pub async fn destroy(
        &self,
        instance_id: &InstanceId,
        env: &HashMap<String, String>,
    ) -> (IacRun, Result<(), DriverError>) {
        let workspace = self.workspace_dir(instance_id);
        if !workspace.exists() {
            debug!(%instance_id, "no workspace found; nothing to destroy");
            let (run, _) = self.finish(instance_id, IacOperation::Teardown, String::new(), Ok(String::new()));
            return (run, Ok(()));
        }

        let destroy = self
            .run_phase("destroy", &workspace, &["destroy", "-auto-approve", "-input=false"], env)
            .await;
        match destroy {
            Ok((0, out)) => {
                let (run, _) = self.finish(instance_id, IacOperation::Teardown, out, Ok(String::new()));
                (run, Ok(()))
            }
            Ok((code, out)) => {
                let err = DriverError::Provisioning {
                    phase: "destroy".into(),
                    stderr: out.clone(),
                    cause: format!("exited with code {code}"),
                };
                let (run, result) = self.finish(instance_id, IacOperation::Teardown, out, Err(err));
                (run, result.map(|_| ()))
            }
            Err(e) => {
                let (run, result) = self.finish(instance_id, IacOperation::Teardown, String::new(), Err(e));
                (run, result.map(|_| ()))
            }
        }
    }

    fn finish(
        &self,
        instance_id: &InstanceId,
        operation: IacOperation,
        log: String,
        result: Result<String, DriverError>,
    ) -> (IacRun, Result<String, DriverError>) {
        let (status, exit_code) = match &result {
            Ok(_) => (IacRunStatus::Succeeded, Some(0)),
            Err(_) => (IacRunStatus::Failed, None),
        };
        let run = IacRun {
            id: Uuid::new_v4(),
            instance_id: instance_id.clone(),
            operation,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            status,
            exit_code,
            log,
        };
        (run, result)
    }

    /// Spawns `binary args...` in `workspace`, merging stdout+stderr into a
    /// single log as lines arrive, bounded by [`PHASE_TIMEOUT`].
    async fn run_phase(
        &self,
        phase: &str,
        workspace: &Path,
        args: &[&str],
        env: &HashMap<String, String>,
    ) -> Result<(i32, String), DriverError> {
        info!(binary = %self.binary, ?args, workspace = %workspace.display(), "running IaC command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(workspace)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .envs(env);

        let mut child = cmd
            .spawn()
            .map_err(|e| DriverError::Internal(format!("spawn {}: {}", self.binary, e)))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let mut log = String::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let tx1 = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx1.send(line);
            }
        });

        let tx2 = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx2.send(line);
            }
        });
        drop(tx);

        let collect = async {
            while let Some(line) = rx.recv().await {
                debug!(target: "grid::iac", "{}", line);
                log.push_str(&line);
                log.push('\n');
            }
        };
        let timed_out = tokio::time::timeout(PHASE_TIMEOUT, collect).await.is_err();

        stdout_task.await.ok();
        stderr_task.await.ok();

        if timed_out {
            let _ = child.kill().await;
            return Err(DriverError::Timeout {
                phase: phase.to_string(),
                timeout: PHASE_TIMEOUT,
            });
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DriverError::Internal(format!("wait {}: {}", self.binary, e)))?;
        let code = status.code().unwrap_or(-1);
        if code != 0 {
            warn!(binary = %self.binary, phase, code, "IaC command exited non-zero");
        }
        Ok((code, log))
    }
}
