use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::core::config::{TaskCommand, TaskCommands};
use crate::services::tasks::{TaskName, TaskRegistry};

/// Starts tasks and keeps the task registry in step with them. A task only
/// starts when no other task is running; reset is the exception, since it
/// stops the others itself.
pub struct Launcher {
    workspace: PathBuf,
    commands: TaskCommands,
    tasks: Arc<dyn TaskRegistry>,
}

impl Launcher {
    pub fn new(
        workspace: impl Into<PathBuf>,
        commands: TaskCommands,
        tasks: Arc<dyn TaskRegistry>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            commands,
            tasks,
        }
    }

    pub fn has_command(&self, task: TaskName) -> bool {
        self.commands.get(task).is_some()
    }

    /// Fails if some task already holds the pipeline.
    async fn ensure_idle(&self, task: TaskName) -> Result<()> {
        if task == TaskName::Reset {
            return Ok(());
        }
        if let Some(active) = self.tasks.snapshot().await.active() {
            bail!("Cannot start {}: {} is still running", task, active);
        }
        Ok(())
    }

    /// Runs the task's configured command and waits for it to exit.
    pub async fn run_external(
        &self,
        task: TaskName,
        params: &BTreeMap<String, String>,
    ) -> Result<()> {
        let command = self
            .commands
            .get(task)
            .ok_or_else(|| anyhow!("No command configured for task '{}'", task))?;

        let dir = match &command.cwd {
            Some(cwd) => self.workspace.join(cwd),
            None => self.workspace.clone(),
        };
        self.ensure_idle(task).await?;

        let args = substitute_params(command, params);
        info!("Starting {}: {} {}", task, command.program, args.join(" "));

        let mut child = Command::new(&command.program)
            .args(&args)
            .current_dir(&dir)
            .env("PYTHONUNBUFFERED", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {} ({})", task, command.program))?;

        let pid = child.id().unwrap_or(0);
        self.tasks.begin(task, pid).await?;

        let pb = spinner(task.progress_label())?;

        let stdout_pump = child.stdout.take().map(|stdout| {
            let pb = pb.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    pb.println(line);
                }
            })
        });
        let stderr_pump = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    warn!("[{}] {}", task, line);
                }
            })
        });

        let status = child.wait().await;
        for pump in [stdout_pump, stderr_pump].into_iter().flatten() {
            let _ = pump.await;
        }
        self.tasks.finish(task).await?;

        let status = status.with_context(|| format!("Failed to wait for {}", task))?;
        if !status.success() {
            pb.abandon_with_message(format!("{} failed ({})", task.progress_label(), status));
            bail!("Task '{}' exited with {}", task, status);
        }
        pb.finish_with_message(format!("{} done", task.progress_label()));
        Ok(())
    }

    /// Runs an in-process step while the registry shows this process as the
    /// task's runner. The record is cleared whether or not the step succeeds.
    pub async fn run_inline<T, F>(&self, task: TaskName, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_idle(task).await?;
        self.tasks.begin(task, std::process::id()).await?;
        let result = step.await;
        if let Err(e) = self.tasks.finish(task).await {
            warn!("Failed to clear running state of {}: {:#}", task, e);
        }
        result
    }

    /// Blocks until `task` is no longer reported as running.
    pub async fn attach(&self, task: TaskName, poll_interval: Duration) -> Result<()> {
        let pb = spinner(task.progress_label())?;
        while self.tasks.is_running(task).await {
            tokio::time::sleep(poll_interval).await;
        }
        pb.finish_with_message(format!("{} finished", task.progress_label()));
        Ok(())
    }
}

fn spinner(label: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(label);
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

/// Replaces `{name}` placeholders in the command's arguments.
pub fn substitute_params(command: &TaskCommand, params: &BTreeMap<String, String>) -> Vec<String> {
    command
        .args
        .iter()
        .map(|arg| {
            params.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}
