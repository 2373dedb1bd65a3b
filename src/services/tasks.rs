use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use crate::core::io::Storage;
use crate::utils::process::{is_process_alive, terminate_process};

/// Long-running operations of the pipeline. Declaration order is the
/// priority used when more than one reports running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    Install,
    Configure,
    SelectInputFile,
    GenerateScript,
    ParseVoices,
    ConfigureVoice,
    GenerateAudiobook,
    Reset,
    Update,
}

impl TaskName {
    pub const ALL: [TaskName; 9] = [
        TaskName::Install,
        TaskName::Configure,
        TaskName::SelectInputFile,
        TaskName::GenerateScript,
        TaskName::ParseVoices,
        TaskName::ConfigureVoice,
        TaskName::GenerateAudiobook,
        TaskName::Reset,
        TaskName::Update,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::Install => "install",
            TaskName::Configure => "configure",
            TaskName::SelectInputFile => "select_input_file",
            TaskName::GenerateScript => "generate_script",
            TaskName::ParseVoices => "parse_voices",
            TaskName::ConfigureVoice => "configure_voice",
            TaskName::GenerateAudiobook => "generate_audiobook",
            TaskName::Reset => "reset",
            TaskName::Update => "update",
        }
    }

    /// Label shown while the task runs.
    pub fn progress_label(&self) -> &'static str {
        match self {
            TaskName::Install => "Installing",
            TaskName::Configure => "Configuring",
            TaskName::SelectInputFile => "Selecting File",
            TaskName::GenerateScript => "Generating Script",
            TaskName::ParseVoices => "Parsing Voices",
            TaskName::ConfigureVoice => "Configuring Voice",
            TaskName::GenerateAudiobook => "Generating Audiobook",
            TaskName::Reset => "Resetting",
            TaskName::Update => "Updating",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            TaskName::Install => "fa-solid fa-plug",
            TaskName::Configure => "fa-solid fa-wrench",
            TaskName::SelectInputFile => "fa-solid fa-file",
            TaskName::GenerateScript => "fa-solid fa-scroll",
            TaskName::ParseVoices => "fa-solid fa-users",
            TaskName::ConfigureVoice => "fa-solid fa-microphone",
            TaskName::GenerateAudiobook => "fa-solid fa-headphones",
            TaskName::Reset => "fa-solid fa-rotate-left",
            TaskName::Update => "fa-solid fa-arrows-rotate",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        TaskName::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .with_context(|| format!("Unknown task: {}", s))
    }
}

/// Running flags of every task, read once per inference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStates {
    running: BTreeSet<TaskName>,
}

impl TaskStates {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn with_running(tasks: impl IntoIterator<Item = TaskName>) -> Self {
        Self {
            running: tasks.into_iter().collect(),
        }
    }

    pub fn is_running(&self, task: TaskName) -> bool {
        self.running.contains(&task)
    }

    pub fn running(&self) -> impl Iterator<Item = TaskName> + '_ {
        self.running.iter().copied()
    }

    /// The task that owns the pipeline right now. Only one should ever run;
    /// if several report running, the highest-priority one wins.
    pub fn active(&self) -> Option<TaskName> {
        let first = self.running.iter().next().copied();
        if self.running.len() > 1 {
            let names: Vec<&str> = self.running.iter().map(|t| t.as_str()).collect();
            warn!(
                "Conflicting task state: {} report running, treating {:?} as active",
                names.join(", "),
                first
            );
        }
        first
    }
}

#[async_trait]
pub trait TaskRegistry: Send + Sync {
    async fn is_running(&self, task: TaskName) -> bool;

    /// Records that `pid` is now running `task`.
    async fn begin(&self, task: TaskName, pid: u32) -> Result<()>;

    async fn finish(&self, task: TaskName) -> Result<()>;

    /// Stops the task if it is running. Stopping an idle task is a no-op.
    async fn stop(&self, task: TaskName) -> Result<()>;

    async fn snapshot(&self) -> TaskStates {
        let flags = join_all(TaskName::ALL.iter().map(|t| self.is_running(*t))).await;
        TaskStates::with_running(
            TaskName::ALL
                .iter()
                .zip(flags)
                .filter(|(_, running)| *running)
                .map(|(t, _)| *t),
        )
    }

    async fn stop_all_except(&self, keep: TaskName) -> Result<()> {
        for task in TaskName::ALL {
            if task != keep {
                self.stop(task).await?;
            }
        }
        Ok(())
    }
}

/// Registry backed by one pid file per running task, so any process sharing
/// the workspace sees the same state.
pub struct PidTaskRegistry {
    storage: Arc<dyn Storage>,
    run_folder: String,
}

impl PidTaskRegistry {
    pub fn new(storage: Arc<dyn Storage>, run_folder: impl Into<String>) -> Self {
        Self {
            storage,
            run_folder: run_folder.into(),
        }
    }

    fn pid_path(&self, task: TaskName) -> String {
        format!("{}/{}.pid", self.run_folder.trim_end_matches('/'), task)
    }

    async fn read_pid(&self, task: TaskName) -> Option<u32> {
        let path = self.pid_path(task);
        match self.storage.exists(&path).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!("Could not check {}: {}", path, e);
                return None;
            }
        }
        match self.storage.read_to_string(&path).await {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(pid) => Some(pid),
                Err(_) => {
                    warn!("Ignoring garbled pid file {}", path);
                    None
                }
            },
            // Removed between the existence check and the read.
            Err(e) => {
                debug!("Could not read {}: {}", path, e);
                None
            }
        }
    }
}

#[async_trait]
impl TaskRegistry for PidTaskRegistry {
    async fn is_running(&self, task: TaskName) -> bool {
        match self.read_pid(task).await {
            Some(pid) if is_process_alive(pid) => true,
            Some(pid) => {
                debug!("Stale pid file for {} (pid {} is gone)", task, pid);
                false
            }
            None => false,
        }
    }

    async fn begin(&self, task: TaskName, pid: u32) -> Result<()> {
        self.storage
            .write(&self.pid_path(task), pid.to_string().as_bytes())
            .await
            .with_context(|| format!("Failed to record {} as running", task))
    }

    async fn finish(&self, task: TaskName) -> Result<()> {
        self.storage.delete(&self.pid_path(task)).await
    }

    async fn stop(&self, task: TaskName) -> Result<()> {
        let Some(pid) = self.read_pid(task).await else {
            return Ok(());
        };
        if pid == std::process::id() {
            debug!("Not stopping {}: it runs in this process", task);
            return Ok(());
        }
        if is_process_alive(pid) {
            info!("Stopping {} (pid {})", task, pid);
            if !terminate_process(pid) {
                warn!("Failed to signal pid {} for {}", pid, task);
            }
        }
        self.finish(task).await
    }
}

/// In-process registry, used where no other process needs to observe tasks.
#[derive(Clone, Default)]
pub struct MemoryTaskRegistry {
    running: Arc<RwLock<BTreeSet<TaskName>>>,
}

impl MemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, task: TaskName, running: bool) {
        let mut guard = match self.running.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running {
            guard.insert(task);
        } else {
            guard.remove(&task);
        }
    }
}

#[async_trait]
impl TaskRegistry for MemoryTaskRegistry {
    async fn is_running(&self, task: TaskName) -> bool {
        match self.running.read() {
            Ok(g) => g.contains(&task),
            Err(poisoned) => poisoned.into_inner().contains(&task),
        }
    }

    async fn begin(&self, task: TaskName, _pid: u32) -> Result<()> {
        self.set_running(task, true);
        Ok(())
    }

    async fn finish(&self, task: TaskName) -> Result<()> {
        self.set_running(task, false);
        Ok(())
    }

    async fn stop(&self, task: TaskName) -> Result<()> {
        self.set_running(task, false);
        Ok(())
    }
}
