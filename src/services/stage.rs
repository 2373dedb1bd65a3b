//! Works out where the pipeline stands from what is on disk and what is running.
//!
//! Nothing here stores a "current stage". Every call rebuilds it from a fresh
//! [`ArtifactSnapshot`] and [`TaskStates`], so a pipeline interrupted at any
//! point resumes from whatever its files say.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::services::artifacts::ArtifactSnapshot;
use crate::services::tasks::{TaskName, TaskStates};

pub const PARAM_INPUT_FILE_PATH: &str = "input_file_path";
pub const PARAM_SPEAKER: &str = "speaker";

const ICON_INSTALL: &str = "fa-solid fa-plug";
const ICON_CONFIGURE: &str = "fa-solid fa-wrench";
const ICON_SELECT_FILE: &str = "fa-solid fa-file-import";
const ICON_SCRIPT: &str = "fa-solid fa-scroll";
const ICON_VOICES: &str = "fa-solid fa-users";
const ICON_MICROPHONE: &str = "fa-solid fa-microphone";
const ICON_AUDIOBOOK: &str = "fa-solid fa-headphones";
const ICON_RESET: &str = "fa-solid fa-rotate-left";
const ICON_PLAY: &str = "fa-solid fa-play";
const ICON_FOLDER: &str = "fa-solid fa-folder-open";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenTarget {
    Audiobook,
    OutputFolder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActionTarget {
    /// Start the task.
    Task(TaskName),
    /// Follow a task that is already running.
    Attach(TaskName),
    Open(OpenTarget),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub target: ActionTarget,
    pub label: String,
    pub icon: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

impl Action {
    fn new(target: ActionTarget, label: impl Into<String>, icon: &'static str) -> Self {
        Self {
            target,
            label: label.into(),
            icon,
            params: BTreeMap::new(),
            default: false,
        }
    }

    fn task(task: TaskName, label: impl Into<String>, icon: &'static str) -> Self {
        Self::new(ActionTarget::Task(task), label, icon)
    }

    fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "detail", rename_all = "snake_case")]
pub enum Stage {
    Running(TaskName),
    NotInstalled,
    NotConfigured,
    NoInputFile,
    NoScript,
    NoVoicesParsed,
    VoicesIncomplete(Vec<String>),
    ReadyToGenerate,
    Complete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Running(task) => write!(f, "{}...", task.progress_label()),
            Stage::NotInstalled => f.write_str("Not installed"),
            Stage::NotConfigured => f.write_str("Not configured"),
            Stage::NoInputFile => f.write_str("No input file selected"),
            Stage::NoScript => f.write_str("Script not generated"),
            Stage::NoVoicesParsed => f.write_str("Voices not parsed"),
            Stage::VoicesIncomplete(speakers) => write!(
                f,
                "{} voice(s) need configuration: {}",
                speakers.len(),
                speakers.join(", ")
            ),
            Stage::ReadyToGenerate => f.write_str("Ready to generate the audiobook"),
            Stage::Complete => f.write_str("Audiobook complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub actions: Vec<Action>,
}

impl StageResult {
    pub fn default_action(&self) -> Option<&Action> {
        self.actions.iter().find(|a| a.default)
    }
}

/// Resolves the current stage. The checks run in pipeline order and the
/// first one that matches decides; a later step is never offered before the
/// artifacts of every earlier step are in place.
pub fn infer_stage(
    artifacts: &ArtifactSnapshot,
    tasks: &TaskStates,
    unconfigured_voices: &[String],
) -> StageResult {
    let reinstall = || Action::task(TaskName::Install, "Reinstall", ICON_INSTALL);
    let reset = || Action::task(TaskName::Reset, "Reset", ICON_RESET);
    let reconfigure = || Action::task(TaskName::Configure, "Reconfigure", ICON_CONFIGURE);

    if let Some(task) = tasks.active() {
        return StageResult {
            stage: Stage::Running(task),
            actions: vec![
                Action::new(ActionTarget::Attach(task), task.progress_label(), task.icon())
                    .as_default(),
            ],
        };
    }

    if !artifacts.installed {
        return StageResult {
            stage: Stage::NotInstalled,
            actions: vec![Action::task(TaskName::Install, "Install", ICON_INSTALL).as_default()],
        };
    }

    if !artifacts.configured {
        return StageResult {
            stage: Stage::NotConfigured,
            actions: vec![
                Action::task(TaskName::Configure, "Configure Alexandria", ICON_CONFIGURE),
                reinstall(),
                reset(),
            ],
        };
    }

    let Some(input_file_path) = artifacts.input_file_path.as_deref() else {
        return StageResult {
            stage: Stage::NoInputFile,
            actions: vec![
                Action::task(TaskName::SelectInputFile, "Select Input File", ICON_SELECT_FILE),
                reconfigure(),
                reinstall(),
                reset(),
            ],
        };
    };
    let generate_script = |label: &str| {
        Action::task(TaskName::GenerateScript, label, ICON_SCRIPT)
            .with_param(PARAM_INPUT_FILE_PATH, input_file_path)
    };

    if !artifacts.script_exists {
        return StageResult {
            stage: Stage::NoScript,
            actions: vec![
                generate_script("Generate Script"),
                Action::task(TaskName::SelectInputFile, "Change Input File", ICON_SELECT_FILE),
                reconfigure(),
                reinstall(),
                reset(),
            ],
        };
    }

    if !artifacts.voices_exists {
        return StageResult {
            stage: Stage::NoVoicesParsed,
            actions: vec![
                Action::task(TaskName::ParseVoices, "Parse Voices", ICON_VOICES),
                generate_script("Regenerate Script"),
                reinstall(),
                reset(),
            ],
        };
    }

    if !unconfigured_voices.is_empty() {
        let mut actions: Vec<Action> = unconfigured_voices
            .iter()
            .map(|speaker| {
                Action::task(
                    TaskName::ConfigureVoice,
                    format!("Configure: {}", speaker),
                    ICON_MICROPHONE,
                )
                .with_param(PARAM_SPEAKER, speaker.as_str())
            })
            .collect();
        actions.push(Action::task(TaskName::ParseVoices, "Re-parse Voices", ICON_VOICES));
        actions.push(reinstall());
        actions.push(reset());
        return StageResult {
            stage: Stage::VoicesIncomplete(unconfigured_voices.to_vec()),
            actions,
        };
    }

    if !artifacts.audiobook_exists {
        return StageResult {
            stage: Stage::ReadyToGenerate,
            actions: vec![
                Action::task(TaskName::GenerateAudiobook, "Generate Audiobook", ICON_AUDIOBOOK),
                Action::task(TaskName::ConfigureVoice, "Reconfigure Voices", ICON_MICROPHONE),
                reinstall(),
                reset(),
            ],
        };
    }

    StageResult {
        stage: Stage::Complete,
        actions: vec![
            Action::new(
                ActionTarget::Open(OpenTarget::Audiobook),
                "Open Audiobook",
                ICON_PLAY,
            )
            .as_default(),
            Action::new(
                ActionTarget::Open(OpenTarget::OutputFolder),
                "Open Output Folder",
                ICON_FOLDER,
            ),
            Action::task(TaskName::GenerateAudiobook, "Regenerate Audiobook", ICON_AUDIOBOOK),
            Action::task(TaskName::SelectInputFile, "New Book", ICON_SELECT_FILE),
            reinstall(),
            reset(),
        ],
    }
}
