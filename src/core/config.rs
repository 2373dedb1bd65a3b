use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::tasks::TaskName;

pub const DEFAULT_CONFIG_FILE: &str = "alexandria.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_workspace")]
    pub workspace: String,

    #[serde(default)]
    pub artifacts: ArtifactPaths,

    #[serde(default = "default_run_folder")]
    pub run_folder: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub tasks: TaskCommands,

    #[serde(default = "default_preset_voices")]
    pub preset_voices: Vec<String>,
}

/// Locations of every artifact, relative to the workspace.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ArtifactPaths {
    #[serde(default = "default_install_marker")]
    pub install_marker: String,
    #[serde(default = "default_settings")]
    pub settings: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_script")]
    pub script: String,
    #[serde(default = "default_voices")]
    pub voices: String,
    #[serde(default = "default_voice_config")]
    pub voice_config: String,
    #[serde(default = "default_audiobook")]
    pub audiobook: String,
    #[serde(default = "default_output_folder")]
    pub output_folder: String,
    #[serde(default = "default_voicelines")]
    pub voicelines: String,
    #[serde(default = "default_books_folder")]
    pub books_folder: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskCommands {
    #[serde(default = "default_install_command")]
    pub install: Option<TaskCommand>,
    #[serde(default = "default_generate_script_command")]
    pub generate_script: Option<TaskCommand>,
    // None selects the built-in parser.
    #[serde(default)]
    pub parse_voices: Option<TaskCommand>,
    #[serde(default = "default_generate_audiobook_command")]
    pub generate_audiobook: Option<TaskCommand>,
    #[serde(default = "default_update_command")]
    pub update: Option<TaskCommand>,
}

impl TaskCommands {
    pub fn get(&self, task: TaskName) -> Option<&TaskCommand> {
        match task {
            TaskName::Install => self.install.as_ref(),
            TaskName::GenerateScript => self.generate_script.as_ref(),
            TaskName::ParseVoices => self.parse_voices.as_ref(),
            TaskName::GenerateAudiobook => self.generate_audiobook.as_ref(),
            TaskName::Update => self.update.as_ref(),
            TaskName::Configure
            | TaskName::SelectInputFile
            | TaskName::ConfigureVoice
            | TaskName::Reset => None,
        }
    }
}

fn default_workspace() -> String {
    ".".to_string()
}
fn default_run_folder() -> String {
    ".alexandria/run".to_string()
}
fn default_poll_interval() -> u64 {
    500
}
fn default_preset_voices() -> Vec<String> {
    [
        "Vivian", "Serena", "Uncle_Fu", "Dylan", "Eric", "Ryan", "Aiden", "Ono_Anna", "Sohee",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_install_marker() -> String {
    "app/env".to_string()
}
fn default_settings() -> String {
    "app/config.json".to_string()
}
fn default_state() -> String {
    "state.json".to_string()
}
fn default_script() -> String {
    "annotated_script.json".to_string()
}
fn default_voices() -> String {
    "voices.json".to_string()
}
fn default_voice_config() -> String {
    "voice_config.json".to_string()
}
fn default_audiobook() -> String {
    "cloned_audiobook.mp3".to_string()
}
fn default_output_folder() -> String {
    "app/output_audio_cloned".to_string()
}
fn default_voicelines() -> String {
    "voicelines".to_string()
}
fn default_books_folder() -> String {
    "input".to_string()
}

fn python_command(script: &str, extra: &[&str]) -> Option<TaskCommand> {
    let mut args = vec![script.to_string()];
    args.extend(extra.iter().map(|s| s.to_string()));
    Some(TaskCommand {
        program: "env/bin/python".to_string(),
        args,
        cwd: Some("app".to_string()),
    })
}

fn default_install_command() -> Option<TaskCommand> {
    Some(TaskCommand {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            "python3 -m venv env && env/bin/pip install -r requirements.txt".to_string(),
        ],
        cwd: Some("app".to_string()),
    })
}
fn default_generate_script_command() -> Option<TaskCommand> {
    python_command("generate_script.py", &["{input_file_path}"])
}
fn default_generate_audiobook_command() -> Option<TaskCommand> {
    python_command("generate_audiobook.py", &[])
}
fn default_update_command() -> Option<TaskCommand> {
    Some(TaskCommand {
        program: "git".to_string(),
        args: vec!["pull".to_string()],
        cwd: None,
    })
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            install_marker: default_install_marker(),
            settings: default_settings(),
            state: default_state(),
            script: default_script(),
            voices: default_voices(),
            voice_config: default_voice_config(),
            audiobook: default_audiobook(),
            output_folder: default_output_folder(),
            voicelines: default_voicelines(),
            books_folder: default_books_folder(),
        }
    }
}

impl Default for TaskCommands {
    fn default() -> Self {
        Self {
            install: default_install_command(),
            generate_script: default_generate_script_command(),
            parse_voices: None,
            generate_audiobook: default_generate_audiobook_command(),
            update: default_update_command(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            artifacts: ArtifactPaths::default(),
            run_folder: default_run_folder(),
            poll_interval_ms: default_poll_interval(),
            tasks: TaskCommands::default(),
            preset_voices: default_preset_voices(),
        }
    }
}

impl Config {
    /// Loads the configuration, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{:?} not found, using default configuration", path);
            return Ok(Self::default());
        }

        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    pub fn workspace_path(&self, relative: &str) -> PathBuf {
        Path::new(&self.workspace).join(relative)
    }
}
