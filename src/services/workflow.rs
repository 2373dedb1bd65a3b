use anyhow::{bail, Context, Result};
use inquire::{InquireError, Select};
use log::{error, info};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::state::PipelineState;
use crate::services::artifacts::{Artifact, ArtifactStore};
use crate::services::launcher::Launcher;
use crate::services::script::extract_speakers;
use crate::services::setup;
use crate::services::stage::{
    infer_stage, Action, ActionTarget, OpenTarget, Stage, StageResult, PARAM_SPEAKER,
};
use crate::services::tasks::{TaskName, TaskRegistry};
use crate::services::voices::VoiceRegistry;
use crate::utils::epub::epub_to_text;

pub struct WorkflowManager {
    config: Config,
    artifacts: ArtifactStore,
    tasks: Arc<dyn TaskRegistry>,
    launcher: Launcher,
}

impl WorkflowManager {
    pub fn new(config: Config, storage: Arc<dyn Storage>, tasks: Arc<dyn TaskRegistry>) -> Self {
        let artifacts = ArtifactStore::new(storage, config.artifacts.clone());
        let launcher = Launcher::new(&config.workspace, config.tasks.clone(), tasks.clone());
        Self {
            config,
            artifacts,
            tasks,
            launcher,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub async fn voice_registry(&self) -> Result<VoiceRegistry> {
        VoiceRegistry::load(
            self.artifacts.storage().clone(),
            self.artifacts.path(Artifact::VoiceConfig),
        )
        .await
    }

    /// Takes a fresh look at the workspace and works out the stage.
    pub async fn observe(&self) -> Result<StageResult> {
        let (snapshot, catalog) = self.artifacts.snapshot_with_catalog().await;
        let states = self.tasks.snapshot().await;

        let unconfigured = match catalog {
            Some(catalog) => self.voice_registry().await?.list_unconfigured(&catalog),
            None => Vec::new(),
        };

        Ok(infer_stage(&snapshot, &states, &unconfigured))
    }

    pub async fn dispatch(&self, action: &Action) -> Result<()> {
        info!("Running action: {}", action.label);
        match action.target {
            ActionTarget::Task(task) => self.run_task(task, &action.params).await,
            ActionTarget::Attach(task) => {
                self.launcher
                    .attach(task, Duration::from_millis(self.config.poll_interval_ms))
                    .await
            }
            ActionTarget::Open(target) => self.open(target),
        }
    }

    /// Starts `task` the way its kind requires: in this process for the
    /// interactive steps, as a child process for the rest.
    pub async fn run_task(&self, task: TaskName, params: &BTreeMap<String, String>) -> Result<()> {
        match task {
            TaskName::Configure => self.launcher.run_inline(task, self.configure()).await,
            TaskName::SelectInputFile => {
                self.launcher.run_inline(task, self.select_input_file()).await
            }
            TaskName::ConfigureVoice => {
                let speaker = params.get(PARAM_SPEAKER).map(String::as_str);
                self.launcher
                    .run_inline(task, self.configure_voice(speaker))
                    .await
            }
            TaskName::ParseVoices if !self.launcher.has_command(task) => {
                self.launcher.run_inline(task, self.parse_voices()).await
            }
            TaskName::Reset => self.reset().await,
            _ => self.launcher.run_external(task, params).await,
        }
    }

    pub async fn configure(&self) -> Result<()> {
        let existing = self.artifacts.read_settings().await;
        let settings = setup::configure_pipeline(existing.as_ref())?;
        self.artifacts.write_json(Artifact::Settings, &settings).await?;
        info!("Settings saved to {}", self.artifacts.path(Artifact::Settings));
        Ok(())
    }

    pub async fn select_input_file(&self) -> Result<()> {
        let current = self.artifacts.read_input_file_path().await;
        let path = setup::prompt_input_file(current.as_deref())?;
        self.set_input_file(Path::new(&path)).await?;
        Ok(())
    }

    /// Makes `path` the book being converted. Epub books are first flattened
    /// into a text file under the books folder.
    pub async fn set_input_file(&self, path: &Path) -> Result<String> {
        let input = if setup::is_epub(path) {
            let text = epub_to_text(path).await?;
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("book");
            let relative = format!(
                "{}/{}.txt",
                self.config.artifacts.books_folder.trim_end_matches('/'),
                stem
            );
            self.artifacts
                .storage()
                .write(&relative, text.as_bytes())
                .await?;
            info!("Imported {} as {}", path.display(), relative);
            self.config.workspace_path(&relative)
        } else {
            path.to_path_buf()
        };

        let input = absolute(&input)?.to_string_lossy().to_string();
        self.artifacts
            .write_json(Artifact::State, &PipelineState::with_input(input.clone()))
            .await?;
        info!("Input file set to {}", input);
        Ok(input)
    }

    pub async fn configure_voice(&self, speaker: Option<&str>) -> Result<()> {
        let speaker = match speaker {
            Some(s) => s.to_string(),
            None => {
                let catalog = self.artifacts.read_voice_catalog().await.unwrap_or_default();
                setup::prompt_speaker(&catalog)?
            }
        };

        let mut registry = self.voice_registry().await?;
        if registry.is_malformed() {
            bail!(
                "{} is malformed; reset before configuring voices",
                self.artifacts.path(Artifact::VoiceConfig)
            );
        }
        let existing = registry.get(&speaker);
        let update = setup::prompt_voice(&speaker, &self.config.preset_voices, existing.as_ref())?;
        let entry = registry.upsert(&speaker, update).await?;
        println!("{}: {}", speaker, entry.summary());
        Ok(())
    }

    /// Writes the distinct speakers of the script as the voices catalog.
    pub async fn parse_voices(&self) -> Result<()> {
        let lines = self.artifacts.read_script().await?;
        let speakers = extract_speakers(&lines);
        if speakers.is_empty() {
            bail!(
                "No speakers found in {}",
                self.artifacts.path(Artifact::Script)
            );
        }
        self.artifacts.write_json(Artifact::Voices, &speakers).await?;
        info!("Found {} speakers: {}", speakers.len(), speakers.join(", "));
        Ok(())
    }

    /// Stops every other task and deletes everything the pipeline produced.
    /// The installation and imported books survive.
    pub async fn reset(&self) -> Result<()> {
        self.launcher
            .run_inline(TaskName::Reset, async {
                self.tasks.stop_all_except(TaskName::Reset).await?;
                for artifact in Artifact::DERIVED {
                    self.artifacts
                        .remove(artifact)
                        .await
                        .with_context(|| format!("Failed to remove {}", self.artifacts.path(artifact)))?;
                }
                self.voice_registry().await?.clear().await?;
                info!("Workspace reset");
                Ok(())
            })
            .await
    }

    pub async fn stop_all(&self) -> Result<()> {
        for task in TaskName::ALL {
            self.tasks.stop(task).await?;
        }
        Ok(())
    }

    fn open(&self, target: OpenTarget) -> Result<()> {
        let artifact = match target {
            OpenTarget::Audiobook => Artifact::Audiobook,
            OpenTarget::OutputFolder => Artifact::OutputFolder,
        };
        let path = self.config.workspace_path(self.artifacts.path(artifact));
        if !path.exists() {
            bail!("{} does not exist", path.display());
        }
        open::that(&path).with_context(|| format!("Failed to open {}", path.display()))
    }

    /// Interactive loop: show the stage, offer its actions, run the choice.
    pub async fn run(&self) -> Result<()> {
        let mut last_auto: Option<(Stage, ActionTarget)> = None;

        loop {
            let result = self.observe().await?;
            println!("\n== {} ==", result.stage);

            let auto = match (&result.stage, result.default_action()) {
                (Stage::Running(_) | Stage::NotInstalled, Some(action)) => {
                    let key = (result.stage.clone(), action.target);
                    (last_auto.as_ref() != Some(&key)).then(|| (key, action.clone()))
                }
                _ => None,
            };
            if let Some((key, action)) = auto {
                last_auto = Some(key);
                self.report(&action, self.dispatch(&action).await);
                continue;
            }
            last_auto = None;

            let mut choices: Vec<MenuChoice> =
                result.actions.iter().cloned().map(MenuChoice::Run).collect();
            let cursor = choices
                .iter()
                .position(|c| matches!(c, MenuChoice::Run(a) if a.default))
                .unwrap_or(0);
            choices.push(MenuChoice::Quit);

            let choice = match Select::new("What next?", choices)
                .with_starting_cursor(cursor)
                .prompt()
            {
                Ok(choice) => choice,
                Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => break,
                Err(e) => return Err(e.into()),
            };

            match choice {
                MenuChoice::Run(action) => self.report(&action, self.dispatch(&action).await),
                MenuChoice::Quit => break,
            }
        }
        Ok(())
    }

    fn report(&self, action: &Action, result: Result<()>) {
        match result {
            Ok(()) => {}
            Err(e) if is_cancelled(&e) => info!("{} cancelled", action.label),
            Err(e) => error!("{} failed: {:#}", action.label, e),
        }
    }
}

enum MenuChoice {
    Run(Action),
    Quit,
}

impl fmt::Display for MenuChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MenuChoice::Run(action) if action.default => write!(f, "{} (recommended)", action),
            MenuChoice::Run(action) => write!(f, "{}", action),
            MenuChoice::Quit => f.write_str("Quit"),
        }
    }
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<InquireError>(),
        Some(InquireError::OperationCanceled | InquireError::OperationInterrupted)
    )
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Failed to resolve {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::services::tasks::MemoryTaskRegistry;

    fn manager(root: &Path, registry: &MemoryTaskRegistry) -> WorkflowManager {
        let config = Config {
            workspace: root.to_string_lossy().to_string(),
            ..Config::default()
        };
        WorkflowManager::new(
            config,
            Arc::new(NativeStorage::new(root)),
            Arc::new(registry.clone()),
        )
    }

    /// Lays out a workspace that has reached the voice configuration step.
    fn seed_through_voices(root: &Path) -> Result<()> {
        std::fs::create_dir_all(root.join("app/env"))?;
        std::fs::write(
            root.join("app/config.json"),
            r#"{"llm": {"api_key": "k", "model_name": "gemini-2.0-flash"}, "tts": {"url": "http://127.0.0.1:7860"}}"#,
        )?;
        std::fs::write(root.join("state.json"), r#"{"input_file_path": "/books/tale.txt"}"#)?;
        std::fs::write(
            root.join("annotated_script.json"),
            r#"[{"speaker": "Alice", "text": "Hi."}, {"speaker": "Bob", "text": "Hello.", "style": "gruff"}]"#,
        )?;
        std::fs::write(root.join("voices.json"), r#"["Alice", "Bob"]"#)?;
        Ok(())
    }

    const ALICE_ONLY: &str =
        r#"{"Alice": {"type": "style_clone", "ref_audio": "/a.wav", "ref_text": "hello", "seed": 7}}"#;
    const ALICE_AND_BOB: &str = r#"{
        "Alice": {"type": "style_clone", "ref_audio": "/a.wav", "ref_text": "hello", "seed": 7},
        "Bob": {"type": "preset", "voice_name": "Ryan"}
    }"#;

    #[tokio::test]
    async fn test_fresh_workspace_needs_install() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let manager = manager(temp_dir.path(), &MemoryTaskRegistry::new());

        let result = manager.observe().await?;
        assert_eq!(result.stage, Stage::NotInstalled);
        assert_eq!(
            result.default_action().map(|a| a.target),
            Some(ActionTarget::Task(TaskName::Install))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_partially_configured_voices() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        seed_through_voices(root)?;
        std::fs::write(root.join("voice_config.json"), ALICE_ONLY)?;

        let result = manager(root, &MemoryTaskRegistry::new()).observe().await?;
        assert_eq!(result.stage, Stage::VoicesIncomplete(vec!["Bob".to_string()]));

        let configure: Vec<&Action> = result
            .actions
            .iter()
            .filter(|a| a.target == ActionTarget::Task(TaskName::ConfigureVoice))
            .collect();
        assert_eq!(configure.len(), 1);
        assert_eq!(configure[0].param(PARAM_SPEAKER), Some("Bob"));
        Ok(())
    }

    #[tokio::test]
    async fn test_ready_then_complete_then_running() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        seed_through_voices(root)?;
        std::fs::write(root.join("voice_config.json"), ALICE_AND_BOB)?;
        let registry = MemoryTaskRegistry::new();
        let manager = manager(root, &registry);

        assert_eq!(manager.observe().await?.stage, Stage::ReadyToGenerate);

        std::fs::write(root.join("cloned_audiobook.mp3"), b"ID3")?;
        assert_eq!(manager.observe().await?.stage, Stage::Complete);

        registry.set_running(TaskName::GenerateAudiobook, true);
        let result = manager.observe().await?;
        assert_eq!(result.stage, Stage::Running(TaskName::GenerateAudiobook));
        assert_eq!(result.actions.len(), 1);
        assert_eq!(
            result.actions[0].target,
            ActionTarget::Attach(TaskName::GenerateAudiobook)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_clears_derived_artifacts() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        seed_through_voices(root)?;
        std::fs::write(root.join("voice_config.json"), ALICE_AND_BOB)?;
        std::fs::write(root.join("cloned_audiobook.mp3"), b"ID3")?;
        std::fs::create_dir_all(root.join("app/output_audio_cloned"))?;
        std::fs::write(root.join("app/output_audio_cloned/0001.mp3"), b"ID3")?;
        std::fs::create_dir_all(root.join("input"))?;
        std::fs::write(root.join("input/tale.txt"), "Once upon a time.")?;

        let registry = MemoryTaskRegistry::new();
        registry.set_running(TaskName::GenerateAudiobook, true);
        let manager = manager(root, &registry);

        manager.reset().await?;

        for gone in [
            "voices.json",
            "voice_config.json",
            "cloned_audiobook.mp3",
            "annotated_script.json",
            "state.json",
            "app/config.json",
            "app/output_audio_cloned",
        ] {
            assert!(!root.join(gone).exists(), "{} should be removed", gone);
        }
        assert!(root.join("app/env").exists());
        assert!(root.join("input/tale.txt").exists());

        assert_eq!(registry.snapshot().await.running().count(), 0);
        let names = vec!["Alice".to_string(), "Bob".to_string()];
        assert_eq!(manager.voice_registry().await?.list_unconfigured(&names), names);
        assert_eq!(manager.observe().await?.stage, Stage::NotConfigured);
        Ok(())
    }

    #[tokio::test]
    async fn test_parse_voices_action_writes_catalog() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        seed_through_voices(root)?;
        std::fs::remove_file(root.join("voices.json"))?;
        std::fs::write(
            root.join("annotated_script.json"),
            r#"[
                {"speaker": "NARRATOR", "text": "It was late."},
                {"speaker": "Alice", "text": "Who's there?"},
                {"speaker": "NARRATOR", "text": "Nobody answered."},
                {"speaker": "Bob", "text": "Me."}
            ]"#,
        )?;
        let registry = MemoryTaskRegistry::new();
        let manager = manager(root, &registry);

        let result = manager.observe().await?;
        assert_eq!(result.stage, Stage::NoVoicesParsed);
        let parse = result
            .actions
            .iter()
            .find(|a| a.target == ActionTarget::Task(TaskName::ParseVoices))
            .cloned();
        assert!(parse.is_some());
        if let Some(action) = parse {
            manager.dispatch(&action).await?;
        }

        let catalog: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(root.join("voices.json"))?)?;
        assert_eq!(catalog, vec!["NARRATOR", "Alice", "Bob"]);
        assert!(!registry.is_running(TaskName::ParseVoices).await);
        assert_eq!(
            manager.observe().await?.stage,
            Stage::VoicesIncomplete(vec![
                "NARRATOR".to_string(),
                "Alice".to_string(),
                "Bob".to_string()
            ])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_parse_voices_without_speakers_writes_nothing() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        std::fs::write(root.join("annotated_script.json"), "[]")?;
        let manager = manager(root, &MemoryTaskRegistry::new());

        assert!(manager.parse_voices().await.is_err());
        assert!(!root.join("voices.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_script_means_no_script() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        seed_through_voices(root)?;
        let manager = manager(root, &MemoryTaskRegistry::new());

        for content in ["", r#"{"lines": [1,2"#] {
            std::fs::write(root.join("annotated_script.json"), content)?;
            assert_eq!(manager.observe().await?.stage, Stage::NoScript);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_no_task_starts_while_another_runs() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        seed_through_voices(root)?;
        std::fs::remove_file(root.join("voices.json"))?;
        let registry = MemoryTaskRegistry::new();
        registry.set_running(TaskName::GenerateAudiobook, true);
        let manager = manager(root, &registry);

        let mut params = BTreeMap::new();
        params.insert(PARAM_SPEAKER.to_string(), "Bob".to_string());
        assert!(manager.run_task(TaskName::ConfigureVoice, &params).await.is_err());
        assert!(manager.run_task(TaskName::ParseVoices, &BTreeMap::new()).await.is_err());
        assert!(!root.join("voices.json").exists());
        assert!(!root.join("voice_config.json").exists());

        let running: Vec<TaskName> = registry.snapshot().await.running().collect();
        assert_eq!(running, vec![TaskName::GenerateAudiobook]);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_catalog_means_voices_not_parsed() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        seed_through_voices(root)?;
        std::fs::write(root.join("voices.json"), "Alice, Bob")?;

        let result = manager(root, &MemoryTaskRegistry::new()).observe().await?;
        assert_eq!(result.stage, Stage::NoVoicesParsed);
        assert_eq!(std::fs::read_to_string(root.join("voices.json"))?, "Alice, Bob");
        Ok(())
    }

    #[tokio::test]
    async fn test_set_input_file_records_absolute_path() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("app/env"))?;
        std::fs::write(root.join("app/config.json"), "{}")?;
        std::fs::write(root.join("tale.txt"), "Once upon a time.")?;
        let manager = manager(root, &MemoryTaskRegistry::new());

        assert_eq!(manager.observe().await?.stage, Stage::NoInputFile);

        let input = manager.set_input_file(&root.join("tale.txt")).await?;
        assert!(Path::new(&input).is_absolute());
        assert_eq!(manager.artifacts().read_input_file_path().await, Some(input.clone()));

        let result = manager.observe().await?;
        assert_eq!(result.stage, Stage::NoScript);
        let generate = result
            .actions
            .iter()
            .find(|a| a.target == ActionTarget::Task(TaskName::GenerateScript));
        assert_eq!(
            generate.and_then(|a| a.param(crate::services::stage::PARAM_INPUT_FILE_PATH)),
            Some(input.as_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_open_missing_audiobook_is_an_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let manager = manager(temp_dir.path(), &MemoryTaskRegistry::new());

        assert!(manager.open(OpenTarget::Audiobook).is_err());
        Ok(())
    }
}
