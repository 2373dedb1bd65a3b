use anyhow::Result;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::config::ArtifactPaths;
use crate::core::error::ArtifactError;
use crate::core::io::Storage;
use crate::core::state::{PipelineSettings, PipelineState, VoiceCatalog};
use crate::services::script::{parse_script, ScriptLine};

/// Durable files whose presence marks a finished pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    InstallMarker,
    Settings,
    State,
    Script,
    Voices,
    VoiceConfig,
    Audiobook,
    OutputFolder,
    Voicelines,
}

impl Artifact {
    /// Everything a reset removes. The install marker is kept.
    pub const DERIVED: [Artifact; 8] = [
        Artifact::Script,
        Artifact::Voices,
        Artifact::VoiceConfig,
        Artifact::State,
        Artifact::Settings,
        Artifact::Audiobook,
        Artifact::OutputFolder,
        Artifact::Voicelines,
    ];
}

/// What the filesystem says right now. Rebuilt on every inference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactSnapshot {
    pub installed: bool,
    pub configured: bool,
    pub input_file_path: Option<String>,
    pub script_exists: bool,
    pub voices_exists: bool,
    pub voice_config_exists: bool,
    pub audiobook_exists: bool,
}

pub struct ArtifactStore {
    storage: Arc<dyn Storage>,
    paths: ArtifactPaths,
}

impl ArtifactStore {
    pub fn new(storage: Arc<dyn Storage>, paths: ArtifactPaths) -> Self {
        Self { storage, paths }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn path(&self, artifact: Artifact) -> &str {
        match artifact {
            Artifact::InstallMarker => &self.paths.install_marker,
            Artifact::Settings => &self.paths.settings,
            Artifact::State => &self.paths.state,
            Artifact::Script => &self.paths.script,
            Artifact::Voices => &self.paths.voices,
            Artifact::VoiceConfig => &self.paths.voice_config,
            Artifact::Audiobook => &self.paths.audiobook,
            Artifact::OutputFolder => &self.paths.output_folder,
            Artifact::Voicelines => &self.paths.voicelines,
        }
    }

    /// Plain presence check. Storage failures read as absent.
    pub async fn exists(&self, artifact: Artifact) -> bool {
        let path = self.path(artifact);
        match self.storage.exists(path).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Could not check {}: {}", path, e);
                false
            }
        }
    }

    pub async fn read_text(&self, artifact: Artifact) -> Result<String, ArtifactError> {
        let path = self.path(artifact);
        if !self.exists(artifact).await {
            return Err(ArtifactError::Missing(path.to_string()));
        }
        self.storage
            .read_to_string(path)
            .await
            .map_err(|e| ArtifactError::Io {
                path: path.to_string(),
                reason: format!("{:#}", e),
            })
    }

    pub async fn read_json<T: DeserializeOwned>(
        &self,
        artifact: Artifact,
    ) -> Result<T, ArtifactError> {
        let content = self.read_text(artifact).await?;
        serde_json::from_str(&content).map_err(|e| ArtifactError::Malformed {
            path: self.path(artifact).to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn write_json<T: Serialize>(&self, artifact: Artifact, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        self.storage
            .write(self.path(artifact), content.as_bytes())
            .await
    }

    pub async fn remove(&self, artifact: Artifact) -> Result<()> {
        self.storage.delete(self.path(artifact)).await
    }

    pub async fn read_settings(&self) -> Option<PipelineSettings> {
        usable(self.read_json(Artifact::Settings).await)
    }

    pub async fn read_input_file_path(&self) -> Option<String> {
        let state: PipelineState = usable(self.read_json(Artifact::State).await)?;
        state.input().map(str::to_string)
    }

    pub async fn read_voice_catalog(&self) -> Option<VoiceCatalog> {
        usable(self.read_json(Artifact::Voices).await)
    }

    /// The script's lines. An unreadable or empty script is an error.
    pub async fn read_script(&self) -> Result<Vec<ScriptLine>> {
        let content = self.read_text(Artifact::Script).await?;
        parse_script(self.path(Artifact::Script), &content)
    }

    pub async fn script_is_usable(&self) -> bool {
        match self.read_text(Artifact::Script).await {
            Ok(content) => match parse_script(self.path(Artifact::Script), &content) {
                Ok(_) => true,
                Err(e) => {
                    let path = self.path(Artifact::Script);
                    warn!("{} is malformed, treating it as absent: {:#}", path, e);
                    false
                }
            },
            Err(e) => {
                report(&e);
                false
            }
        }
    }

    pub async fn snapshot(&self) -> ArtifactSnapshot {
        self.snapshot_with_catalog().await.0
    }

    /// The snapshot together with the voices catalog it was built from, so
    /// callers never pair `voices_exists` with a second, later read.
    pub async fn snapshot_with_catalog(&self) -> (ArtifactSnapshot, Option<VoiceCatalog>) {
        let voice_config: Option<BTreeMap<String, serde_json::Value>> =
            usable(self.read_json(Artifact::VoiceConfig).await);
        let catalog = self.read_voice_catalog().await;

        let snapshot = ArtifactSnapshot {
            installed: self.exists(Artifact::InstallMarker).await,
            configured: self.read_settings().await.is_some(),
            input_file_path: self.read_input_file_path().await,
            script_exists: self.script_is_usable().await,
            voices_exists: catalog.is_some(),
            voice_config_exists: voice_config.is_some(),
            audiobook_exists: self.exists(Artifact::Audiobook).await,
        };
        (snapshot, catalog)
    }
}

/// Collapses a read into "usable or not". A malformed file is left on disk
/// untouched; it reads as absent until a reset removes it.
fn usable<T>(result: Result<T, ArtifactError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            report(&e);
            None
        }
    }
}

fn report(error: &ArtifactError) {
    if error.is_missing() {
        debug!("{}", error);
    } else {
        warn!("{}, treating it as absent", error);
    }
}
