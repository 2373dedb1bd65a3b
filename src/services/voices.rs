use anyhow::{bail, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::core::error::{ArtifactError, VoiceEntryError};
use crate::core::io::Storage;
use crate::core::voice::{StoredVoice, VoiceEntry, VoiceStrategy};

/// Fields to merge into a speaker's entry. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceUpdate {
    pub strategy: Option<VoiceStrategy>,
    pub voice_name: Option<String>,
    pub default_style: Option<String>,
    pub ref_audio: Option<String>,
    pub ref_text: Option<String>,
    pub seed: Option<i64>,
}

impl VoiceUpdate {
    pub fn preset(voice_name: impl Into<String>) -> Self {
        Self {
            strategy: Some(VoiceStrategy::Preset),
            voice_name: Some(voice_name.into()),
            ..Default::default()
        }
    }

    pub fn reference(
        strategy: VoiceStrategy,
        ref_audio: impl Into<String>,
        ref_text: impl Into<String>,
    ) -> Self {
        Self {
            strategy: Some(strategy),
            ref_audio: Some(ref_audio.into()),
            ref_text: Some(ref_text.into()),
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.default_style = Some(style.into());
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Writes the provided fields onto `entry`, refusing fields the entry's
    /// strategy does not have.
    fn apply_to(&self, entry: &mut VoiceEntry) -> Result<(), VoiceEntryError> {
        let strategy = entry.strategy();
        let mismatch = |field| VoiceEntryError::FieldMismatch { field, strategy };

        match entry {
            VoiceEntry::Preset(p) => {
                if self.ref_audio.is_some() {
                    return Err(mismatch("ref_audio"));
                }
                if self.ref_text.is_some() {
                    return Err(mismatch("ref_text"));
                }
                if let Some(name) = &self.voice_name {
                    p.voice_name = name.clone();
                }
                if let Some(style) = &self.default_style {
                    p.default_style = Some(style.clone()).filter(|s| !s.trim().is_empty());
                }
                if let Some(seed) = self.seed {
                    p.seed = seed;
                }
            }
            VoiceEntry::ReferenceClone(r) | VoiceEntry::StyleReferenceClone(r) => {
                if self.voice_name.is_some() {
                    return Err(mismatch("voice_name"));
                }
                if self.default_style.is_some() {
                    return Err(mismatch("default_style"));
                }
                if let Some(audio) = &self.ref_audio {
                    r.ref_audio = audio.clone();
                }
                if let Some(text) = &self.ref_text {
                    r.ref_text = text.clone();
                }
                if let Some(seed) = self.seed {
                    r.seed = seed;
                }
            }
        }
        Ok(())
    }
}

/// Per-speaker voice settings, persisted as one JSON object keyed by speaker.
/// Every mutation is written through immediately.
///
/// Entries are kept as raw JSON and decoded one at a time, so a broken entry
/// only affects its own speaker. Only a file that is not a JSON object marks
/// the whole registry malformed.
pub struct VoiceRegistry {
    storage: Arc<dyn Storage>,
    path: String,
    voices: BTreeMap<String, serde_json::Value>,
    malformed: bool,
}

impl VoiceRegistry {
    pub async fn load(storage: Arc<dyn Storage>, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let mut registry = Self {
            storage,
            path,
            voices: BTreeMap::new(),
            malformed: false,
        };

        match registry.read().await {
            Ok(voices) => registry.voices = voices,
            Err(ArtifactError::Missing(_)) => {}
            Err(e) => {
                warn!("{}; every speaker reads as unconfigured", e);
                registry.malformed = true;
            }
        }
        Ok(registry)
    }

    async fn read(&self) -> Result<BTreeMap<String, serde_json::Value>, ArtifactError> {
        let exists = self
            .storage
            .exists(&self.path)
            .await
            .map_err(|e| ArtifactError::Io {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if !exists {
            return Err(ArtifactError::Missing(self.path.clone()));
        }
        let content = self
            .storage
            .read_to_string(&self.path)
            .await
            .map_err(|e| ArtifactError::Io {
                path: self.path.clone(),
                reason: format!("{:#}", e),
            })?;
        serde_json::from_str(&content).map_err(|e| ArtifactError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.voices)?;
        self.storage.write(&self.path, content.as_bytes()).await
    }

    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// The speaker's entry, or `None` if there is none or it is not a
    /// coherent entry of a single strategy.
    pub fn get(&self, speaker: &str) -> Option<VoiceEntry> {
        let raw = self.voices.get(speaker)?;
        let stored = match StoredVoice::deserialize(raw) {
            Ok(stored) => stored,
            Err(e) => {
                debug!("Voice entry for '{}' does not decode: {}", speaker, e);
                return None;
            }
        };
        match VoiceEntry::try_from(&stored) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Voice entry for '{}' is invalid: {}", speaker, e);
                None
            }
        }
    }

    /// Merges `update` into the speaker's entry and persists the result.
    ///
    /// Changing strategy starts from an empty entry of the new strategy, so
    /// nothing from the previous one survives. With no strategy given, the
    /// current one is kept; a new speaker gets [`VoiceStrategy::StyleReferenceClone`].
    pub async fn upsert(&mut self, speaker: &str, update: VoiceUpdate) -> Result<VoiceEntry> {
        if self.malformed {
            bail!(
                "{} is malformed; run a reset before configuring voices",
                self.path
            );
        }

        let current = self.get(speaker);
        let strategy = update
            .strategy
            .or_else(|| current.as_ref().map(VoiceEntry::strategy))
            .unwrap_or(VoiceStrategy::StyleReferenceClone);

        let mut entry = match current {
            Some(entry) if entry.strategy() == strategy => entry,
            _ => VoiceEntry::empty(strategy),
        };
        update.apply_to(&mut entry)?;

        self.voices.insert(
            speaker.to_string(),
            serde_json::to_value(StoredVoice::from(&entry))?,
        );
        self.save().await?;
        info!("Voice for '{}' set to {}", speaker, entry.summary());
        Ok(entry)
    }

    /// Catalog speakers lacking a complete entry, in catalog order.
    pub fn list_unconfigured(&self, catalog: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        catalog
            .iter()
            .filter(|speaker| seen.insert(speaker.as_str()))
            .filter(|speaker| !self.get(speaker).is_some_and(|e| e.is_complete()))
            .cloned()
            .collect()
    }

    /// Drops every entry and removes the file.
    pub async fn clear(&mut self) -> Result<()> {
        self.voices.clear();
        self.malformed = false;
        self.storage.delete(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::voice::RANDOM_SEED;

    const VOICE_CONFIG: &str = "voice_config.json";

    fn catalog(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn registry(root: &std::path::Path) -> Result<VoiceRegistry> {
        VoiceRegistry::load(Arc::new(NativeStorage::new(root)), VOICE_CONFIG).await
    }

    #[tokio::test]
    async fn test_upsert_then_get_round_trips() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut voices = registry(temp_dir.path()).await?;

        voices
            .upsert("Alice", VoiceUpdate::preset("Serena").with_style("warm").with_seed(7))
            .await?;

        let entry = voices.get("Alice").unwrap();
        assert_eq!(entry.strategy(), VoiceStrategy::Preset);
        assert_eq!(entry.voice_name(), Some("Serena"));
        assert_eq!(entry.seed(), 7);
        assert!(entry.is_complete());

        // Written through: a fresh load sees the same entry.
        let reloaded = registry(temp_dir.path()).await?;
        assert_eq!(reloaded.get("Alice"), Some(entry));
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_update_merges_into_existing() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut voices = registry(temp_dir.path()).await?;

        let text_only = VoiceUpdate {
            ref_text: Some("It was a dark and stormy night.".to_string()),
            ..Default::default()
        };
        let entry = voices.upsert("Bob", text_only).await?;
        assert_eq!(entry.strategy(), VoiceStrategy::StyleReferenceClone);
        assert!(!entry.is_complete());

        let audio_only = VoiceUpdate {
            ref_audio: Some("/samples/bob.wav".to_string()),
            ..Default::default()
        };
        let entry = voices.upsert("Bob", audio_only).await?;
        let reference = entry.reference().unwrap();
        assert_eq!(reference.ref_text, "It was a dark and stormy night.");
        assert_eq!(reference.ref_audio, "/samples/bob.wav");
        assert_eq!(reference.seed, RANDOM_SEED);
        assert!(entry.is_complete());
        Ok(())
    }

    #[tokio::test]
    async fn test_strategy_switch_drops_previous_fields() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut voices = registry(temp_dir.path()).await?;

        voices
            .upsert("Alice", VoiceUpdate::preset("Vivian").with_style("bright"))
            .await?;
        voices
            .upsert(
                "Alice",
                VoiceUpdate::reference(VoiceStrategy::ReferenceClone, "a.wav", "Hello"),
            )
            .await?;

        let entry = voices.get("Alice").unwrap();
        assert_eq!(entry.strategy(), VoiceStrategy::ReferenceClone);
        assert_eq!(entry.voice_name(), None);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(temp_dir.path().join(VOICE_CONFIG))?)?;
        assert_eq!(raw["Alice"]["type"], "clone");
        assert!(raw["Alice"].get("voice_name").is_none());
        assert!(raw["Alice"].get("default_style").is_none());

        // Clone to style clone also starts from scratch.
        let entry = voices
            .upsert(
                "Alice",
                VoiceUpdate {
                    strategy: Some(VoiceStrategy::StyleReferenceClone),
                    ..Default::default()
                },
            )
            .await?;
        assert!(!entry.is_complete());
        Ok(())
    }

    #[tokio::test]
    async fn test_field_of_other_strategy_is_rejected() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut voices = registry(temp_dir.path()).await?;

        let mixed = VoiceUpdate::preset("Ryan");
        let mixed = VoiceUpdate {
            ref_audio: Some("a.wav".to_string()),
            ..mixed
        };
        assert!(voices.upsert("Carol", mixed).await.is_err());
        assert_eq!(voices.get("Carol"), None);
        assert!(!temp_dir.path().join(VOICE_CONFIG).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_unconfigured_in_catalog_order() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join(VOICE_CONFIG),
            r#"{
                "NARRATOR": {"ref_audio": "n.wav", "ref_text": "Once upon a time", "seed": "-1"},
                "ELENA": {"type": "clone", "ref_audio": "e.wav", "ref_text": ""},
                "MARCUS": {"type": "clone", "voice_name": "Ryan", "ref_audio": "m.wav", "ref_text": "Hi"},
                "GHOST": {"type": "preset", "voice_name": "Eric"}
            }"#,
        )?;
        let voices = registry(temp_dir.path()).await?;
        let names = catalog(&["NARRATOR", "MARCUS", "ELENA", "IVY", "GHOST", "MARCUS"]);

        let first = voices.list_unconfigured(&names);
        assert_eq!(first, catalog(&["MARCUS", "ELENA", "IVY"]));
        assert_eq!(voices.list_unconfigured(&names), first);
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_leaves_whole_catalog_unconfigured() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut voices = registry(temp_dir.path()).await?;
        voices.upsert("Alice", VoiceUpdate::preset("Serena")).await?;
        voices.upsert("Bob", VoiceUpdate::preset("Dylan")).await?;

        voices.clear().await?;

        let names = catalog(&["Alice", "Bob"]);
        assert_eq!(voices.list_unconfigured(&names), names);
        assert!(!temp_dir.path().join(VOICE_CONFIG).exists());
        assert_eq!(registry(temp_dir.path()).await?.list_unconfigured(&names), names);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_file_is_not_overwritten() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join(VOICE_CONFIG);
        std::fs::write(&path, "{ \"Alice\": ")?;

        let mut voices = registry(temp_dir.path()).await?;
        assert!(voices.is_malformed());
        assert_eq!(voices.list_unconfigured(&catalog(&["Alice"])), catalog(&["Alice"]));

        assert!(voices.upsert("Alice", VoiceUpdate::preset("Serena")).await.is_err());
        assert_eq!(std::fs::read_to_string(&path)?, "{ \"Alice\": ");

        voices.clear().await?;
        assert!(!voices.is_malformed());
        voices.upsert("Alice", VoiceUpdate::preset("Serena")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_badly_typed_entry_only_affects_its_speaker() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join(VOICE_CONFIG);
        std::fs::write(
            &path,
            r#"{
                "Alice": {"type": "preset", "voice_name": "Ryan"},
                "Bob": {"type": "preset", "voice_name": 7},
                "Carol": {"type": "clone", "ref_audio": "c.wav", "ref_text": "Hi", "seed": true}
            }"#,
        )?;

        let mut voices = registry(temp_dir.path()).await?;
        assert!(!voices.is_malformed());
        let alice = voices.get("Alice");
        assert_eq!(alice.as_ref().and_then(VoiceEntry::voice_name), Some("Ryan"));
        assert_eq!(voices.get("Bob"), None);
        assert_eq!(
            voices.list_unconfigured(&catalog(&["Alice", "Bob", "Carol"])),
            catalog(&["Bob", "Carol"])
        );

        voices.upsert("Bob", VoiceUpdate::preset("Dylan")).await?;

        // The untouched entries are written back as they were.
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw["Bob"]["voice_name"], "Dylan");
        assert_eq!(raw["Carol"]["seed"], true);
        let reloaded = registry(temp_dir.path()).await?;
        assert_eq!(
            reloaded.list_unconfigured(&catalog(&["Alice", "Bob", "Carol"])),
            catalog(&["Carol"])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_non_object_file_is_malformed() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(temp_dir.path().join(VOICE_CONFIG), r#"["Alice", "Bob"]"#)?;

        let mut voices = registry(temp_dir.path()).await?;
        assert!(voices.is_malformed());
        assert!(voices.upsert("Alice", VoiceUpdate::preset("Serena")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_repairs_invalid_entry_from_scratch() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::write(
            temp_dir.path().join(VOICE_CONFIG),
            r#"{"Bob": {"type": "preset", "voice_name": "Eric", "ref_text": "stale"}}"#,
        )?;
        let mut voices = registry(temp_dir.path()).await?;
        assert_eq!(voices.get("Bob"), None);

        let entry = voices.upsert("Bob", VoiceUpdate::preset("Eric")).await?;
        assert!(entry.is_complete());
        assert!(entry.reference().is_none());
        Ok(())
    }
}
