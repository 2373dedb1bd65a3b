use serde::{Deserialize, Serialize};

/// The small persisted state object: which book is being converted.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct PipelineState {
    #[serde(default)]
    pub input_file_path: Option<String>,
}

impl PipelineState {
    pub fn with_input(path: impl Into<String>) -> Self {
        Self {
            input_file_path: Some(path.into()),
        }
    }

    /// The selected input, if any. An empty path counts as no selection.
    pub fn input(&self) -> Option<&str> {
        self.input_file_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Settings read by the script and audiobook generators. Its presence marks
/// the pipeline as configured.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub tts: TtsSettings,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct LlmSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model_name: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct TtsSettings {
    #[serde(default)]
    pub url: String,
}

/// Speaker names discovered in the script, in order of first appearance.
pub type VoiceCatalog = Vec<String>;
