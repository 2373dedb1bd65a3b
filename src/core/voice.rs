use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::core::error::VoiceEntryError;

/// Seed value meaning "pick a new random seed for every line".
pub const RANDOM_SEED: i64 = -1;

const TYPE_PRESET: &str = "preset";
const TYPE_CLONE: &str = "clone";
const TYPE_STYLE_CLONE: &str = "style_clone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStrategy {
    Preset,
    ReferenceClone,
    StyleReferenceClone,
}

impl VoiceStrategy {
    pub const ALL: [VoiceStrategy; 3] = [
        VoiceStrategy::Preset,
        VoiceStrategy::ReferenceClone,
        VoiceStrategy::StyleReferenceClone,
    ];

    /// Value of the `type` marker in the voice config file.
    pub fn type_marker(&self) -> &'static str {
        match self {
            VoiceStrategy::Preset => TYPE_PRESET,
            VoiceStrategy::ReferenceClone => TYPE_CLONE,
            VoiceStrategy::StyleReferenceClone => TYPE_STYLE_CLONE,
        }
    }

    /// Whether per-line style directions from the script reach the TTS engine.
    pub fn honors_style(&self) -> bool {
        !matches!(self, VoiceStrategy::ReferenceClone)
    }

    pub fn uses_reference_audio(&self) -> bool {
        !matches!(self, VoiceStrategy::Preset)
    }

    pub fn description(&self) -> &'static str {
        match self {
            VoiceStrategy::Preset => "Preset voice from the built-in catalog",
            VoiceStrategy::ReferenceClone => {
                "Clone from reference audio (script style directions ignored)"
            }
            VoiceStrategy::StyleReferenceClone => {
                "Clone from reference audio, following script style directions"
            }
        }
    }
}

impl fmt::Display for VoiceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoiceStrategy::Preset => "preset",
            VoiceStrategy::ReferenceClone => "reference clone",
            VoiceStrategy::StyleReferenceClone => "style reference clone",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetVoice {
    pub voice_name: String,
    pub default_style: Option<String>,
    pub seed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceVoice {
    pub ref_audio: String,
    pub ref_text: String,
    pub seed: i64,
}

/// Voice settings for one speaker. The variant is the strategy, so fields of
/// one strategy can never linger on an entry of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEntry {
    Preset(PresetVoice),
    ReferenceClone(ReferenceVoice),
    StyleReferenceClone(ReferenceVoice),
}

impl VoiceEntry {
    /// An entry of the given strategy with every field unset.
    pub fn empty(strategy: VoiceStrategy) -> Self {
        let reference = ReferenceVoice {
            ref_audio: String::new(),
            ref_text: String::new(),
            seed: RANDOM_SEED,
        };
        match strategy {
            VoiceStrategy::Preset => VoiceEntry::Preset(PresetVoice {
                voice_name: String::new(),
                default_style: None,
                seed: RANDOM_SEED,
            }),
            VoiceStrategy::ReferenceClone => VoiceEntry::ReferenceClone(reference),
            VoiceStrategy::StyleReferenceClone => VoiceEntry::StyleReferenceClone(reference),
        }
    }

    pub fn strategy(&self) -> VoiceStrategy {
        match self {
            VoiceEntry::Preset(_) => VoiceStrategy::Preset,
            VoiceEntry::ReferenceClone(_) => VoiceStrategy::ReferenceClone,
            VoiceEntry::StyleReferenceClone(_) => VoiceStrategy::StyleReferenceClone,
        }
    }

    pub fn seed(&self) -> i64 {
        match self {
            VoiceEntry::Preset(p) => p.seed,
            VoiceEntry::ReferenceClone(r) | VoiceEntry::StyleReferenceClone(r) => r.seed,
        }
    }

    pub fn voice_name(&self) -> Option<&str> {
        match self {
            VoiceEntry::Preset(p) => Some(&p.voice_name),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&ReferenceVoice> {
        match self {
            VoiceEntry::Preset(_) => None,
            VoiceEntry::ReferenceClone(r) | VoiceEntry::StyleReferenceClone(r) => Some(r),
        }
    }

    /// A preset needs a voice name; a clone needs both reference audio and its transcript.
    pub fn is_complete(&self) -> bool {
        match self {
            VoiceEntry::Preset(p) => !p.voice_name.trim().is_empty(),
            VoiceEntry::ReferenceClone(r) | VoiceEntry::StyleReferenceClone(r) => {
                !r.ref_audio.trim().is_empty() && !r.ref_text.trim().is_empty()
            }
        }
    }

    pub fn summary(&self) -> String {
        match self {
            VoiceEntry::Preset(p) => match &p.default_style {
                Some(style) => format!("preset '{}' ({})", p.voice_name, style),
                None => format!("preset '{}'", p.voice_name),
            },
            VoiceEntry::ReferenceClone(r) | VoiceEntry::StyleReferenceClone(r) => {
                format!("{} of {}", self.strategy(), r.ref_audio)
            }
        }
    }
}

/// A voice config record as it sits on disk. Every field is optional so that
/// hand-edited or stale records still load; [`VoiceEntry::try_from`] decides
/// whether the record is coherent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVoice {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_text: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_seed",
        skip_serializing_if = "Option::is_none"
    )]
    pub seed: Option<i64>,
}

impl StoredVoice {
    /// Strategy named by the `type` marker. An absent marker means the
    /// style-honoring clone, which is what older voice config files contain.
    pub fn strategy(&self) -> Result<VoiceStrategy, VoiceEntryError> {
        match self.kind.as_deref().map(str::trim) {
            None | Some("") | Some(TYPE_STYLE_CLONE) => Ok(VoiceStrategy::StyleReferenceClone),
            Some(TYPE_CLONE) => Ok(VoiceStrategy::ReferenceClone),
            Some(TYPE_PRESET) => Ok(VoiceStrategy::Preset),
            Some(other) => Err(VoiceEntryError::UnknownType(other.to_string())),
        }
    }
}

impl TryFrom<&StoredVoice> for VoiceEntry {
    type Error = VoiceEntryError;

    fn try_from(stored: &StoredVoice) -> Result<Self, Self::Error> {
        let strategy = stored.strategy()?;
        let seed = stored.seed.unwrap_or(RANDOM_SEED);

        if strategy.uses_reference_audio() {
            if stored.voice_name.is_some() || stored.default_style.is_some() {
                return Err(VoiceEntryError::MixedStrategies);
            }
            let reference = ReferenceVoice {
                ref_audio: stored.ref_audio.clone().unwrap_or_default(),
                ref_text: stored.ref_text.clone().unwrap_or_default(),
                seed,
            };
            Ok(match strategy {
                VoiceStrategy::ReferenceClone => VoiceEntry::ReferenceClone(reference),
                _ => VoiceEntry::StyleReferenceClone(reference),
            })
        } else {
            if stored.ref_audio.is_some() || stored.ref_text.is_some() {
                return Err(VoiceEntryError::MixedStrategies);
            }
            Ok(VoiceEntry::Preset(PresetVoice {
                voice_name: stored.voice_name.clone().unwrap_or_default(),
                default_style: stored.default_style.clone(),
                seed,
            }))
        }
    }
}

impl From<&VoiceEntry> for StoredVoice {
    fn from(entry: &VoiceEntry) -> Self {
        let mut stored = StoredVoice {
            kind: Some(entry.strategy().type_marker().to_string()),
            seed: Some(entry.seed()),
            ..Default::default()
        };
        match entry {
            VoiceEntry::Preset(p) => {
                stored.voice_name = Some(p.voice_name.clone());
                stored.default_style = p.default_style.clone();
            }
            VoiceEntry::ReferenceClone(r) | VoiceEntry::StyleReferenceClone(r) => {
                stored.ref_audio = Some(r.ref_audio.clone());
                stored.ref_text = Some(r.ref_text.clone());
            }
        }
        stored
    }
}

// Form-driven writers store the seed as text ("-1"). Blank or non-numeric
// text falls back to a random seed.
fn deserialize_seed<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SeedRepr {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<SeedRepr>::deserialize(deserializer)? {
        None => None,
        Some(SeedRepr::Int(n)) => Some(n),
        Some(SeedRepr::Float(f)) if f.fract() == 0.0 => Some(f as i64),
        Some(SeedRepr::Float(_)) => None,
        Some(SeedRepr::Text(s)) => s.trim().parse::<i64>().ok(),
    })
}
