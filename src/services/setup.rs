use anyhow::{anyhow, Result};
use inquire::validator::Validation;
use inquire::{CustomType, CustomUserError, Password, Select, Text};
use std::path::Path;

use crate::core::state::{LlmSettings, PipelineSettings, TtsSettings};
use crate::core::voice::{VoiceEntry, VoiceStrategy, RANDOM_SEED};
use crate::services::voices::VoiceUpdate;

pub const DEFAULT_MODEL_NAME: &str = "gemini-2.0-flash";
pub const DEFAULT_TTS_URL: &str = "http://127.0.0.1:7860";

const REFERENCE_AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "wav", "ogg", "flac", "m4a"];
const INPUT_EXTENSIONS: [&str; 3] = ["txt", "md", "epub"];

/// Asks for LLM and TTS settings. Current values pre-fill each prompt.
pub fn configure_pipeline(existing: Option<&PipelineSettings>) -> Result<PipelineSettings> {
    let current = existing.cloned().unwrap_or_default();

    let mut key_prompt = Password::new("LLM API key:").without_confirmation();
    if !current.llm.api_key.is_empty() {
        key_prompt = key_prompt.with_help_message("Leave empty to keep the current key");
    }
    let entered_key = key_prompt.prompt()?;
    let api_key = if entered_key.trim().is_empty() {
        current.llm.api_key.clone()
    } else {
        entered_key.trim().to_string()
    };

    let model_default = non_empty_or(&current.llm.model_name, DEFAULT_MODEL_NAME);
    let model_name = Text::new("LLM model name:")
        .with_default(model_default)
        .prompt()?;

    let url_default = non_empty_or(&current.tts.url, DEFAULT_TTS_URL);
    let url = Text::new("TTS server URL:")
        .with_default(url_default)
        .with_validator(|input: &str| -> Result<Validation, CustomUserError> {
            Ok(match validate_tts_url(input) {
                Ok(()) => Validation::Valid,
                Err(msg) => Validation::Invalid(msg.into()),
            })
        })
        .prompt()?;

    Ok(PipelineSettings {
        llm: LlmSettings {
            api_key,
            model_name: model_name.trim().to_string(),
        },
        tts: TtsSettings {
            url: url.trim().to_string(),
        },
    })
}

pub fn prompt_input_file(current: Option<&str>) -> Result<String> {
    let mut prompt = Text::new("Path to the book (.txt, .md or .epub):")
        .with_validator(|input: &str| -> Result<Validation, CustomUserError> {
            let path = Path::new(input.trim());
            Ok(if !path.is_file() {
                Validation::Invalid("File not found".into())
            } else if !is_supported_input(path) {
                Validation::Invalid("Expected a .txt, .md or .epub file".into())
            } else {
                Validation::Valid
            })
        });
    if let Some(current) = current {
        prompt = prompt.with_initial_value(current);
    }
    Ok(prompt.prompt()?.trim().to_string())
}

pub fn prompt_speaker(catalog: &[String]) -> Result<String> {
    if catalog.is_empty() {
        return Err(anyhow!("No speakers found. Parse the voices first."));
    }
    let speaker = Select::new("Which speaker?", catalog.to_vec()).prompt()?;
    Ok(speaker)
}

/// Walks the user through one speaker's voice. The returned update replaces
/// every field of the chosen strategy.
pub fn prompt_voice(
    speaker: &str,
    presets: &[String],
    existing: Option<&VoiceEntry>,
) -> Result<VoiceUpdate> {
    let strategies: Vec<String> = VoiceStrategy::ALL
        .iter()
        .map(|s| format!("{} - {}", s, s.description()))
        .collect();
    let cursor = existing
        .and_then(|e| VoiceStrategy::ALL.iter().position(|s| *s == e.strategy()))
        .unwrap_or(0);
    let choice = Select::new(&format!("Voice strategy for {}:", speaker), strategies)
        .with_starting_cursor(cursor)
        .raw_prompt()?;
    let strategy = VoiceStrategy::ALL[choice.index];

    let update = if strategy == VoiceStrategy::Preset {
        if presets.is_empty() {
            return Err(anyhow!("No preset voices are configured"));
        }
        let cursor = existing
            .and_then(VoiceEntry::voice_name)
            .and_then(|name| presets.iter().position(|p| p == name))
            .unwrap_or(0);
        let voice_name = Select::new(&format!("Preset voice for {}:", speaker), presets.to_vec())
            .with_starting_cursor(cursor)
            .prompt()?;
        let style = Text::new("Default style (optional):")
            .with_help_message("e.g. calm, cheerful, whispering")
            .prompt()?;

        let mut update = VoiceUpdate::preset(voice_name);
        if !style.trim().is_empty() {
            update = update.with_style(style.trim());
        }
        update
    } else {
        let reference = existing.and_then(VoiceEntry::reference);
        let mut text_prompt = Text::new("Reference audio transcript:")
            .with_help_message("The exact words spoken in the reference audio")
            .with_validator(|input: &str| -> Result<Validation, CustomUserError> {
                Ok(if input.trim().is_empty() {
                    Validation::Invalid("A transcript is required".into())
                } else {
                    Validation::Valid
                })
            });
        if let Some(r) = reference {
            text_prompt = text_prompt.with_initial_value(&r.ref_text);
        }
        let ref_text = text_prompt.prompt()?;

        let mut audio_prompt = Text::new("Reference audio file (5-15 seconds):")
            .with_validator(|input: &str| -> Result<Validation, CustomUserError> {
                let path = Path::new(input.trim());
                Ok(if !path.is_file() {
                    Validation::Invalid("File not found".into())
                } else if !is_reference_audio(path) {
                    Validation::Invalid("Expected .mp3, .wav, .ogg, .flac or .m4a".into())
                } else {
                    Validation::Valid
                })
            });
        if let Some(r) = reference {
            audio_prompt = audio_prompt.with_initial_value(&r.ref_audio);
        }
        let ref_audio = audio_prompt.prompt()?;

        VoiceUpdate::reference(strategy, ref_audio.trim(), ref_text.trim())
    };

    let seed = CustomType::<i64>::new("Voice seed:")
        .with_default(existing.map(VoiceEntry::seed).unwrap_or(RANDOM_SEED))
        .with_help_message("-1 for random, any other number for repeatable output")
        .prompt()?;

    Ok(update.with_seed(seed))
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

pub fn validate_tts_url(input: &str) -> Result<(), String> {
    let url = url::Url::parse(input.trim()).map_err(|e| format!("Invalid URL: {}", e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("Unsupported scheme '{}', use http or https", other)),
    }
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

pub fn is_reference_audio(path: &Path) -> bool {
    has_extension(path, &REFERENCE_AUDIO_EXTENSIONS)
}

pub fn is_supported_input(path: &Path) -> bool {
    has_extension(path, &INPUT_EXTENSIONS)
}

pub fn is_epub(path: &Path) -> bool {
    has_extension(path, &["epub"])
}
