use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::core::state::VoiceCatalog;

/// One line of the annotated script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub style: Option<String>,
}

/// Reads the script stored at `path`. A `.json` script must be a JSON array
/// of lines (possibly fenced as a Markdown code block); any other script may
/// also be plain `SPEAKER: text` lines. A script without a single line is an
/// error, since that is what an interrupted write leaves behind.
pub fn parse_script(path: &str, content: &str) -> Result<Vec<ScriptLine>> {
    let clean = strip_code_blocks(content);
    let lines = if is_json_path(path) || clean.starts_with(['[', '{']) {
        serde_json::from_str::<Vec<ScriptLine>>(&clean).context("Failed to parse script JSON")?
    } else {
        parse_plain_lines(&clean)
    };
    if lines.is_empty() {
        bail!("Script {} has no lines", path);
    }
    Ok(lines)
}

fn is_json_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn parse_plain_lines(content: &str) -> Vec<ScriptLine> {
    content
        .lines()
        .filter_map(|line| {
            let (speaker, text) = line.split_once(':')?;
            let speaker = speaker.trim().replace(['*', '#'], "");
            let speaker = speaker.trim();
            let text = text.trim();
            if speaker.is_empty() || text.is_empty() {
                return None;
            }
            Some(ScriptLine {
                speaker: speaker.to_string(),
                text: text.to_string(),
                style: None,
            })
        })
        .collect()
}

/// Distinct speakers in order of first appearance.
pub fn extract_speakers(lines: &[ScriptLine]) -> VoiceCatalog {
    let mut seen = HashSet::new();
    lines
        .iter()
        .map(|l| l.speaker.trim())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT_JSON: &str = "annotated_script.json";
    const SCRIPT_TXT: &str = "annotated_script.txt";

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("```\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("  ```json  \n  []  \n  ```  "), "[]");
    }

    #[test]
    fn test_parse_json_script() -> Result<()> {
        let content = r#"```json
[
  {"speaker": "NARRATOR", "text": "The old mansion loomed.", "style": "ominous"},
  {"speaker": "ELENA", "text": "[shivers] I don't like this place.", "style": "nervous"},
  {"speaker": "MARCUS", "text": "Scared of a little dust?"}
]
```"#;
        let lines = parse_script(SCRIPT_JSON, content)?;

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].style.as_deref(), Some("nervous"));
        assert_eq!(lines[2].style, None);
        Ok(())
    }

    #[test]
    fn test_parse_plain_script() -> Result<()> {
        let content = "**NARRATOR**: It was late.\n\
                       \n\
                       A line without a speaker\n\
                       ## ELENA: Who's there?\n\
                       MARCUS:   \n\
                       NARRATOR: Nobody answered: not a sound.";
        let lines = parse_script(SCRIPT_TXT, content)?;

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].speaker, "NARRATOR");
        assert_eq!(lines[1].speaker, "ELENA");
        assert_eq!(lines[2].text, "Nobody answered: not a sound.");
        Ok(())
    }

    #[test]
    fn test_malformed_json_script_is_an_error() {
        assert!(parse_script(SCRIPT_JSON, r#"[{"speaker": "ELENA"}"#).is_err());
        assert!(parse_script(SCRIPT_JSON, r#"[{"speaker": "ELENA"}]"#).is_err());
        assert!(parse_script(SCRIPT_TXT, r#"[{"speaker": "ELENA"}"#).is_err());
    }

    #[test]
    fn test_interrupted_writes_are_errors() {
        assert!(parse_script(SCRIPT_JSON, "").is_err());
        assert!(parse_script(SCRIPT_JSON, "[]").is_err());
        assert!(parse_script(SCRIPT_JSON, r#"{"lines": [1,2"#).is_err());
        assert!(parse_script(SCRIPT_TXT, r#"{"lines": [1,2"#).is_err());
        assert!(parse_script(SCRIPT_TXT, "").is_err());
        assert!(parse_script(SCRIPT_TXT, "no speakers in here").is_err());
    }

    #[test]
    fn test_json_script_never_falls_back_to_plain_lines() {
        assert!(parse_script(SCRIPT_JSON, "NARRATOR: It was late.").is_err());
        assert!(parse_script("ANNOTATED.JSON", "NARRATOR: It was late.").is_err());
        assert_eq!(parse_script(SCRIPT_TXT, "NARRATOR: It was late.").map(|l| l.len()).ok(), Some(1));
    }

    #[test]
    fn test_extract_speakers_keeps_first_appearance() {
        let line = |speaker: &str| ScriptLine {
            speaker: speaker.to_string(),
            text: "...".to_string(),
            style: None,
        };
        let lines = vec![
            line("NARRATOR"),
            line("ELENA"),
            line("NARRATOR"),
            line(" MARCUS "),
            line("ELENA"),
            line(""),
        ];

        assert_eq!(extract_speakers(&lines), vec!["NARRATOR", "ELENA", "MARCUS"]);
    }
}
