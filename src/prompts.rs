//! Prompts for VLM-based image-to-Markdown extraction.
//!
//! All prompt text lives here so it can be inspected by unit tests without a
//! real VLM. A request may override the system prompt (see
//! [`ExtractionPrompt::from_request`]); the persisted [`PromptConfig`] is what
//! the UI loads and saves as the user's preferred override.

use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default system prompt for turning one page image into structured Markdown.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a content-architecture expert. Analyse the content of the image and do the following:

1. UNDERSTAND, DO NOT TRANSCRIBE
   - Do not produce a character-by-character OCR dump
   - Recover the logical relationships (parallel, hierarchical, causal)

2. STRUCTURED OUTPUT
   - Use Markdown heading levels (#/##/###) and lists

3. REPAIR
   - Silently fix sentences that recognition obviously garbled

4. EMPHASIS
   - Identify underlined, highlighted, or hand-annotated key points and mark them

5. FORMAT
   - Chapter titles use ##
   - Concept levels use ###
   - Key points use **bold**
   - Logical relations are shown with `→` or indentation

OUTPUT REQUIREMENTS
   - Do not add to or remove from the content of the image; respect its text
   - Return Markdown directly
   - Do NOT wrap the output in code fences
   - Do NOT add an explanatory preamble"#;

/// Example output shape shown to the user as the starting custom format.
pub const DEFAULT_FORMAT_EXAMPLE: &str = r#"## Chapter 1 Concepts

### 1.1 Definition
**Key concept**: refers to...

### 1.2 Characteristics
- Characteristic one: ...
- Characteristic two: ...

### 1.3 Relationships
Concept A → Concept B → Concept C"#;

/// Text sent alongside every image in the user turn.
pub const USER_INSTRUCTION: &str = "Extract and restructure the content of this image:";

/// The instructions sent with every unit of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPrompt {
    pub system: String,
    pub user: String,
}

impl Default for ExtractionPrompt {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            user: USER_INSTRUCTION.to_string(),
        }
    }
}

impl ExtractionPrompt {
    /// Build the prompt for a process request.
    ///
    /// The custom prompt is only honoured when `use_custom` is set and the
    /// prompt is non-blank; a format example is appended when present.
    pub fn from_request(
        use_custom: bool,
        custom_prompt: Option<&str>,
        format_example: Option<&str>,
    ) -> Self {
        match custom_prompt.map(str::trim).filter(|p| use_custom && !p.is_empty()) {
            Some(custom) => Self {
                system: compose_custom_prompt(custom, format_example),
                user: USER_INSTRUCTION.to_string(),
            },
            None => Self::default(),
        }
    }
}

/// Append the format example (if any) to a custom prompt.
pub fn compose_custom_prompt(custom: &str, format_example: Option<&str>) -> String {
    match format_example.map(str::trim).filter(|e| !e.is_empty()) {
        Some(example) => format!(
            "{custom}\n\nFollow this output format example strictly:\n```{example}```"
        ),
        None => custom.to_string(),
    }
}

/// The user's saved prompt preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub prompt: String,
    pub format_example: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            format_example: DEFAULT_FORMAT_EXAMPLE.to_string(),
        }
    }
}

impl PromptConfig {
    /// Load the saved config, falling back to defaults when none was saved.
    pub async fn load(path: &Path) -> Result<Self, BatchError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                BatchError::Internal(format!(
                    "prompt config '{}' is not valid JSON: {e}",
                    path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No prompt config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(BatchError::storage(path, e)),
        }
    }

    /// Persist the config as pretty JSON, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<(), BatchError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BatchError::Internal(format!("serialise prompt config: {e}")))?;
        crate::store::write_atomic(path, json.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_forbids_fences() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("code fences"));
    }

    #[test]
    fn custom_prompt_ignored_without_flag() {
        let p = ExtractionPrompt::from_request(false, Some("Be terse."), None);
        assert_eq!(p, ExtractionPrompt::default());
    }

    #[test]
    fn blank_custom_prompt_falls_back() {
        let p = ExtractionPrompt::from_request(true, Some("   "), Some("## x"));
        assert_eq!(p.system, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn custom_prompt_with_example() {
        let p = ExtractionPrompt::from_request(true, Some("Be terse."), Some("## Title"));
        assert!(p.system.starts_with("Be terse."));
        assert!(p.system.ends_with("```## Title```"));
        assert_eq!(p.user, USER_INSTRUCTION);
    }

    #[test]
    fn custom_prompt_without_example() {
        assert_eq!(compose_custom_prompt("Only lists.", None), "Only lists.");
        assert_eq!(compose_custom_prompt("Only lists.", Some("")), "Only lists.");
    }

    #[tokio::test]
    async fn prompt_config_defaults_then_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/prompt_config.json");

        let loaded = PromptConfig::load(&path).await.unwrap();
        assert_eq!(loaded, PromptConfig::default());

        let custom = PromptConfig {
            prompt: "Summarise.".into(),
            format_example: "- a".into(),
        };
        custom.save(&path).await.unwrap();
        assert_eq!(PromptConfig::load(&path).await.unwrap(), custom);
    }
}
