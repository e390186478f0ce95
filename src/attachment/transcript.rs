//! Transcript normalization and outbound text composition.
//!
//! Voice notes travel to the agent as text: each note with a transcript
//! appends a labelled block to the user's message.
//!
//! ```text
//! Summarize this
//!
//! [memo.webm transcript]
//! hello
//! second line
//! ```

use super::types::Attachment;

/// Label used when a voice note has no file name.
pub const DEFAULT_TRANSCRIPT_LABEL: &str = "voice note";

/// Trim every part and drop the ones left empty.
pub fn normalize_parts(parts: &[String]) -> Vec<String> {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Pick the transcript text for a voice note.
///
/// Non-empty normalized parts win (joined with `\n`); otherwise the trimmed
/// free-form transcript; otherwise nothing.
pub fn resolve(transcript: Option<&str>, parts: Option<&[String]>) -> Option<String> {
    if let Some(parts) = parts {
        let normalized = normalize_parts(parts);
        if !normalized.is_empty() {
            return Some(normalized.join("\n"));
        }
    }
    transcript
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

fn label(attachment: &Attachment) -> &str {
    attachment
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_TRANSCRIPT_LABEL)
}

/// Build the text actually sent for a user message.
pub fn compose_outbound_text(text: &str, attachments: &[Attachment]) -> String {
    let mut sections: Vec<String> = Vec::new();
    let text = text.trim();
    if !text.is_empty() {
        sections.push(text.to_owned());
    }
    for attachment in attachments.iter().filter(|a| a.is_voice_note()) {
        if let Some(transcript) = attachment.resolved_transcript() {
            sections.push(format!("[{} transcript]\n{transcript}", label(attachment)));
        }
    }
    sections.join("\n\n")
}
