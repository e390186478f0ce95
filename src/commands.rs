//! Slash and bare-word commands recognized in the composer.

const STOP_COMMANDS: &[&str] = &["/stop", "stop", "esc", "abort", "wait", "exit"];
const RESET_PREFIXES: &[&str] = &["/new", "/reset"];

/// True when the text asks to stop the active run instead of being sent.
pub fn is_stop_command(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    STOP_COMMANDS.contains(&normalized.as_str())
}

/// True when the text starts a fresh conversation, so the session list
/// should be reloaded once its run finishes.
pub fn is_reset_command(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    RESET_PREFIXES.iter().any(|prefix| {
        normalized
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
    })
}
